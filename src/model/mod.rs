pub mod correction;
pub mod message;
pub mod session;
pub mod turn_result;
