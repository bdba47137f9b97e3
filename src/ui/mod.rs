pub mod console;
pub mod repl;
