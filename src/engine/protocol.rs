use crate::model::correction::GuardrailReport;
use crate::model::session::Outcome;
use crate::model::turn_result::RiskLevel;

/// What the engine did with one line of player input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineResponse {
    /// Blank input; no turn consumed.
    EmptyInput,
    /// `quit` or `exit`; the model was not called.
    Quit,
    /// The turn was rolled back and may be retried.
    TurnFailed { reason: String },
    TurnPlayed(TurnReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    /// 0 for the course introduction.
    pub turn: u32,
    pub turn_limit: Option<u32>,
    pub view: TurnView,
    pub corrections: GuardrailReport,
    pub outcome: Option<Outcome>,
}

/// Player-facing content of an accepted result, after guardrails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnView {
    Scored {
        narration: String,
        checkpoint: String,
        risk_level: RiskLevel,
        /// Clamped.
        progress_score: u8,
        hint_used: bool,
        bad_action: bool,
    },
    Course {
        stage: String,
        narrative: String,
        education: Option<String>,
        /// Only set when the player asked and the hint is new.
        hint: Option<String>,
    },
}
