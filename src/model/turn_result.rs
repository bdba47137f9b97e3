use serde_json::{json, Value};

/// Scoring-game judgment for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    Ongoing,
    Won,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Course judgment for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Pass,
    Fail,
}

impl GameStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ongoing" => Some(Self::Ongoing),
            "won" => Some(Self::Won),
            "lost" => Some(Self::Lost),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ongoing => "ongoing",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }
}

impl RiskLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl Verdict {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "continue" => Some(Self::Continue),
            "pass" => Some(Self::Pass),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

/// Validated response of the scoring game.
///
/// `progress_score` is kept as the model sent it; the state machine clamps it
/// when the turn is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredResult {
    pub narration: String,
    pub status: GameStatus,
    pub progress_score: i64,
    pub risk_level: RiskLevel,
    pub checkpoint: String,
    pub hint_used: bool,
    pub bad_action: bool,
}

/// Validated response of a course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseResult {
    pub stage: String,
    pub narrative: String,
    pub verdict: Verdict,
    pub education: Option<String>,
    pub hint: Option<String>,
}

impl CourseResult {
    /// Wire form recorded as the assistant turn in course history.
    pub fn to_json(&self) -> Value {
        let mut value = json!({
            "stage": self.stage,
            "narrative": self.narrative,
            "verdict": self.verdict.as_str(),
        });
        if let Some(education) = &self.education {
            value["education"] = json!(education);
        }
        if let Some(hint) = &self.hint {
            value["hint"] = json!(hint);
        }
        value
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnResult {
    Scored(ScoredResult),
    Course(CourseResult),
}
