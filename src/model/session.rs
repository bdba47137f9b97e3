use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::message::History;
use crate::model::turn_result::RiskLevel;

/// How a session judges progress. Selects the response schema and the
/// guardrails that run each turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Progression {
    /// Progress score, risk level and `ongoing|won|lost` status.
    Scoring,
    /// Course with a free `continue|pass|fail` verdict.
    Verdict,
    /// Course with numbered stages that must advance one at a time.
    Staged,
}

impl Progression {
    pub fn is_course(&self) -> bool {
        !matches!(self, Progression::Scoring)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Progression::Scoring => "scoring",
            Progression::Verdict => "verdict",
            Progression::Staged => "staged",
        }
    }
}

impl fmt::Display for Progression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Progression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scoring" | "score" => Ok(Progression::Scoring),
            "verdict" | "course" => Ok(Progression::Verdict),
            "staged" | "stages" => Ok(Progression::Staged),
            other => Err(format!(
                "unknown game mode '{other}' (expected scoring, verdict or staged)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Ongoing,
    Won,
    Lost,
    Passed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Ongoing)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Ongoing => "ongoing",
            SessionStatus::Won => "won",
            SessionStatus::Lost => "lost",
            SessionStatus::Passed => "pass",
            SessionStatus::Failed => "fail",
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Won,
    Lost,
    Passed,
    Failed,
    TurnLimit,
}

/// Guardrail state carried between turns. Only updated from accepted results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardrailMemory {
    pub last_hint_shown: Option<String>,
    /// Monotonic.
    pub highest_stage: u32,
    pub last_stage_label: String,
    pub last_stage_number: u32,
}

impl GuardrailMemory {
    pub fn accept_stage(&mut self, label: &str, number: u32) {
        self.highest_stage = self.highest_stage.max(number);
        if !label.is_empty() {
            self.last_stage_label = label.to_string();
        }
        if number != 0 {
            self.last_stage_number = number;
        }
    }

    pub fn record_hint(&mut self, hint: &str) {
        self.last_hint_shown = Some(hint.to_string());
    }
}

/// The single live game instance.
#[derive(Debug, Clone)]
pub struct Session {
    pub history: History,
    pub turn: u32,
    /// Always within 0..=100.
    pub progress_score: u8,
    pub risk_level: RiskLevel,
    /// Scoring checkpoint or course stage label.
    pub checkpoint: String,
    pub status: SessionStatus,
    pub memory: GuardrailMemory,
    /// Distinct `Stage N` markers found in the system prompt.
    pub total_stages: u32,
}

impl Session {
    pub fn new(system_prompt: impl Into<String>, total_stages: u32) -> Self {
        Self {
            history: History::new(system_prompt),
            turn: 0,
            progress_score: 0,
            risk_level: RiskLevel::Critical,
            checkpoint: "Initial triage".to_string(),
            status: SessionStatus::Ongoing,
            memory: GuardrailMemory::default(),
            total_stages,
        }
    }

    pub fn set_progress(&mut self, raw: i64) {
        self.progress_score = raw.clamp(0, 100) as u8;
    }
}
