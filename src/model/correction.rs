use crate::model::turn_result::{GameStatus, Verdict};

/// A single override the guardrails applied to a model result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correction {
    HintFlagged,
    HintCleared,
    FallbackHint,
    ForcedWin,
    FailDowngraded,
    StageSkipReverted { claimed: u32, kept: u32 },
    PassDowngraded { stage: u32, total: u32 },
    PassForced { stage: u32 },
    HintSuppressed,
}

impl Correction {
    pub fn short_name(&self) -> &'static str {
        match self {
            Correction::HintFlagged => "HintFlagged",
            Correction::HintCleared => "HintCleared",
            Correction::FallbackHint => "FallbackHint",
            Correction::ForcedWin => "ForcedWin",
            Correction::FailDowngraded => "FailDowngraded",
            Correction::StageSkipReverted { .. } => "StageSkipReverted",
            Correction::PassDowngraded { .. } => "PassDowngraded",
            Correction::PassForced { .. } => "PassForced",
            Correction::HintSuppressed => "HintSuppressed",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Correction::HintFlagged => "hint request detected".to_string(),
            Correction::HintCleared => "hint flag cleared for a non-hint action".to_string(),
            Correction::FallbackHint => "generic hint replaced with guidance".to_string(),
            Correction::ForcedWin => {
                format!("status forced to {}", GameStatus::Won.as_str())
            }
            Correction::FailDowngraded => format!(
                "{} verdict on harmless input downgraded to {}",
                Verdict::Fail.as_str(),
                Verdict::Continue.as_str()
            ),
            Correction::StageSkipReverted { claimed, kept } => {
                format!("stage jump to {claimed} reverted to {kept}")
            }
            Correction::PassDowngraded { stage, total } => {
                format!("early pass at stage {stage}/{total} downgraded")
            }
            Correction::PassForced { stage } => {
                format!("final stage {stage} completed, pass forced")
            }
            Correction::HintSuppressed => "repeated or unrequested hint hidden".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardrailReport {
    pub corrections: Vec<Correction>,
}

impl GuardrailReport {
    pub fn record(&mut self, correction: Correction) {
        self.corrections.push(correction);
    }

    #[cfg(test)]
    pub fn contains(&self, correction: &Correction) -> bool {
        self.corrections.contains(correction)
    }

    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty()
    }
}
