//! Deterministic corrections applied to validated model results.
//!
//! The model is not trusted to keep game state consistent turn over turn, so
//! every accepted result passes through these rules before the state machine
//! sees it. Rules only touch the fields they are about; narration and
//! education text pass through untouched unless a fallback hint replaces it.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::model::correction::{Correction, GuardrailReport};
use crate::model::session::{GuardrailMemory, Progression};
use crate::model::turn_result::{CourseResult, GameStatus, RiskLevel, ScoredResult, Verdict};

/* =========================
   Hint detection
   ========================= */

/// What counts as a player asking for help.
#[derive(Debug, Clone, Copy)]
pub struct HintPolicy {
    /// Whole-input matches.
    pub tokens: &'static [&'static str],
    /// Case-insensitive substrings.
    pub phrases: &'static [&'static str],
    /// Also match `hint`/`help` as standalone words anywhere in the input.
    pub word_boundary: bool,
}

const HINT_TOKENS: &[&str] = &["hint", "help", "clue"];

const HINT_PHRASES: &[&str] = &[
    "give me a hint",
    "need a hint",
    "can i get a hint",
    "what should i do",
    "what do i do next",
    "i am stuck",
    "i'm stuck",
    "help me",
];

pub const SCORING_HINTS: HintPolicy = HintPolicy {
    tokens: HINT_TOKENS,
    phrases: HINT_PHRASES,
    word_boundary: false,
};

pub const COURSE_HINTS: HintPolicy = HintPolicy {
    tokens: HINT_TOKENS,
    phrases: HINT_PHRASES,
    word_boundary: true,
};

static RE_HINT_WORD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\b(hint|help)\b").ok());

impl HintPolicy {
    pub fn matches(&self, action: &str) -> bool {
        let text = action.trim().to_lowercase();
        if self.tokens.contains(&text.as_str()) {
            return true;
        }
        if self.phrases.iter().any(|phrase| text.contains(phrase)) {
            return true;
        }
        self.word_boundary && is_match(&RE_HINT_WORD, &text)
    }
}

/* =========================
   Danger rules
   ========================= */

/// A named pattern that marks a player action as genuinely unsafe.
pub struct DangerRule {
    pub name: &'static str,
    pub regex: &'static LazyLock<Option<Regex>>,
}

macro_rules! danger_pattern {
    ($name:ident, $regex_str:expr) => {
        static $name: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new($regex_str).ok());
    };
}

danger_pattern!(
    RE_UNTRUSTED_CODE,
    r"(?i)\b(run|running|execute|executing|exec|eval|launch|install)\b[^.;]{0,60}\b(untrusted|unverified|unknown|arbitrary|downloaded|attached|unsigned|suspicious)\b|\b(curl|wget)\b[^|]*\|\s*(sh|bash)\b"
);
danger_pattern!(
    RE_DISABLE_CONTROLS,
    r"(?i)\b(disable|disabling|bypass|bypassing|turn off|switch off|skip|skipping|remove|ignore|override)\b[^.;]{0,60}\b(safety|safeguards?|guardrails?|approvals?|filters?|controls?|checks?|sandbox\w*|monitoring|validation|authentication|mfa)\b"
);
danger_pattern!(
    RE_UNCHECKED_PAYMENT,
    r"(?i)\b(approve|approving|send|sending|authori[sz]e|process|release|pay|wire)\b[^.;]{0,60}\b(payments?|transfers?|wires?|invoices?|refunds?|funds)\b[^.;]{0,60}\b(without|no|skip\w*)\b"
);
danger_pattern!(
    RE_EXFILTRATE,
    r"(?i)\b(exfiltrate\w*|leak\w*|export|send|upload|share|email|post|paste|forward|dump)\b[^.;]{0,60}\b(credentials?|secrets?|passwords?|api[ _-]?keys?|tokens?|customer data|personal data|pii|sensitive|confidential|private keys?)\b"
);
danger_pattern!(
    RE_BLIND_TRUST,
    r"(?i)\b(trust|trusting|accept|follow|obey|believe)\b[^.;]{0,60}\bwithout\b[^.;]{0,30}\b(verif\w*|check\w*|validat\w*|confirm\w*)|\bblindly\b"
);
danger_pattern!(
    RE_PROD_WITHOUT_REVIEW,
    r"(?i)\b(deploy\w*|push\w*|ship\w*|release\w*|merge\w*)\b[^.;]{0,60}\bprod(uction)?\b[^.;]{0,60}\b(without|no|skip\w*)\b[^.;]{0,30}\b(review\w*|approval|tests?|testing|checks?)\b"
);

static DANGER_RULES: [DangerRule; 6] = [
    DangerRule { name: "execute_untrusted_code", regex: &RE_UNTRUSTED_CODE },
    DangerRule { name: "disable_safety_controls", regex: &RE_DISABLE_CONTROLS },
    DangerRule { name: "unchecked_payment", regex: &RE_UNCHECKED_PAYMENT },
    DangerRule { name: "exfiltrate_sensitive_data", regex: &RE_EXFILTRATE },
    DangerRule { name: "trust_without_verification", regex: &RE_BLIND_TRUST },
    DangerRule { name: "deploy_without_review", regex: &RE_PROD_WITHOUT_REVIEW },
];

pub fn danger_rules() -> &'static [DangerRule] {
    &DANGER_RULES
}

/// Name of the first danger rule the action matches, if any.
pub fn matching_danger_rule(action: &str) -> Option<&'static str> {
    danger_rules()
        .iter()
        .find(|rule| is_match(rule.regex, action))
        .map(|rule| rule.name)
}

fn is_match(regex: &LazyLock<Option<Regex>>, text: &str) -> bool {
    regex.as_ref().is_some_and(|re| re.is_match(text))
}

/* =========================
   Stage numbers
   ========================= */

static RE_STAGE_LABEL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\bstage\s+(\d+)\b").ok());

static RE_STAGE_MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\bStage (\d+)\b").ok());

/// Number in a label like `"Stage 3: Containment"`, or 0 when absent.
pub fn extract_stage_number(label: &str) -> u32 {
    RE_STAGE_LABEL
        .as_ref()
        .and_then(|re| re.captures(label))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Count of distinct `Stage N` markers declared by a system prompt.
pub fn count_stages(prompt: &str) -> u32 {
    let Some(re) = RE_STAGE_MARKER.as_ref() else {
        return 0;
    };
    let mut seen: Vec<&str> = re
        .captures_iter(prompt)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    seen.sort_unstable();
    seen.dedup();
    seen.len() as u32
}

/* =========================
   Scoring game
   ========================= */

const MIN_HINT_NARRATION_CHARS: usize = 60;

/// Canned guidance for a progress bracket.
pub fn fallback_hint(progress_score: u8) -> &'static str {
    match progress_score {
        0..=19 => {
            "Hint: start with telemetry. Use NetFlow, CDN/WAF analytics, and error metrics \
to classify whether the dominant traffic is L3/L4, L7, or mixed."
        }
        20..=49 => {
            "Hint: protect critical endpoints first. Apply conservative WAF challenges/rate limits \
on auth and emergency APIs while preserving trusted traffic."
        }
        50..=79 => {
            "Hint: coordinate layered controls now. Combine ingress hardening with ISP FlowSpec/RTBH \
for clearly abusive sources and keep checking collateral impact."
        }
        _ => {
            "Hint: focus on validation and stabilization. Confirm sustained recovery (errors, latency, \
successful sessions), reduce false positives, then communicate and preserve evidence."
        }
    }
}

/// Hint detection, fallback hint and win coherence, in that order.
///
/// `progress_before` is the accepted score before this turn; the fallback
/// hint is chosen from it rather than from whatever the model claims now.
pub fn apply_scored_guardrails(
    action: &str,
    progress_before: u8,
    result: &mut ScoredResult,
) -> GuardrailReport {
    let mut report = GuardrailReport::default();

    let hint_request = SCORING_HINTS.matches(action);
    if result.hint_used != hint_request {
        report.record(if hint_request {
            Correction::HintFlagged
        } else {
            Correction::HintCleared
        });
        result.hint_used = hint_request;
    }

    if hint_request {
        let narration = result.narration.trim();
        if narration.chars().count() < MIN_HINT_NARRATION_CHARS
            || !narration.to_lowercase().contains("hint")
        {
            result.narration = fallback_hint(progress_before).to_string();
            report.record(Correction::FallbackHint);
        }
    }

    if result.status == GameStatus::Ongoing
        && result.progress_score >= 100
        && result.risk_level != RiskLevel::Critical
        && !result.bad_action
    {
        result.status = GameStatus::Won;
        report.record(Correction::ForcedWin);
    }

    report
}

/* =========================
   Courses
   ========================= */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseCorrection {
    pub report: GuardrailReport,
    pub hint_requested: bool,
    /// Stage number of the (possibly reverted) result.
    pub stage_number: u32,
    /// Hint to show the player this turn, after de-duplication.
    pub display_hint: Option<String>,
}

pub fn apply_course_guardrails(
    progression: Progression,
    action: &str,
    memory: &GuardrailMemory,
    total_stages: u32,
    result: &mut CourseResult,
) -> CourseCorrection {
    let mut report = GuardrailReport::default();
    let hint_requested = COURSE_HINTS.matches(action);

    if progression == Progression::Verdict && result.verdict == Verdict::Fail {
        match matching_danger_rule(action) {
            Some(rule) => debug!(rule, "fail verdict backed by danger rule"),
            None => {
                result.verdict = Verdict::Continue;
                report.record(Correction::FailDowngraded);
            }
        }
    }

    let mut stage_number = extract_stage_number(&result.stage);

    if progression == Progression::Staged {
        let last = memory.last_stage_number;
        if last != 0 && stage_number > last.saturating_add(1) {
            report.record(Correction::StageSkipReverted { claimed: stage_number, kept: last });
            result.verdict = Verdict::Continue;
            result.stage = memory.last_stage_label.clone();
            stage_number = last;
        }

        if total_stages > 0 {
            let highest = memory.highest_stage;
            if result.verdict == Verdict::Pass
                && (stage_number < total_stages || highest < total_stages - 1)
            {
                result.verdict = Verdict::Continue;
                report.record(Correction::PassDowngraded { stage: stage_number, total: total_stages });
            } else if result.verdict == Verdict::Continue
                && stage_number == total_stages
                && highest >= total_stages - 1
            {
                result.verdict = Verdict::Pass;
                report.record(Correction::PassForced { stage: stage_number });
            }
        }
    }

    let raw_hint = result.hint.as_deref().map(str::trim).unwrap_or_default();
    let display_hint = if hint_requested
        && !raw_hint.is_empty()
        && memory.last_hint_shown.as_deref() != Some(raw_hint)
    {
        Some(raw_hint.to_string())
    } else {
        if !raw_hint.is_empty() {
            report.record(Correction::HintSuppressed);
        }
        None
    };

    CourseCorrection {
        report,
        hint_requested,
        stage_number,
        display_hint,
    }
}
