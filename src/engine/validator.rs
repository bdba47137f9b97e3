use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::turn_result::{
    CourseResult, GameStatus, RiskLevel, ScoredResult, TurnResult, Verdict,
};
use crate::model::session::Progression;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("model response is not a JSON object")]
    NotAnObject,

    #[error("missing keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),

    #[error("{field} must be {expected}")]
    WrongType { field: &'static str, expected: &'static str },

    #[error("invalid {field}: '{value}'")]
    InvalidValue { field: &'static str, value: String },
}

const SCORED_KEYS: [&str; 7] = [
    "narration",
    "status",
    "progress_score",
    "risk_level",
    "hint_used",
    "bad_action",
    "checkpoint",
];

const COURSE_KEYS: [&str; 3] = ["narrative", "stage", "verdict"];

/// Validate a decoded model response against the schema of `progression`.
pub fn validate(progression: Progression, value: &Value) -> Result<TurnResult, ValidationError> {
    match progression {
        Progression::Scoring => validate_scored(value).map(TurnResult::Scored),
        Progression::Verdict | Progression::Staged => {
            validate_course(value).map(TurnResult::Course)
        }
    }
}

pub fn validate_scored(value: &Value) -> Result<ScoredResult, ValidationError> {
    let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;
    require_keys(obj, &SCORED_KEYS)?;

    let status = string_field(obj, "status")?;
    let status = GameStatus::parse(status).ok_or_else(|| ValidationError::InvalidValue {
        field: "status",
        value: status.to_string(),
    })?;

    let risk = string_field(obj, "risk_level")?;
    let risk_level = RiskLevel::parse(risk).ok_or_else(|| ValidationError::InvalidValue {
        field: "risk_level",
        value: risk.to_string(),
    })?;

    Ok(ScoredResult {
        narration: string_field(obj, "narration")?.to_string(),
        status,
        progress_score: integer_field(obj, "progress_score")?,
        risk_level,
        checkpoint: string_field(obj, "checkpoint")?.to_string(),
        hint_used: bool_field(obj, "hint_used")?,
        bad_action: bool_field(obj, "bad_action")?,
    })
}

pub fn validate_course(value: &Value) -> Result<CourseResult, ValidationError> {
    let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;
    require_keys(obj, &COURSE_KEYS)?;

    let verdict = string_field(obj, "verdict")?;
    let verdict = Verdict::parse(verdict).ok_or_else(|| ValidationError::InvalidValue {
        field: "verdict",
        value: verdict.to_string(),
    })?;

    Ok(CourseResult {
        stage: string_field(obj, "stage")?.to_string(),
        narrative: string_field(obj, "narrative")?.to_string(),
        verdict,
        education: optional_string_field(obj, "education")?,
        hint: optional_string_field(obj, "hint")?,
    })
}

fn require_keys(obj: &Map<String, Value>, keys: &[&str]) -> Result<(), ValidationError> {
    let mut missing: Vec<String> = keys
        .iter()
        .filter(|key| !obj.contains_key(**key))
        .map(|key| key.to_string())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }
    missing.sort();
    Err(ValidationError::MissingKeys(missing))
}

fn string_field<'a>(
    obj: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or(ValidationError::WrongType { field, expected: "a string" })
}

fn optional_string_field(
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ValidationError::WrongType { field, expected: "a string" }),
    }
}

fn integer_field(obj: &Map<String, Value>, field: &'static str) -> Result<i64, ValidationError> {
    let wrong = ValidationError::WrongType { field, expected: "an integer" };
    match obj.get(field) {
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if n.is_u64() {
                // Too large for i64; clamping happens later anyway.
                Ok(i64::MAX)
            } else {
                Err(wrong)
            }
        }
        _ => Err(wrong),
    }
}

fn bool_field(obj: &Map<String, Value>, field: &'static str) -> Result<bool, ValidationError> {
    obj.get(field)
        .and_then(Value::as_bool)
        .ok_or(ValidationError::WrongType { field, expected: "a boolean" })
}
