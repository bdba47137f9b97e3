use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::engine::{EngineSettings, ErrorPolicy};
use crate::engine::prompt_builder::PromptLimits;
use crate::model::session::Progression;

const APP_DIR: &str = "scenario_runner";
const SETTINGS_FILE: &str = "settings.json";

const SCORING_TURN_LIMIT: u32 = 12;
const SCORING_TEMPERATURE: f32 = 0.4;
const COURSE_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings file not found: {0}")]
    NotFound(PathBuf),

    #[error("could not read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{mode} mode needs a course (set COURSE or pass --course)")]
    MissingCourse { mode: Progression },
}

/// Every runtime knob, layered defaults → settings file → environment → CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Unset means scoring, or verdict when a course is named.
    pub mode: Option<Progression>,
    pub host: String,
    pub model: String,
    /// Unset means the mode default; 0 means unlimited.
    pub turn_limit: Option<u32>,
    pub request_timeout_seconds: u64,
    pub init_timeout_seconds: u64,
    pub ready_retries: u32,
    pub ready_interval_seconds: u64,
    pub course: Option<String>,
    pub courses_dir: PathBuf,
    pub prompt_file: PathBuf,
    pub history_window: usize,
    pub score_history: usize,
    pub temperature: Option<f32>,
    pub transport_errors: ErrorPolicy,
    /// Unset means abort for scoring and recover for courses.
    pub schema_errors: Option<ErrorPolicy>,
    pub no_color: bool,
    pub no_anim: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: None,
            host: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            turn_limit: None,
            request_timeout_seconds: 120,
            init_timeout_seconds: 300,
            ready_retries: 40,
            ready_interval_seconds: 3,
            course: None,
            courses_dir: PathBuf::from("courses"),
            prompt_file: PathBuf::from("prompts/game_master_prompt.md"),
            history_window: 20,
            score_history: 8,
            temperature: None,
            transport_errors: ErrorPolicy::Recover,
            schema_errors: None,
            no_color: false,
            no_anim: false,
        }
    }
}

/// `{config_dir}/scenario_runner/settings.json`, when the platform has a
/// config directory.
pub fn default_settings_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push(APP_DIR);
    path.push(SETTINGS_FILE);
    Some(path)
}

impl Settings {
    /// Defaults overlaid with a settings file. An explicit path must exist;
    /// the default location is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) if !path.exists() => Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => Self::load_file(path),
            None => match default_settings_path() {
                Some(path) if path.exists() => Self::load_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values found by `lookup`. Blank values count as unset.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GAME_MODE") {
            self.mode = Some(parse_value("GAME_MODE", &v)?);
        }
        if let Some(v) = get("OLLAMA_HOST") {
            self.host = v.trim().to_string();
        }
        if let Some(v) = get("OLLAMA_MODEL") {
            self.model = v.trim().to_string();
        }
        if let Some(v) = get("TURN_LIMIT") {
            self.turn_limit = Some(parse_value("TURN_LIMIT", &v)?);
        }
        if let Some(v) = get("REQUEST_TIMEOUT_SECONDS") {
            self.request_timeout_seconds = parse_positive("REQUEST_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = get("INIT_TIMEOUT_SECONDS") {
            self.init_timeout_seconds = parse_positive("INIT_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = get("READY_RETRIES") {
            self.ready_retries = parse_positive("READY_RETRIES", &v)?;
        }
        if let Some(v) = get("READY_INTERVAL_SECONDS") {
            self.ready_interval_seconds = parse_value("READY_INTERVAL_SECONDS", &v)?;
        }
        if let Some(v) = get("COURSE") {
            self.course = Some(v.trim().to_string());
        }
        if let Some(v) = get("COURSES_DIR") {
            self.courses_dir = PathBuf::from(v.trim());
        }
        if let Some(v) = get("PROMPT_FILE") {
            self.prompt_file = PathBuf::from(v.trim());
        }
        if let Some(v) = get("HISTORY_WINDOW") {
            self.history_window = parse_value("HISTORY_WINDOW", &v)?;
        }
        if let Some(v) = get("SCORE_HISTORY") {
            self.score_history = parse_value("SCORE_HISTORY", &v)?;
        }
        if let Some(v) = get("TEMPERATURE") {
            self.temperature = Some(parse_temperature("TEMPERATURE", &v)?);
        }
        if let Some(v) = get("TRANSPORT_ERRORS") {
            self.transport_errors = parse_value("TRANSPORT_ERRORS", &v)?;
        }
        if let Some(v) = get("SCHEMA_ERRORS") {
            self.schema_errors = Some(parse_value("SCHEMA_ERRORS", &v)?);
        }
        if let Some(v) = get("NO_COLOR") {
            self.no_color = parse_flag("NO_COLOR", &v)?;
        }
        if let Some(v) = get("NO_ANIM") {
            self.no_anim = parse_flag("NO_ANIM", &v)?;
        }

        Ok(())
    }

    pub fn progression(&self) -> Progression {
        match (self.mode, &self.course) {
            (Some(mode), _) => mode,
            (None, Some(_)) => Progression::Verdict,
            (None, None) => Progression::Scoring,
        }
    }

    /// Course name for course modes; errors when a course mode has none.
    pub fn course_name(&self) -> Result<Option<&str>, ConfigError> {
        let progression = self.progression();
        if !progression.is_course() {
            return Ok(None);
        }
        match self.course.as_deref().map(str::trim) {
            Some(course) if !course.is_empty() => Ok(Some(course)),
            _ => Err(ConfigError::MissingCourse { mode: progression }),
        }
    }

    pub fn turn_limit(&self) -> Option<u32> {
        match self.turn_limit {
            Some(0) => None,
            Some(limit) => Some(limit),
            None if self.progression().is_course() => None,
            None => Some(SCORING_TURN_LIMIT),
        }
    }

    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(if self.progression().is_course() {
            COURSE_TEMPERATURE
        } else {
            SCORING_TEMPERATURE
        })
    }

    pub fn ready_interval(&self) -> Duration {
        Duration::from_secs(self.ready_interval_seconds)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let progression = self.progression();
        EngineSettings {
            progression,
            limits: PromptLimits {
                turn_limit: self.turn_limit(),
                score_history: self.score_history,
                history_window: self.history_window,
            },
            turn_timeout: Duration::from_secs(self.request_timeout_seconds),
            init_timeout: Duration::from_secs(self.init_timeout_seconds),
            transport_errors: self.transport_errors,
            schema_errors: self.schema_errors.unwrap_or(if progression.is_course() {
                ErrorPolicy::Recover
            } else {
                ErrorPolicy::Abort
            }),
        }
    }
}

fn invalid(key: &'static str, value: &str, reason: impl Display) -> ConfigError {
    ConfigError::InvalidEnv {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e| invalid(key, raw, e))
}

fn parse_positive<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq,
    T::Err: Display,
{
    let value: T = parse_value(key, raw)?;
    if value == T::default() {
        return Err(invalid(key, raw, "must be greater than zero"));
    }
    Ok(value)
}

fn parse_temperature(key: &'static str, raw: &str) -> Result<f32, ConfigError> {
    let value: f32 = parse_value(key, raw)?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(key, raw, "must be a non-negative number"));
    }
    Ok(value)
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw, "expected 1/true/yes/on or 0/false/no/off")),
    }
}
