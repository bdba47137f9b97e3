use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::guardrails::{
    apply_course_guardrails, apply_scored_guardrails, count_stages, extract_stage_number,
};
use crate::engine::llm_client::{ChatBackend, Gateway, GatewayError};
use crate::engine::prompt_builder::{PromptBuilder, PromptLimits};
use crate::engine::protocol::{EngineResponse, TurnReport, TurnView};
use crate::engine::validator::{self, ValidationError};
use crate::model::correction::GuardrailReport;
use crate::model::message::ChatMessage;
use crate::model::session::{Outcome, Progression, Session, SessionStatus};
use crate::model::turn_result::{CourseResult, GameStatus, ScoredResult, TurnResult, Verdict};

/// User message that asks a course to introduce itself.
pub const START_TOKEN: &str = "__START__";

const QUIT_WORDS: [&str; 2] = ["quit", "exit"];

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("model response validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("the session has already ended")]
    SessionOver,
}

/// What a failed turn does to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Roll the turn back and let the player try again.
    Recover,
    /// End the session with the error.
    Abort,
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Recover => f.write_str("recover"),
            ErrorPolicy::Abort => f.write_str("abort"),
        }
    }
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recover" | "retry" => Ok(ErrorPolicy::Recover),
            "abort" | "fatal" => Ok(ErrorPolicy::Abort),
            other => Err(format!("unknown error policy '{other}' (expected recover or abort)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub progression: Progression,
    pub limits: PromptLimits,
    pub turn_timeout: Duration,
    pub init_timeout: Duration,
    pub transport_errors: ErrorPolicy,
    pub schema_errors: ErrorPolicy,
}

/// Turn state machine. Owns the session and drives one player action at a
/// time through prompt building, the gateway, validation and guardrails.
pub struct Engine<B> {
    gateway: Gateway<B>,
    settings: EngineSettings,
    session: Session,
}

impl<B: ChatBackend> Engine<B> {
    pub fn new(gateway: Gateway<B>, settings: EngineSettings, system_prompt: String) -> Self {
        let total_stages = match settings.progression {
            Progression::Staged => count_stages(&system_prompt),
            _ => 0,
        };
        let mut session = Session::new(system_prompt, total_stages);
        if settings.progression.is_course() {
            session.checkpoint.clear();
        }

        Self { gateway, settings, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    #[cfg(test)]
    pub fn gateway(&self) -> &Gateway<B> {
        &self.gateway
    }

    fn turn_limit(&self) -> Option<u32> {
        self.settings.limits.turn_limit
    }

    fn turn_limit_reached(&self) -> bool {
        self.turn_limit().is_some_and(|limit| self.session.turn >= limit)
    }

    /// Ask a course to introduce itself. Scoring sessions have no
    /// introduction and return `None`.
    ///
    /// The introduction seeds stage memory but never shows a hint, and its
    /// verdict cannot end the course.
    pub fn start(&mut self) -> Result<Option<TurnReport>, EngineError> {
        if !self.settings.progression.is_course() {
            return Ok(None);
        }

        self.session.history.push(ChatMessage::user(START_TOKEN));
        let messages = self.session.history.window(self.settings.limits.history_window);

        let result = match self
            .gateway
            .send(&messages, self.settings.init_timeout)
            .map_err(EngineError::from)
            .and_then(|value| validator::validate_course(&value).map_err(EngineError::from))
        {
            Ok(result) => result,
            Err(err) => {
                self.session.history.rollback_last();
                return Err(err);
            }
        };

        let stage_number = extract_stage_number(&result.stage);
        self.session.memory.accept_stage(&result.stage, stage_number);
        self.session.checkpoint = result.stage.clone();
        self.session
            .history
            .push(ChatMessage::assistant(result.to_json().to_string()));

        info!(
            stage = %result.stage,
            total_stages = self.session.total_stages,
            "course started"
        );

        Ok(Some(TurnReport {
            turn: 0,
            turn_limit: self.turn_limit(),
            view: TurnView::Course {
                stage: result.stage,
                narrative: result.narrative,
                education: result.education,
                hint: None,
            },
            corrections: GuardrailReport::default(),
            outcome: None,
        }))
    }

    /// Play one line of player input.
    pub fn submit(&mut self, input: &str) -> Result<EngineResponse, EngineError> {
        if self.session.status.is_terminal() || self.turn_limit_reached() {
            return Err(EngineError::SessionOver);
        }

        let action = input.trim();
        if action.is_empty() {
            return Ok(EngineResponse::EmptyInput);
        }
        if QUIT_WORDS.iter().any(|word| action.eq_ignore_ascii_case(word)) {
            return Ok(EngineResponse::Quit);
        }

        let progression = self.settings.progression;
        self.session.turn += 1;
        if progression.is_course() {
            self.session.history.push(ChatMessage::user(action));
        }

        let messages = PromptBuilder::build(progression, &self.session, action, &self.settings.limits);

        let value = match self.gateway.send(&messages, self.settings.turn_timeout) {
            Ok(value) => value,
            Err(err) => return self.fail_turn(err.into(), self.settings.transport_errors),
        };

        let result = match validator::validate(progression, &value) {
            Ok(result) => result,
            Err(err) => return self.fail_turn(err.into(), self.settings.schema_errors),
        };

        let report = match result {
            TurnResult::Scored(result) => self.accept_scored(action, result),
            TurnResult::Course(result) => self.accept_course(action, result),
        };

        for correction in &report.corrections.corrections {
            debug!(
                turn = report.turn,
                correction = correction.short_name(),
                detail = %correction.describe(),
                "guardrail applied"
            );
        }
        if let Some(outcome) = report.outcome {
            info!(turn = report.turn, ?outcome, "session ended");
        }

        Ok(EngineResponse::TurnPlayed(report))
    }

    /// Undo the half-played turn so history only holds accepted turns.
    fn fail_turn(
        &mut self,
        err: EngineError,
        policy: ErrorPolicy,
    ) -> Result<EngineResponse, EngineError> {
        self.session.turn -= 1;
        if self.settings.progression.is_course() {
            self.session.history.rollback_last();
        }

        match policy {
            ErrorPolicy::Recover => {
                warn!(error = %err, "turn failed, rolled back");
                Ok(EngineResponse::TurnFailed { reason: err.to_string() })
            }
            ErrorPolicy::Abort => Err(err),
        }
    }

    fn accept_scored(&mut self, action: &str, mut result: ScoredResult) -> TurnReport {
        let corrections = apply_scored_guardrails(action, self.session.progress_score, &mut result);

        self.session.set_progress(result.progress_score);
        self.session.risk_level = result.risk_level;
        self.session.checkpoint = result.checkpoint.clone();
        self.session.history.push(ChatMessage::user(action));
        self.session.history.push(ChatMessage::assistant(result.narration.clone()));

        let outcome = self.settle(match result.status {
            GameStatus::Ongoing => SessionStatus::Ongoing,
            GameStatus::Won => SessionStatus::Won,
            GameStatus::Lost => SessionStatus::Lost,
        });

        TurnReport {
            turn: self.session.turn,
            turn_limit: self.turn_limit(),
            view: TurnView::Scored {
                narration: result.narration,
                checkpoint: result.checkpoint,
                risk_level: result.risk_level,
                progress_score: self.session.progress_score,
                hint_used: result.hint_used,
                bad_action: result.bad_action,
            },
            corrections,
            outcome,
        }
    }

    fn accept_course(&mut self, action: &str, mut result: CourseResult) -> TurnReport {
        let correction = apply_course_guardrails(
            self.settings.progression,
            action,
            &self.session.memory,
            self.session.total_stages,
            &mut result,
        );

        debug!(
            stage = correction.stage_number,
            hint_requested = correction.hint_requested,
            hint_shown = correction.display_hint.is_some(),
            "course turn judged"
        );

        let memory = &mut self.session.memory;
        memory.accept_stage(&result.stage, correction.stage_number);
        if let Some(hint) = &correction.display_hint {
            memory.record_hint(hint);
        }
        if !result.stage.is_empty() {
            self.session.checkpoint = result.stage.clone();
        }
        self.session
            .history
            .push(ChatMessage::assistant(result.to_json().to_string()));

        let outcome = self.settle(match result.verdict {
            Verdict::Continue => SessionStatus::Ongoing,
            Verdict::Pass => SessionStatus::Passed,
            Verdict::Fail => SessionStatus::Failed,
        });

        TurnReport {
            turn: self.session.turn,
            turn_limit: self.turn_limit(),
            view: TurnView::Course {
                stage: result.stage,
                narrative: result.narrative,
                education: result.education,
                hint: correction.display_hint,
            },
            corrections: correction.report,
            outcome,
        }
    }

    /// Store the new status and decide whether the session is over.
    fn settle(&mut self, status: SessionStatus) -> Option<Outcome> {
        self.session.status = status;
        match status {
            SessionStatus::Won => Some(Outcome::Won),
            SessionStatus::Lost => Some(Outcome::Lost),
            SessionStatus::Passed => Some(Outcome::Passed),
            SessionStatus::Failed => Some(Outcome::Failed),
            SessionStatus::Ongoing if self.turn_limit_reached() => {
                self.session.status = SessionStatus::Lost;
                Some(Outcome::TurnLimit)
            }
            SessionStatus::Ongoing => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::guardrails::fallback_hint;
    use crate::engine::llm_client::testing::{transport_error, ScriptedBackend};
    use crate::model::correction::Correction;
    use crate::model::message::Role;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    const STAGED_PROMPT: &str = "Respond in JSON.\n\nCourse-specific instructions:\n\
Stage 1 recon. Stage 2 inbox. Stage 3 tools. Stage 4 debrief.";

    fn settings(progression: Progression, turn_limit: Option<u32>) -> EngineSettings {
        EngineSettings {
            progression,
            limits: PromptLimits { turn_limit, score_history: 8, history_window: 20 },
            turn_timeout: Duration::from_secs(120),
            init_timeout: Duration::from_secs(300),
            transport_errors: ErrorPolicy::Recover,
            schema_errors: match progression {
                Progression::Scoring => ErrorPolicy::Abort,
                _ => ErrorPolicy::Recover,
            },
        }
    }

    fn engine(progression: Progression, turn_limit: Option<u32>, prompt: &str) -> Engine<ScriptedBackend> {
        Engine::new(
            Gateway::new(ScriptedBackend::new()),
            settings(progression, turn_limit),
            prompt.to_string(),
        )
    }

    fn backend(engine: &Engine<ScriptedBackend>) -> &ScriptedBackend {
        engine.gateway().backend()
    }

    fn scored(status: &str, score: i64, risk: &str, narration: &str) -> Value {
        json!({
            "narration": narration,
            "status": status,
            "progress_score": score,
            "risk_level": risk,
            "hint_used": false,
            "bad_action": false,
            "checkpoint": "Mitigation"
        })
    }

    fn course(stage: &str, verdict: &str, hint: Option<&str>) -> Value {
        let mut value = json!({
            "stage": stage,
            "narrative": format!("You are at {stage}."),
            "education": "Verify before you trust.",
            "verdict": verdict
        });
        if let Some(hint) = hint {
            value["hint"] = json!(hint);
        }
        value
    }

    fn played(response: EngineResponse) -> TurnReport {
        match response {
            EngineResponse::TurnPlayed(report) => report,
            other => panic!("expected a played turn, got {other:?}"),
        }
    }

    fn course_hint(report: &TurnReport) -> Option<&str> {
        match &report.view {
            TurnView::Course { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }

    #[test]
    fn empty_input_and_quit_never_call_the_model() {
        let mut engine = engine(Progression::Scoring, Some(12), "rules");

        assert_eq!(engine.submit("   ").unwrap(), EngineResponse::EmptyInput);
        assert_eq!(engine.submit("EXIT").unwrap(), EngineResponse::Quit);
        assert_eq!(engine.session().turn, 0);
        assert_eq!(backend(&engine).calls(), 0);
    }

    #[test]
    fn turn_limit_ends_the_session_without_another_call() {
        let mut engine = engine(Progression::Scoring, Some(3), "rules");
        for _ in 0..4 {
            backend(&engine).queue_json(scored("ongoing", 20, "high", "The flood continues."));
        }

        for turn in 1..=2 {
            let report = played(engine.submit("check NetFlow").unwrap());
            assert_eq!(report.turn, turn);
            assert_eq!(report.outcome, None);
        }
        let report = played(engine.submit("check NetFlow").unwrap());
        assert_eq!(report.outcome, Some(Outcome::TurnLimit));
        assert_eq!(engine.session().status, SessionStatus::Lost);

        assert!(matches!(engine.submit("one more"), Err(EngineError::SessionOver)));
        assert_eq!(backend(&engine).calls(), 3);
    }

    #[test]
    fn full_progress_wins_even_when_model_says_ongoing() {
        let mut engine = engine(Progression::Scoring, Some(12), "rules");
        backend(&engine).queue_json(scored("ongoing", 100, "low", "Service is stable."));

        let report = played(engine.submit("validate recovery").unwrap());
        assert_eq!(report.outcome, Some(Outcome::Won));
        assert!(report.corrections.contains(&Correction::ForcedWin));
        assert_eq!(engine.session().status, SessionStatus::Won);
    }

    #[test]
    fn critical_risk_blocks_forced_win() {
        let mut engine = engine(Progression::Scoring, Some(12), "rules");
        backend(&engine).queue_json(scored("ongoing", 100, "critical", "Still down."));

        let report = played(engine.submit("validate recovery").unwrap());
        assert_eq!(report.outcome, None);
        assert_eq!(engine.session().status, SessionStatus::Ongoing);
    }

    #[test]
    fn help_request_gets_bracket_hint_from_current_progress() {
        let mut engine = engine(Progression::Scoring, Some(12), "rules");
        backend(&engine).queue_json(scored("ongoing", 10, "high", "You look at the graphs."));
        backend(&engine).queue_json(scored("ongoing", 10, "high", "ok"));

        played(engine.submit("open grafana").unwrap());
        let report = played(engine.submit("help").unwrap());

        match report.view {
            TurnView::Scored { narration, hint_used, .. } => {
                assert_eq!(narration, fallback_hint(10));
                assert!(hint_used);
            }
            other => panic!("unexpected view {other:?}"),
        }
    }

    #[test]
    fn scoring_history_records_action_and_narration() {
        let mut engine = engine(Progression::Scoring, Some(12), "rules");
        backend(&engine).queue_json(scored("ongoing", 15, "high", "NetFlow shows a SYN flood."));
        backend(&engine).queue_json(scored("ongoing", 25, "high", "Rate limits hold."));

        played(engine.submit("check NetFlow").unwrap());
        played(engine.submit("rate limit /login").unwrap());

        let request = backend(&engine).last_request();
        assert_eq!(request.len(), 2);
        let payload: Value = serde_json::from_str(&request[1].content).unwrap();
        assert_eq!(payload["turn_number"], 2);
        assert_eq!(payload["current_progress_score"], 15);
        assert_eq!(
            payload["conversation_history"],
            json!([
                { "role": "player", "content": "check NetFlow" },
                { "role": "gm", "content": "NetFlow shows a SYN flood." }
            ])
        );
        assert_eq!(engine.session().progress_score, 25);
    }

    #[test]
    fn scoring_schema_violation_is_fatal() {
        let mut engine = engine(Progression::Scoring, Some(12), "rules");
        backend(&engine).queue_json(json!({ "narration": "hi", "status": "ongoing" }));

        assert!(matches!(
            engine.submit("check NetFlow"),
            Err(EngineError::Validation(ValidationError::MissingKeys(_)))
        ));
        assert_eq!(engine.session().turn, 0);
    }

    #[test]
    fn abort_policy_surfaces_transport_errors() {
        let mut settings = settings(Progression::Scoring, Some(12));
        settings.transport_errors = ErrorPolicy::Abort;
        let mut engine = Engine::new(Gateway::new(ScriptedBackend::new()), settings, "rules".into());
        backend(&engine).queue_error(transport_error());

        assert!(matches!(engine.submit("check NetFlow"), Err(EngineError::Gateway(_))));
    }

    #[test]
    fn course_intro_seeds_stage_memory_and_hides_hint() {
        let mut engine = engine(Progression::Staged, None, STAGED_PROMPT);
        backend(&engine).queue_json(course("Stage 1: Recon", "continue", Some("Read the logs.")));

        let report = engine.start().unwrap().expect("course intro");
        assert_eq!(report.turn, 0);
        assert_eq!(course_hint(&report), None);

        let session = engine.session();
        assert_eq!(session.total_stages, 4);
        assert_eq!(session.memory.last_stage_number, 1);
        assert_eq!(session.memory.highest_stage, 1);
        assert_eq!(session.checkpoint, "Stage 1: Recon");

        let request = backend(&engine).last_request();
        assert_eq!(request.last().map(|m| m.content.as_str()), Some(START_TOKEN));
        assert_eq!(*backend(&engine).timeouts.borrow(), vec![Duration::from_secs(300)]);
    }

    #[test]
    fn scoring_session_has_no_intro_call() {
        let mut engine = engine(Progression::Scoring, Some(12), "rules");
        assert_eq!(engine.start().unwrap(), None);
        assert_eq!(backend(&engine).calls(), 0);
    }

    #[test]
    fn failed_intro_is_reported_and_rolled_back() {
        let mut engine = engine(Progression::Verdict, None, "rules");
        backend(&engine).queue_error(transport_error());

        assert!(engine.start().is_err());
        assert!(engine.session().history.is_empty());
    }

    #[test]
    fn transport_error_rolls_back_course_turn() {
        let mut engine = engine(Progression::Verdict, None, "rules");
        backend(&engine).queue_json(course("Stage 1", "continue", None));
        engine.start().unwrap();
        let entries_before = engine.session().history.len();

        backend(&engine).queue_error(transport_error());
        match engine.submit("inspect the tool call").unwrap() {
            EngineResponse::TurnFailed { reason } => assert!(reason.contains("connection refused")),
            other => panic!("expected failed turn, got {other:?}"),
        }
        assert_eq!(engine.session().history.len(), entries_before);
        assert_eq!(engine.session().turn, 0);

        backend(&engine).queue_json(course("Stage 1", "continue", None));
        let report = played(engine.submit("inspect the tool call").unwrap());
        assert_eq!(report.turn, 1);

        let request = backend(&engine).last_request();
        let player_turns = request
            .iter()
            .filter(|m| m.role == Role::User && m.content == "inspect the tool call")
            .count();
        assert_eq!(player_turns, 1);
    }

    #[test]
    fn course_schema_violation_is_recoverable() {
        let mut engine = engine(Progression::Verdict, None, "rules");
        backend(&engine).queue_json(course("Stage 1", "continue", None));
        engine.start().unwrap();

        backend(&engine).queue_json(json!({ "stage": "Stage 1", "verdict": "continue" }));
        assert!(matches!(
            engine.submit("look").unwrap(),
            EngineResponse::TurnFailed { .. }
        ));
        assert_eq!(engine.session().turn, 0);
    }

    #[test]
    fn staged_course_reverts_skips_and_completes() {
        let mut engine = engine(Progression::Staged, None, STAGED_PROMPT);
        backend(&engine).queue_json(course("Stage 1: Recon", "continue", None));
        engine.start().unwrap();

        backend(&engine).queue_json(course("Stage 2: Inbox", "continue", None));
        played(engine.submit("read the inbox").unwrap());

        backend(&engine).queue_json(course("Stage 5: Wrap", "pass", None));
        let report = played(engine.submit("just finish it").unwrap());
        assert_eq!(report.outcome, None);
        match &report.view {
            TurnView::Course { stage, .. } => assert_eq!(stage, "Stage 2: Inbox"),
            other => panic!("unexpected view {other:?}"),
        }
        assert_eq!(engine.session().status, SessionStatus::Ongoing);
        assert_eq!(engine.session().memory.last_stage_number, 2);

        backend(&engine).queue_json(course("Stage 3: Tools", "continue", None));
        played(engine.submit("audit the tool permissions").unwrap());

        backend(&engine).queue_json(course("Stage 4: Debrief", "continue", None));
        let report = played(engine.submit("write the debrief").unwrap());
        assert_eq!(report.outcome, Some(Outcome::Passed));
        assert!(report.corrections.contains(&Correction::PassForced { stage: 4 }));
        assert_eq!(engine.session().status, SessionStatus::Passed);
    }

    #[test]
    fn identical_hints_are_shown_once() {
        let mut engine = engine(Progression::Verdict, None, "rules");
        backend(&engine).queue_json(course("Stage 1", "continue", None));
        engine.start().unwrap();

        backend(&engine).queue_json(course("Stage 1", "continue", Some("Check the sender.")));
        backend(&engine).queue_json(course("Stage 1", "continue", Some("Check the sender.")));
        backend(&engine).queue_json(course("Stage 1", "continue", Some("Compare headers.")));

        let first = played(engine.submit("hint").unwrap());
        let second = played(engine.submit("can I get a hint?").unwrap());
        let third = played(engine.submit("help").unwrap());

        assert_eq!(course_hint(&first), Some("Check the sender."));
        assert_eq!(course_hint(&second), None);
        assert_eq!(course_hint(&third), Some("Compare headers."));
        assert_eq!(
            engine.session().memory.last_hint_shown.as_deref(),
            Some("Compare headers.")
        );
    }

    #[test]
    fn verdict_course_fail_needs_a_dangerous_action() {
        let mut engine = engine(Progression::Verdict, None, "rules");
        backend(&engine).queue_json(course("Stage 1", "continue", None));
        engine.start().unwrap();

        backend(&engine).queue_json(course("Stage 1", "fail", None));
        let report = played(engine.submit("check the dashboard").unwrap());
        assert_eq!(report.outcome, None);

        backend(&engine).queue_json(course("Stage 1", "fail", None));
        let report =
            played(engine.submit("disable the approval checks and deploy to production").unwrap());
        assert_eq!(report.outcome, Some(Outcome::Failed));
        assert!(matches!(engine.submit("again"), Err(EngineError::SessionOver)));
    }

    #[test]
    fn course_history_stores_corrected_result() {
        let mut engine = engine(Progression::Verdict, None, "rules");
        backend(&engine).queue_json(course("Stage 1", "continue", None));
        engine.start().unwrap();

        backend(&engine).queue_json(course("Stage 1", "fail", None));
        played(engine.submit("check the dashboard").unwrap());

        let last = engine.session().history.recent(1)[0].clone();
        assert_eq!(last.role, Role::Assistant);
        let stored: Value = serde_json::from_str(&last.content).unwrap();
        assert_eq!(stored["verdict"], "continue");
    }

    proptest! {
        #[test]
        fn accepted_progress_is_always_clamped(score in any::<i64>()) {
            let mut engine = engine(Progression::Scoring, Some(12), "rules");
            backend(&engine).queue_json(scored("ongoing", score, "critical", "The attack shifts."));

            let response = engine.submit("observe").unwrap();
            let report = played(response);
            prop_assert!(engine.session().progress_score <= 100);
            prop_assert_eq!(i64::from(engine.session().progress_score), score.clamp(0, 100));
            match report.view {
                TurnView::Scored { progress_score, .. } => prop_assert!(progress_score <= 100),
                _ => prop_assert!(false, "scored view expected"),
            }
        }
    }
}
