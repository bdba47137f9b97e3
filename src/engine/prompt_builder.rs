use serde_json::{json, Value};

use crate::model::message::{ChatMessage, Role};
use crate::model::session::{Progression, Session};

const SCORING_INSTRUCTION: &str = "Judge this action according to the scenario and return JSON using the exact schema. \
If action is a hint/help request, set hint_used=true and give limited guidance only.";

/// Sizes that bound what each request carries.
#[derive(Debug, Clone, Copy)]
pub struct PromptLimits {
    pub turn_limit: Option<u32>,
    /// Prior entries embedded in the scoring instruction object.
    pub score_history: usize,
    /// Prior entries sent after the system message in course mode.
    pub history_window: usize,
}

/// Builds the message list for one turn.
/// Only formats; the engine owns history mutation and networking.
pub struct PromptBuilder;

impl PromptBuilder {
    /// Course modes expect the player action to already be the last history
    /// entry; scoring mode embeds `action` in a fresh instruction object.
    pub fn build(
        progression: Progression,
        session: &Session,
        action: &str,
        limits: &PromptLimits,
    ) -> Vec<ChatMessage> {
        match progression {
            Progression::Scoring => ScoringPromptBuilder::build(session, action, limits),
            Progression::Verdict | Progression::Staged => {
                CoursePromptBuilder::build(session, limits)
            }
        }
    }
}

struct ScoringPromptBuilder;

impl ScoringPromptBuilder {
    fn build(session: &Session, action: &str, limits: &PromptLimits) -> Vec<ChatMessage> {
        let payload = instruction_object(session, action, limits);
        vec![
            session.history.system().clone(),
            ChatMessage::user(payload.to_string()),
        ]
    }
}

struct CoursePromptBuilder;

impl CoursePromptBuilder {
    fn build(session: &Session, limits: &PromptLimits) -> Vec<ChatMessage> {
        session.history.window(limits.history_window)
    }
}

fn instruction_object(session: &Session, action: &str, limits: &PromptLimits) -> Value {
    let history: Vec<Value> = session
        .history
        .recent(limits.score_history)
        .iter()
        .map(|msg| json!({ "role": history_role(msg.role), "content": msg.content }))
        .collect();

    json!({
        "turn_number": session.turn,
        "turn_limit": limits.turn_limit,
        "current_progress_score": session.progress_score,
        "conversation_history": history,
        "player_action": action,
        "instruction": SCORING_INSTRUCTION,
    })
}

fn history_role(role: Role) -> &'static str {
    match role {
        Role::User => "player",
        Role::Assistant => "gm",
        Role::System => "system",
    }
}
