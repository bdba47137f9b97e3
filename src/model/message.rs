use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Append-only conversation log.
///
/// The system message lives outside the entry list so windowing can never
/// evict it. The only removal is [`History::rollback_last`], used when a turn
/// fails after its player message was already recorded.
#[derive(Debug, Clone)]
pub struct History {
    system: ChatMessage,
    entries: Vec<ChatMessage>,
}

impl History {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system: ChatMessage::system(system_prompt),
            entries: Vec::new(),
        }
    }

    pub fn system(&self) -> &ChatMessage {
        &self.system
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.entries.push(message);
    }

    pub fn rollback_last(&mut self) -> Option<ChatMessage> {
        self.entries.pop()
    }

    /// Most recent `n` entries, oldest first. Excludes the system message.
    pub fn recent(&self, n: usize) -> &[ChatMessage] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    /// System message followed by the most recent `n` entries.
    pub fn window(&self, n: usize) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(n.min(self.entries.len()) + 1);
        out.push(self.system.clone());
        out.extend_from_slice(self.recent(n));
        out
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
