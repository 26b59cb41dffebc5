use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::prompts::WELCOME_MESSAGE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
    /// Failure notices only.
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_layer_id: Option<String>,
}

/// Append-only record of the conversation shown to the user.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    messages: Vec<ChatMessage>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh session log holding only the welcome message.
    pub fn with_welcome() -> Self {
        let mut log = Self::new();
        log.push(MessageRole::Model, WELCOME_MESSAGE);
        log
    }

    pub fn push(&mut self, role: MessageRole, text: impl Into<String>) -> &ChatMessage {
        self.push_related(role, text, None)
    }

    pub fn push_related(
        &mut self,
        role: MessageRole,
        text: impl Into<String>,
        related_layer_id: Option<String>,
    ) -> &ChatMessage {
        let now = Utc::now();
        // Wall clock may step backwards; keep append order monotonic.
        let timestamp = match self.messages.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.messages.push(ChatMessage {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            timestamp,
            related_layer_id,
        });
        &self.messages[self.messages.len() - 1]
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.messages.as_slice()
    }
}
