// Chat history for the model-backed assistant panel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::fsystem::Language;

pub(crate) const GREETING: &str = "Hello! I'm your code assistant running on Ollama. \
    Ask me about writing code, debugging or programming in general.";
pub(crate) const APOLOGY: &str =
    "Sorry, something went wrong while getting a response. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatMessage {
    pub(crate) id: Uuid,
    pub(crate) role: Role,
    pub(crate) content: String,
    pub(crate) timestamp: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Longest history kept, greeting included. Older turns are dropped first.
pub(crate) const MAX_HISTORY: usize = 200;

#[derive(Debug, Clone)]
pub(crate) struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Default for Conversation {
    fn default() -> Self {
        Conversation {
            messages: vec![ChatMessage::new(Role::Assistant, GREETING)],
        }
    }
}

impl Conversation {
    pub(crate) fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub(crate) fn record_user(&mut self, content: &str) -> &ChatMessage {
        self.push(ChatMessage::new(Role::User, content))
    }

    pub(crate) fn record_assistant(&mut self, content: &str) -> &ChatMessage {
        self.push(ChatMessage::new(Role::Assistant, content))
    }

    fn push(&mut self, message: ChatMessage) -> &ChatMessage {
        self.messages.push(message);
        if self.messages.len() > MAX_HISTORY {
            let excess = self.messages.len() - MAX_HISTORY;
            self.messages.drain(1..=excess);
        }
        // just pushed
        &self.messages[self.messages.len() - 1]
    }
}

/// The prompt actually sent to the model. The current buffer is embedded as
/// context when there is code and the caller asked for it.
pub(crate) fn build_prompt(
    prompt: &str,
    code: &str,
    language: Language,
    include_code: bool,
) -> String {
    if !include_code || code.trim().is_empty() {
        return prompt.to_string();
    }
    format!(
        "Answer by examining the following {language} code:\n\n```{language}\n{code}\n```\n\n{prompt}"
    )
}
