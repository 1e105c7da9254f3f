//! UI-agnostic chat data types
//!
//! These are shared by every front end (the TUI, the one-shot CLI) and are
//! what the transcript stores and the request history serializes.

use serde::{Deserialize, Serialize};

/// A single message in the conversation transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Still receiving streamed content. Only the last message may be open.
    #[serde(skip)]
    pub(crate) open: bool,
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            open: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            open: false,
        }
    }

    pub(crate) fn open_assistant(content: impl Into<String>) -> Self {
        Self {
            open: true,
            ..Self::assistant(content)
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_assistant(&self) -> bool {
        self.role == ChatRole::Assistant
    }
}
