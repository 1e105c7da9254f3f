//! Ordered, append-only conversation transcript
//!
//! The transcript is the source of truth for what a front end renders.
//! At most one message is open (still receiving streamed content), and
//! when one is open it is always the last element.

use crate::error::TranscriptError;
use crate::state::{ChatMessage, ChatRole};

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The message currently receiving streamed content, if any
    pub fn open_message(&self) -> Option<&ChatMessage> {
        self.messages.last().filter(|m| m.open)
    }

    /// Push a new message at the end.
    ///
    /// An open assistant message must be extended rather than duplicated, so
    /// appending another assistant message while one is open is rejected.
    /// A user message closes whatever is open.
    pub fn append(&mut self, message: ChatMessage) -> Result<(), TranscriptError> {
        if self.open_message().is_some() {
            if message.role == ChatRole::Assistant {
                return Err(TranscriptError::InvalidState(
                    "an assistant message is already open",
                ));
            }
            self.close_last();
        }
        self.messages.push(message);
        Ok(())
    }

    /// Push the user's side of a turn, closing any open reply first.
    pub fn push_user(&mut self, content: &str) {
        self.close_last();
        self.messages.push(ChatMessage::user(content));
    }

    /// Concatenate `fragment` onto the open assistant message, or start one.
    pub fn append_or_extend_assistant(&mut self, fragment: &str) {
        match self.open_assistant_mut() {
            Some(open) => open.content.push_str(fragment),
            None => self.messages.push(ChatMessage::open_assistant(fragment)),
        }
    }

    /// Overwrite the open assistant message with `text`, or start one.
    pub fn assign_open_assistant(&mut self, text: &str) {
        match self.open_assistant_mut() {
            Some(open) => {
                open.content.clear();
                open.content.push_str(text);
            }
            None => self.messages.push(ChatMessage::open_assistant(text)),
        }
    }

    /// Freeze the last message. Calling it twice is the same as calling it once.
    pub fn close_last(&mut self) {
        if let Some(last) = self.messages.last_mut() {
            if last.role == ChatRole::Assistant {
                last.open = false;
            }
        }
    }

    /// Collapse the reply of a failed turn into a single message.
    ///
    /// Whatever streamed in before is discarded, never mixed with `text`.
    pub fn replace_last_assistant(&mut self, text: &str) {
        match self.messages.last_mut() {
            Some(last) if last.role == ChatRole::Assistant => {
                last.content = text.to_string();
            }
            _ => self.messages.push(ChatMessage::assistant(text)),
        }
    }

    fn open_assistant_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages
            .last_mut()
            .filter(|m| m.open && m.role == ChatRole::Assistant)
    }
}
