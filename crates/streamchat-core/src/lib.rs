pub mod client;
pub mod config;
pub mod conversation;
pub mod decoder;
pub mod error;
pub mod profile;
pub mod reducer;
pub mod state;
pub mod transcript;

// Re-export main types for convenience
pub use client::{ChatClient, ChatRequest, FrameStream};
pub use config::Config;
pub use conversation::{Conversation, TransportEvent, TurnState, Update, ERROR_MESSAGE};
pub use decoder::LineDecoder;
pub use error::{ChatError, ProfileError, SubmitError, TranscriptError};
pub use profile::LocalStore;
pub use reducer::{ApplyMode, EventReducer};
pub use state::{ChatMessage, ChatRole};
pub use transcript::Transcript;
