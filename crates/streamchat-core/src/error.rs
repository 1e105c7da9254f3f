use std::io;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single chat turn's transport.
///
/// `Status` and `MissingBody` are raised before any content has streamed;
/// everything else can happen after part of the reply is already visible.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat endpoint returned {0}")]
    Status(StatusCode),

    #[error("chat endpoint returned no response body")]
    MissingBody,

    #[error("failed to reach chat endpoint: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("failed to read response stream: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("response stream interrupted: {0}")]
    Interrupted(#[from] io::Error),

    #[error("response stream stalled for {0:?}")]
    Timeout(Duration),
}

impl ChatError {
    /// True when the endpoint rejected the turn before streaming began.
    pub fn is_preflight(&self) -> bool {
        matches!(self, ChatError::Status(_) | ChatError::MissingBody)
    }
}

/// Why a submission did not start a turn.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("message is empty")]
    Empty,

    #[error("a reply is still streaming")]
    Busy,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("invalid transcript state: {0}")]
    InvalidState(&'static str),
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("{0} is not a supported image file")]
    NotAnImage(String),

    #[error("image is {size} bytes; the limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("failed to parse local store: {0}")]
    Corrupt(#[from] serde_json::Error),
}
