//! Applies decoded event lines to the transcript.

use tracing::trace;

use crate::transcript::Transcript;

/// Prefix that marks a line as carrying a reply fragment
pub const DATA_PREFIX: &str = "data: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLine<'a> {
    /// Payload fragment with the prefix stripped
    Data(&'a str),
    /// Anything else: blank lines, comments, unknown event fields
    Ignored,
}

pub fn classify(line: &str) -> StreamLine<'_> {
    match line.strip_prefix(DATA_PREFIX) {
        Some(payload) => StreamLine::Data(payload),
        None => StreamLine::Ignored,
    }
}

/// How fragments reach the open assistant message.
///
/// Both modes produce the same transcript; each fragment lands exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    /// Hand each fragment to the store, which concatenates it.
    #[default]
    Extend,
    /// Keep the running text here and assign it wholesale each time.
    Accumulate,
}

/// Per-turn reducer state
#[derive(Debug, Default)]
pub struct EventReducer {
    mode: ApplyMode,
    accumulated: String,
    fragments: usize,
}

impl EventReducer {
    pub fn new(mode: ApplyMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Apply one decoded line. Returns true when the transcript changed.
    pub fn apply(&mut self, transcript: &mut Transcript, line: &str) -> bool {
        let StreamLine::Data(payload) = classify(line) else {
            if !line.is_empty() {
                trace!(line, "ignoring non-data line");
            }
            return false;
        };

        self.accumulated.push_str(payload);
        self.fragments += 1;
        match self.mode {
            ApplyMode::Extend => transcript.append_or_extend_assistant(payload),
            ApplyMode::Accumulate => transcript.assign_open_assistant(&self.accumulated),
        }
        true
    }

    /// End of stream: freeze the reply.
    pub fn finish(&mut self, transcript: &mut Transcript) {
        transcript.close_last();
    }

    /// Concatenation of every fragment seen this turn
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }
}
