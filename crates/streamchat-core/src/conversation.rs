//! Chat turn lifecycle
//!
//! A turn moves `Idle -> Sending -> Streaming -> {Completed | Failed}`. The
//! user's message lands in the transcript as soon as it is submitted; reply
//! fragments are folded into a single assistant message while the stream is
//! open; any failure collapses the reply into [`ERROR_MESSAGE`].
//!
//! The machine itself is synchronous. Transport progress is fed in through
//! [`Conversation::handle`], either inline by [`Conversation::run_turn`] or
//! from a channel filled by [`ChatClient::spawn_turn`].

use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::{ChatClient, ChatRequest};
use crate::decoder::LineDecoder;
use crate::error::{ChatError, SubmitError};
use crate::reducer::{ApplyMode, EventReducer};
use crate::transcript::Transcript;

/// Shown in place of the reply whenever a turn fails
pub const ERROR_MESSAGE: &str = "Sorry, there was an error. Please try again.";

pub const DEFAULT_PREFIX: &str = "You are an AI assistant.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
}

impl TurnState {
    pub fn is_loading(self) -> bool {
        matches!(self, TurnState::Sending | TurnState::Streaming)
    }
}

/// Progress of the transport behind the in-flight turn
#[derive(Debug)]
pub enum TransportEvent {
    /// Response accepted and a body is available
    Connected,
    Frame(Bytes),
    /// Body ended cleanly
    End,
    Failed(ChatError),
}

/// Change notifications for a rendering layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    Transcript,
    Loading(bool),
}

struct Turn {
    decoder: LineDecoder,
    reducer: EventReducer,
    started: Instant,
}

pub struct Conversation {
    transcript: Transcript,
    state: TurnState,
    turn: Option<Turn>,
    prefix: String,
    mode: ApplyMode,
    updates: Vec<mpsc::UnboundedSender<Update>>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl Conversation {
    pub fn new(prefix: &str) -> Self {
        Self {
            transcript: Transcript::new(),
            state: TurnState::Idle,
            turn: None,
            prefix: prefix.to_string(),
            mode: ApplyMode::default(),
            updates: Vec::new(),
        }
    }

    pub fn with_apply_mode(mut self, mode: ApplyMode) -> Self {
        self.mode = mode;
        self
    }

    /// Receive an [`Update`] after every transcript or loading change.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Update> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.updates.push(tx);
        rx
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state.is_loading()
    }

    /// Start a turn with the user's input.
    ///
    /// The message is in the transcript before this returns; the request to
    /// send carries the transcript as it was before it.
    pub fn submit(&mut self, input: &str) -> Result<ChatRequest, SubmitError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(SubmitError::Empty);
        }
        if self.is_loading() {
            return Err(SubmitError::Busy);
        }

        let history = self.transcript.messages().to_vec();
        self.transcript.push_user(text);
        self.state = TurnState::Sending;
        self.turn = Some(Turn {
            decoder: LineDecoder::new(),
            reducer: EventReducer::new(self.mode),
            started: Instant::now(),
        });
        info!(history = history.len(), "turn started");
        self.notify(Update::Transcript);
        self.notify(Update::Loading(true));

        Ok(ChatRequest {
            prefix: self.prefix.clone(),
            message: text.to_string(),
            history,
        })
    }

    /// Advance the in-flight turn.
    pub fn handle(&mut self, event: TransportEvent) {
        if !self.is_loading() {
            debug!(?event, "dropping transport event with no turn in flight");
            return;
        }

        match event {
            TransportEvent::Connected => {
                if self.state == TurnState::Sending {
                    self.state = TurnState::Streaming;
                }
            }
            TransportEvent::Frame(frame) => {
                self.state = TurnState::Streaming;
                self.on_frame(&frame);
            }
            TransportEvent::End => self.complete(),
            TransportEvent::Failed(err) => self.fail(err),
        }
    }

    /// Stop waiting on the in-flight turn and keep what has streamed so far.
    pub fn abandon(&mut self) {
        if !self.is_loading() {
            return;
        }
        if let Some(turn) = &self.turn {
            info!(fragments = turn.reducer.fragments(), "turn abandoned");
        }
        self.transcript.close_last();
        self.state = TurnState::Idle;
        self.notify(Update::Transcript);
        self.settle();
    }

    /// Submit `input` and drive the whole turn inline.
    ///
    /// Transport failures are absorbed into the transcript; the returned state
    /// says how the turn ended.
    pub async fn run_turn(
        &mut self,
        client: &ChatClient,
        input: &str,
    ) -> Result<TurnState, SubmitError> {
        let request = self.submit(input)?;
        match client.send(&request).await {
            Ok(frames) => {
                self.handle(TransportEvent::Connected);
                self.drive(frames).await;
            }
            Err(err) => self.handle(TransportEvent::Failed(err)),
        }
        Ok(self.state)
    }

    /// Feed a frame stream through the in-flight turn until it ends or fails.
    pub async fn drive<S>(&mut self, mut frames: S)
    where
        S: Stream<Item = Result<Bytes, ChatError>> + Unpin,
    {
        while let Some(item) = frames.next().await {
            match item {
                Ok(frame) => self.handle(TransportEvent::Frame(frame)),
                Err(err) => {
                    self.handle(TransportEvent::Failed(err));
                    return;
                }
            }
            if !self.is_loading() {
                return;
            }
        }
        self.handle(TransportEvent::End);
    }

    fn on_frame(&mut self, frame: &[u8]) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        let mut changed = false;
        for line in turn.decoder.feed(frame) {
            changed |= turn.reducer.apply(&mut self.transcript, &line);
        }
        if changed {
            self.notify(Update::Transcript);
        }
    }

    fn complete(&mut self) {
        if let Some(turn) = self.turn.as_mut() {
            if let Some(line) = turn.decoder.finish() {
                turn.reducer.apply(&mut self.transcript, &line);
            }
            turn.reducer.finish(&mut self.transcript);
            info!(
                fragments = turn.reducer.fragments(),
                chars = turn.reducer.accumulated().chars().count(),
                elapsed_ms = turn.started.elapsed().as_millis() as u64,
                "turn completed"
            );
        }
        self.state = TurnState::Completed;
        self.notify(Update::Transcript);
        self.settle();
    }

    fn fail(&mut self, err: ChatError) {
        let streamed = self.turn.as_ref().map_or(0, |t| t.reducer.fragments());
        if err.is_preflight() {
            warn!(error = %err, "chat request rejected");
        } else {
            warn!(error = %err, fragments = streamed, "chat stream failed");
        }

        self.transcript.replace_last_assistant(ERROR_MESSAGE);
        self.transcript.close_last();
        self.state = TurnState::Failed;
        self.notify(Update::Transcript);
        self.settle();
    }

    // Single exit for every terminal path; clears loading exactly once.
    fn settle(&mut self) {
        self.turn = None;
        self.notify(Update::Loading(false));
    }

    fn notify(&mut self, update: Update) {
        self.updates.retain(|tx| tx.send(update).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ChatMessage, ChatRole};
    use futures_util::stream;
    use pretty_assertions::assert_eq;
    use std::io;

    fn frames(chunks: &[&'static str]) -> Vec<Result<Bytes, ChatError>> {
        chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect()
    }

    fn dropped() -> ChatError {
        ChatError::Interrupted(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ))
    }

    fn summary(c: &Conversation) -> Vec<(ChatRole, String)> {
        c.transcript()
            .messages()
            .iter()
            .map(|m| (m.role, m.content.clone()))
            .collect()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Update>) -> Vec<Update> {
        let mut out = Vec::new();
        while let Ok(update) = rx.try_recv() {
            out.push(update);
        }
        out
    }

    fn loading_signals(updates: &[Update]) -> Vec<bool> {
        updates
            .iter()
            .filter_map(|u| match u {
                Update::Loading(v) => Some(*v),
                Update::Transcript => None,
            })
            .collect()
    }

    #[test]
    fn test_submit_appends_user_message_immediately() {
        let mut c = Conversation::default();
        let request = c.submit("  Hi  ").unwrap();

        assert_eq!(request.message, "Hi");
        assert_eq!(request.prefix, DEFAULT_PREFIX);
        assert!(request.history.is_empty());
        assert_eq!(summary(&c), vec![(ChatRole::User, "Hi".to_string())]);
        assert_eq!(c.state(), TurnState::Sending);
        assert!(c.is_loading());
    }

    #[test]
    fn test_blank_and_concurrent_submissions_rejected() {
        let mut c = Conversation::default();
        assert_eq!(c.submit("   \n").unwrap_err(), SubmitError::Empty);
        assert!(c.transcript().is_empty());

        c.submit("Hi").unwrap();
        assert_eq!(c.submit("again").unwrap_err(), SubmitError::Busy);
        assert_eq!(c.transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_streamed_reply_scenario() {
        let mut c = Conversation::default();
        let mut rx = c.subscribe();
        c.submit("Hi").unwrap();
        c.handle(TransportEvent::Connected);
        assert_eq!(c.state(), TurnState::Streaming);

        c.drive(stream::iter(frames(&["data: Hel\n", "data: lo!\n"]))).await;

        assert_eq!(
            summary(&c),
            vec![
                (ChatRole::User, "Hi".to_string()),
                (ChatRole::Assistant, "Hello!".to_string()),
            ]
        );
        assert!(c.transcript().open_message().is_none());
        assert_eq!(c.state(), TurnState::Completed);
        assert!(!c.is_loading());
        assert_eq!(loading_signals(&drain(&mut rx)), vec![true, false]);
    }

    #[tokio::test]
    async fn test_unterminated_final_line_is_applied() {
        let mut c = Conversation::default();
        c.submit("Hi").unwrap();
        c.handle(TransportEvent::Connected);
        c.drive(stream::iter(frames(&["data: ab\ndata: cd\ndata: e"]))).await;

        assert_eq!(c.transcript().last().unwrap().content, "abcde");
    }

    #[test]
    fn test_preflight_failure_collapses_to_error() {
        let mut c = Conversation::default();
        let mut rx = c.subscribe();
        c.submit("Hi").unwrap();
        c.handle(TransportEvent::Failed(ChatError::Status(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
        )));

        assert_eq!(
            summary(&c),
            vec![
                (ChatRole::User, "Hi".to_string()),
                (ChatRole::Assistant, ERROR_MESSAGE.to_string()),
            ]
        );
        assert_eq!(c.state(), TurnState::Failed);
        assert_eq!(loading_signals(&drain(&mut rx)), vec![true, false]);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_overwrites_partial_reply() {
        for mode in [ApplyMode::Extend, ApplyMode::Accumulate] {
            let mut c = Conversation::default().with_apply_mode(mode);
            let mut rx = c.subscribe();
            c.submit("Hi").unwrap();
            c.handle(TransportEvent::Connected);

            let mut items = frames(&["data: Par\n", "data: tial\n"]);
            items.push(Err(dropped()));
            c.drive(stream::iter(items)).await;

            assert_eq!(
                summary(&c),
                vec![
                    (ChatRole::User, "Hi".to_string()),
                    (ChatRole::Assistant, ERROR_MESSAGE.to_string()),
                ],
                "{mode:?}"
            );
            assert!(c.transcript().open_message().is_none());
            assert_eq!(c.state(), TurnState::Failed);
            assert_eq!(loading_signals(&drain(&mut rx)), vec![true, false]);
        }
    }

    #[tokio::test]
    async fn test_failure_before_any_fragment_appends_error() {
        let mut c = Conversation::default();
        c.submit("Hi").unwrap();
        c.handle(TransportEvent::Connected);
        c.drive(stream::iter(vec![Err(dropped())])).await;

        assert_eq!(c.transcript().len(), 2);
        assert_eq!(c.transcript().last().unwrap().content, ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_second_turn_gets_its_own_reply_and_history() {
        let mut c = Conversation::default();
        c.submit("Hi").unwrap();
        c.handle(TransportEvent::Connected);
        c.drive(stream::iter(frames(&["data: Hello!\n"]))).await;

        let request = c.submit("How are you?").unwrap();
        assert_eq!(
            request.history,
            vec![ChatMessage::user("Hi"), ChatMessage::assistant("Hello!")]
        );
        c.handle(TransportEvent::Connected);
        c.drive(stream::iter(frames(&["data: Fine.\n"]))).await;

        assert_eq!(
            summary(&c),
            vec![
                (ChatRole::User, "Hi".to_string()),
                (ChatRole::Assistant, "Hello!".to_string()),
                (ChatRole::User, "How are you?".to_string()),
                (ChatRole::Assistant, "Fine.".to_string()),
            ]
        );
    }

    #[test]
    fn test_abandon_keeps_partial_and_clears_loading_once() {
        let mut c = Conversation::default();
        let mut rx = c.subscribe();
        c.submit("Hi").unwrap();
        c.handle(TransportEvent::Connected);
        c.handle(TransportEvent::Frame(Bytes::from_static(b"data: Par\n")));

        c.abandon();
        c.abandon();

        assert_eq!(c.state(), TurnState::Idle);
        assert_eq!(c.transcript().last().unwrap().content, "Par");
        assert!(c.transcript().open_message().is_none());
        assert_eq!(loading_signals(&drain(&mut rx)), vec![true, false]);
    }

    #[test]
    fn test_stale_events_after_turn_are_ignored() {
        let mut c = Conversation::default();
        c.submit("Hi").unwrap();
        c.handle(TransportEvent::Failed(ChatError::MissingBody));
        c.handle(TransportEvent::Frame(Bytes::from_static(b"data: late\n")));
        c.handle(TransportEvent::End);

        assert_eq!(c.state(), TurnState::Failed);
        assert_eq!(c.transcript().last().unwrap().content, ERROR_MESSAGE);
    }

    #[test]
    fn test_loading_tracks_every_transition() {
        let mut c = Conversation::default();
        let mut rx = c.subscribe();
        assert!(!c.is_loading());

        c.submit("Hi").unwrap();
        assert!(c.is_loading());
        c.handle(TransportEvent::Connected);
        assert!(c.is_loading());
        c.handle(TransportEvent::Frame(Bytes::from_static(b"data: x\n")));
        assert!(c.is_loading());
        c.handle(TransportEvent::End);
        assert!(!c.is_loading());

        c.submit("again").unwrap();
        c.handle(TransportEvent::Failed(ChatError::MissingBody));
        assert!(!c.is_loading());

        assert_eq!(loading_signals(&drain(&mut rx)), vec![true, false, true, false]);
    }
}
