//! Reply output for `streamchat ask`
//!
//! On a terminal the reply is echoed as it streams and taken back if the
//! turn fails, so the user never sees partial text next to the error.
//! Anywhere else nothing is written until the turn has completed.

use std::io::{self, Write};

use crossterm::{
    cursor::{MoveToColumn, MoveUp},
    queue,
    terminal::{Clear, ClearType},
};
use streamchat_core::{ChatError, Conversation, TransportEvent, TurnState};
use tokio::sync::mpsc;

pub struct ReplyWriter<W: Write> {
    out: W,
    /// Terminal width when echoing live
    width: Option<u16>,
    shown: String,
}

impl<W: Write> ReplyWriter<W> {
    pub fn live(out: W, width: u16) -> Self {
        Self {
            out,
            width: Some(width.max(1)),
            shown: String::new(),
        }
    }

    pub fn buffered(out: W) -> Self {
        Self {
            out,
            width: None,
            shown: String::new(),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Echo whatever the open reply gained since the last call
    fn show_progress(&mut self, conversation: &Conversation) -> io::Result<()> {
        if self.width.is_none() {
            return Ok(());
        }
        let Some(open) = conversation.transcript().open_message() else {
            return Ok(());
        };
        if let Some(delta) = open.content.get(self.shown.len()..) {
            if !delta.is_empty() {
                self.out.write_all(delta.as_bytes())?;
                self.out.flush()?;
                self.shown.push_str(delta);
            }
        }
        Ok(())
    }

    /// Print the rest of a completed reply, or take back a failed one.
    fn settle(&mut self, conversation: &Conversation) -> io::Result<()> {
        if conversation.state() == TurnState::Failed {
            self.erase()?;
        } else {
            // The final unterminated line only lands when the turn completes
            let reply = conversation.transcript().last().filter(|m| m.is_assistant());
            if let Some(rest) = reply.and_then(|m| m.content.get(self.shown.len()..)) {
                self.out.write_all(rest.as_bytes())?;
            }
            writeln!(self.out)?;
        }
        self.out.flush()
    }

    fn erase(&mut self) -> io::Result<()> {
        let Some(width) = self.width else {
            return Ok(());
        };
        if self.shown.is_empty() {
            return Ok(());
        }
        let rows = rows_used(&self.shown, width);
        queue!(self.out, MoveToColumn(0))?;
        if rows > 1 {
            queue!(self.out, MoveUp(rows - 1))?;
        }
        queue!(self.out, Clear(ClearType::FromCursorDown))?;
        self.shown.clear();
        Ok(())
    }
}

/// Terminal rows taken by `text` printed from column 0
fn rows_used(text: &str, width: u16) -> u16 {
    let width = usize::from(width.max(1));
    let rows: usize = text
        .split('\n')
        .map(|line| (line.chars().count().max(1) - 1) / width + 1)
        .sum();
    u16::try_from(rows).unwrap_or(u16::MAX)
}

/// Run a spawned turn's events through `conversation` until it settles.
///
/// A channel that closes before the turn ends counts as a failed turn.
pub async fn stream_reply<W: Write>(
    conversation: &mut Conversation,
    rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
    writer: &mut ReplyWriter<W>,
) -> io::Result<TurnState> {
    while conversation.is_loading() {
        let event = match rx.recv().await {
            Some(event) => event,
            None => {
                let err = io::Error::other("transport task ended without a result");
                TransportEvent::Failed(ChatError::from(err))
            }
        };
        conversation.handle(event);
        if conversation.is_loading() {
            writer.show_progress(conversation)?;
        }
    }
    writer.settle(conversation)?;
    Ok(conversation.state())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use streamchat_core::ERROR_MESSAGE;

    fn frame(text: &str) -> TransportEvent {
        TransportEvent::Frame(text.as_bytes().to_vec().into())
    }

    fn dropped() -> TransportEvent {
        TransportEvent::Failed(ChatError::Interrupted(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )))
    }

    /// Replay `events` for a fresh "Hi" turn, then close the channel
    async fn replay(
        events: Vec<TransportEvent>,
        mut writer: ReplyWriter<Vec<u8>>,
    ) -> (Conversation, TurnState, String) {
        let mut conversation = Conversation::default();
        conversation.submit("Hi").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        for event in events {
            tx.send(event).unwrap();
        }
        drop(tx);

        let state = stream_reply(&mut conversation, &mut rx, &mut writer)
            .await
            .unwrap();
        let out = String::from_utf8(writer.into_inner()).unwrap();
        (conversation, state, out)
    }

    fn erase_sequence(rows: u16) -> String {
        let mut seq: Vec<u8> = Vec::new();
        queue!(seq, MoveToColumn(0)).unwrap();
        if rows > 1 {
            queue!(seq, MoveUp(rows - 1)).unwrap();
        }
        queue!(seq, Clear(ClearType::FromCursorDown)).unwrap();
        String::from_utf8(seq).unwrap()
    }

    #[test]
    fn test_rows_used_counts_wraps_and_newlines() {
        assert_eq!(rows_used("Par", 80), 1);
        assert_eq!(rows_used("abcd", 4), 1);
        assert_eq!(rows_used("abcdef", 4), 2);
        assert_eq!(rows_used("one\ntwo\n", 80), 3);
    }

    #[tokio::test]
    async fn test_dropped_stream_writes_nothing_when_buffered() {
        let events = vec![TransportEvent::Connected, frame("data: Par\n"), dropped()];
        let (conversation, state, out) = replay(events, ReplyWriter::buffered(Vec::new())).await;

        assert_eq!(state, TurnState::Failed);
        assert_eq!(out, "");
        assert_eq!(conversation.transcript().last().unwrap().content, ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_dropped_stream_erases_live_partial() {
        let events = vec![TransportEvent::Connected, frame("data: Par\n"), dropped()];
        let (_, state, out) = replay(events, ReplyWriter::live(Vec::new(), 80)).await;

        assert_eq!(state, TurnState::Failed);
        assert_eq!(out, format!("Par{}", erase_sequence(1)));
    }

    #[tokio::test]
    async fn test_erase_climbs_back_over_wrapped_rows() {
        let events = vec![frame("data: abcdef\n"), dropped()];
        let (_, _, out) = replay(events, ReplyWriter::live(Vec::new(), 4)).await;

        assert_eq!(out, format!("abcdef{}", erase_sequence(2)));
    }

    #[tokio::test]
    async fn test_completed_reply_is_printed_whole() {
        let events = vec![
            TransportEvent::Connected,
            frame("data: Hel\n"),
            frame("data: lo!"),
            TransportEvent::End,
        ];
        let (_, state, live) = replay(events, ReplyWriter::live(Vec::new(), 80)).await;
        assert_eq!(state, TurnState::Completed);
        assert_eq!(live, "Hello!\n");

        let events = vec![frame("data: Hel\n"), frame("data: lo!\n"), TransportEvent::End];
        let (_, _, buffered) = replay(events, ReplyWriter::buffered(Vec::new())).await;
        assert_eq!(buffered, "Hello!\n");
    }

    #[tokio::test]
    async fn test_closed_channel_fails_the_turn() {
        let events = vec![TransportEvent::Connected, frame("data: Par\n")];
        let (conversation, state, out) = replay(events, ReplyWriter::buffered(Vec::new())).await;

        assert_eq!(state, TurnState::Failed);
        assert_eq!(out, "");
        assert_eq!(conversation.transcript().last().unwrap().content, ERROR_MESSAGE);
    }
}
