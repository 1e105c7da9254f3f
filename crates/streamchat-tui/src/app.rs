use std::io;
use std::time::{Duration, Instant};

use streamchat_core::{ChatClient, ChatError, Conversation, SubmitError, TransportEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Shown in the footer when a turn fails
pub const FAILURE_NOTICE: &str = "Something went wrong. Please try again.";

const NOTICE_TTL: Duration = Duration::from_secs(3);

/// Transient footer message
#[derive(Debug, Clone)]
pub struct Notice {
    pub text: String,
    pub is_error: bool,
    pub shown_at: Instant,
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub struct App {
    pub should_quit: bool,

    // Chat state
    pub conversation: Conversation,
    pub client: ChatClient,
    pub profile_image: Option<String>,

    // Input state
    pub input: String,
    pub input_cursor: usize, // cursor position in input, in chars

    // Transcript view state
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub follow_tail: bool,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation
    pub notice: Option<Notice>,

    // In-flight turn
    pub turn_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    turn_task: Option<JoinHandle<()>>,
}

impl App {
    pub fn new(conversation: Conversation, client: ChatClient, profile_image: Option<String>) -> Self {
        Self {
            should_quit: false,
            conversation,
            client,
            profile_image,
            input: String::new(),
            input_cursor: 0,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            follow_tail: true,
            animation_frame: 0,
            notice: None,
            turn_rx: None,
            turn_task: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.conversation.is_loading()
    }

    /// Send the input as a new turn and start streaming the reply.
    pub fn submit(&mut self) {
        let request = match self.conversation.submit(&self.input) {
            Ok(request) => request,
            Err(SubmitError::Empty) => return,
            Err(SubmitError::Busy) => {
                self.set_notice("Still waiting for the current reply (Esc to stop)", false);
                return;
            }
        };

        self.input.clear();
        self.input_cursor = 0;
        self.notice = None;

        let (tx, rx) = mpsc::unbounded_channel();
        self.turn_task = Some(self.client.spawn_turn(request, tx));
        self.turn_rx = Some(rx);

        // Scroll to bottom so "Thinking..." is visible
        self.follow_tail = true;
        self.scroll_chat_to_bottom();
    }

    pub fn on_transport(&mut self, event: TransportEvent) {
        let failed = matches!(event, TransportEvent::Failed(_));
        self.conversation.handle(event);
        if failed {
            self.set_notice(FAILURE_NOTICE, true);
        }
        if !self.is_loading() {
            self.turn_task = None;
            self.turn_rx = None;
        }
        if self.follow_tail {
            self.scroll_chat_to_bottom();
        }
    }

    /// The transport task went away without reporting how the turn ended.
    pub fn on_transport_closed(&mut self) {
        self.turn_rx = None;
        if self.is_loading() {
            let err = io::Error::other("transport task ended without a result");
            self.on_transport(TransportEvent::Failed(ChatError::from(err)));
        }
    }

    /// Stop the in-flight turn, keeping whatever has streamed in.
    pub fn abandon_turn(&mut self) {
        if !self.is_loading() {
            return;
        }
        if let Some(task) = self.turn_task.take() {
            task.abort();
        }
        self.turn_rx = None;
        self.conversation.abandon();
        self.set_notice("Reply stopped", false);
        debug!("turn abandoned from the keyboard");
    }

    pub fn set_notice(&mut self, text: &str, is_error: bool) {
        self.notice = Some(Notice {
            text: text.to_string(),
            is_error,
            shown_at: Instant::now(),
        });
    }

    /// Tick animation frame and expire notices (called by Tick event)
    pub fn tick(&mut self) {
        if self.is_loading() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
        if self
            .notice
            .as_ref()
            .is_some_and(|n| n.shown_at.elapsed() >= NOTICE_TTL)
        {
            self.notice = None;
        }
    }

    // Input editing; the input is disabled while a reply streams

    pub fn insert_char(&mut self, c: char) {
        if self.is_loading() {
            return;
        }
        let byte_pos = char_to_byte_index(&self.input, self.input_cursor);
        self.input.insert(byte_pos, c);
        self.input_cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.is_loading() || self.input_cursor == 0 {
            return;
        }
        self.input_cursor -= 1;
        let byte_pos = char_to_byte_index(&self.input, self.input_cursor);
        self.input.remove(byte_pos);
    }

    pub fn delete(&mut self) {
        if self.is_loading() {
            return;
        }
        if self.input_cursor < self.input.chars().count() {
            let byte_pos = char_to_byte_index(&self.input, self.input_cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn cursor_left(&mut self) {
        self.input_cursor = self.input_cursor.saturating_sub(1);
    }

    pub fn cursor_right(&mut self) {
        let char_count = self.input.chars().count();
        self.input_cursor = (self.input_cursor + 1).min(char_count);
    }

    pub fn cursor_home(&mut self) {
        self.input_cursor = 0;
    }

    pub fn cursor_end(&mut self) {
        self.input_cursor = self.input.chars().count();
    }

    pub fn clear_input(&mut self) {
        if self.is_loading() {
            return;
        }
        self.input.clear();
        self.input_cursor = 0;
    }

    // Transcript scrolling

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.follow_tail = false;
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let max = self.max_chat_scroll();
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(max);
        self.follow_tail = self.chat_scroll >= max;
    }

    pub fn page_size(&self) -> u16 {
        (self.visible_chat_height() / 2).max(1)
    }

    /// Scroll chat to bottom so the newest content is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        self.chat_scroll = self.max_chat_scroll();
    }

    fn visible_chat_height(&self) -> u16 {
        if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        }
    }

    fn max_chat_scroll(&self) -> u16 {
        self.total_chat_lines()
            .saturating_sub(self.visible_chat_height())
    }

    /// Rendered height of the transcript, including the "Thinking..." row
    pub fn total_chat_lines(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: usize = 0;
        for msg in self.conversation.transcript().messages() {
            total_lines += 1; // Role line ("You:" or "AI:")
            // Calculate wrapped lines for each line of content
            for line in msg.content.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                total_lines += (char_count.max(1) - 1) / wrap_width + 1;
            }
            total_lines += 1; // Blank line after message
        }

        if self.awaiting_first_fragment() {
            total_lines += 2; // "AI:" + "Thinking..."
        }
        // Paragraph scroll offsets are u16
        u16::try_from(total_lines).unwrap_or(u16::MAX)
    }

    /// Loading, but no reply text has arrived yet
    pub fn awaiting_first_fragment(&self) -> bool {
        self.is_loading() && self.conversation.transcript().open_message().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use streamchat_core::{ChatRole, TurnState, ERROR_MESSAGE};

    fn frame(text: &str) -> TransportEvent {
        TransportEvent::Frame(text.as_bytes().to_vec().into())
    }

    fn app() -> App {
        App::new(
            Conversation::default(),
            ChatClient::new("http://127.0.0.1:9/chat"),
            None,
        )
    }

    fn start_turn(app: &mut App, text: &str) {
        app.conversation.submit(text).unwrap();
        app.conversation.handle(TransportEvent::Connected);
    }

    #[test]
    fn test_char_to_byte_index() {
        assert_eq!(char_to_byte_index("héllo", 0), 0);
        assert_eq!(char_to_byte_index("héllo", 2), 3);
        assert_eq!(char_to_byte_index("héllo", 10), 6);
    }

    #[test]
    fn test_editing_multibyte_input() {
        let mut app = app();
        for c in "hé!".chars() {
            app.insert_char(c);
        }
        app.cursor_left();
        app.backspace();
        assert_eq!(app.input, "h!");
        assert_eq!(app.input_cursor, 1);

        app.cursor_home();
        app.delete();
        assert_eq!(app.input, "!");
        app.cursor_end();
        assert_eq!(app.input_cursor, 1);
    }

    #[test]
    fn test_input_disabled_while_loading() {
        let mut app = app();
        start_turn(&mut app, "Hi");

        app.insert_char('x');
        app.clear_input();
        assert_eq!(app.input, "");
        assert!(app.awaiting_first_fragment());
    }

    #[test]
    fn test_failure_raises_notice_and_clears_loading() {
        let mut app = app();
        start_turn(&mut app, "Hi");
        app.on_transport(frame("data: Par\n"));
        assert!(!app.awaiting_first_fragment());

        app.on_transport(TransportEvent::Failed(ChatError::MissingBody));

        assert!(!app.is_loading());
        assert_eq!(app.conversation.state(), TurnState::Failed);
        assert_eq!(app.notice.as_ref().map(|n| n.text.as_str()), Some(FAILURE_NOTICE));
        let last = app.conversation.transcript().last().unwrap();
        assert_eq!((last.role, last.content.as_str()), (ChatRole::Assistant, ERROR_MESSAGE));
    }

    #[test]
    fn test_closed_transport_never_leaves_loading_stuck() {
        let mut app = app();
        start_turn(&mut app, "Hi");

        app.on_transport_closed();

        assert!(!app.is_loading());
        assert_eq!(app.conversation.transcript().last().unwrap().content, ERROR_MESSAGE);
    }

    #[test]
    fn test_abandon_keeps_partial_reply() {
        let mut app = app();
        start_turn(&mut app, "Hi");
        app.on_transport(frame("data: Hal\n"));

        app.abandon_turn();

        assert!(!app.is_loading());
        assert_eq!(app.conversation.transcript().last().unwrap().content, "Hal");
    }

    #[test]
    fn test_chat_line_count_wraps_by_width() {
        let mut app = app();
        app.chat_width = 10;
        start_turn(&mut app, "0123456789abcde");
        // "You:" + 2 wrapped rows + blank, then "AI:" + "Thinking..."
        assert_eq!(app.total_chat_lines(), 6);

        app.on_transport(frame("data: ok\n"));
        app.on_transport(TransportEvent::End);
        // "You:" + 2 + blank, "AI:" + 1 + blank
        assert_eq!(app.total_chat_lines(), 7);
    }

    #[test]
    fn test_chat_line_count_saturates_on_huge_transcript() {
        let mut app = app();
        app.chat_width = 10;
        app.chat_height = 20;
        start_turn(&mut app, &"line\n".repeat(70_000));

        assert_eq!(app.total_chat_lines(), u16::MAX);
        app.scroll_chat_to_bottom();
        assert_eq!(app.chat_scroll, u16::MAX - 20);
    }

    #[test]
    fn test_scrolling_up_stops_following_tail() {
        let mut app = app();
        app.chat_height = 2;
        start_turn(&mut app, "one\ntwo\nthree");
        app.scroll_chat_to_bottom();
        let bottom = app.chat_scroll;
        assert!(bottom > 0);

        app.scroll_up(1);
        assert!(!app.follow_tail);
        app.scroll_down(5);
        assert_eq!(app.chat_scroll, bottom);
        assert!(app.follow_tail);
    }
}
