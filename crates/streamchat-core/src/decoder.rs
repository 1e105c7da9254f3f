//! Line framing for the streamed response body.
//!
//! Transport frames have arbitrary boundaries: one event line can span
//! several reads and one read can carry several lines. Bytes are held until a
//! `\n` arrives, and only whole lines are decoded, so a UTF-8 sequence split
//! across frames is reassembled before it is turned into text.

use bytes::BytesMut;

/// Buffers raw frames and yields complete lines in arrival order.
///
/// One decoder belongs to one turn.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: BytesMut,
    // Bytes of `buf` already known to contain no newline.
    scanned: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame and return every line it completed.
    pub fn feed(&mut self, frame: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(frame);

        let mut lines = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            let line = self.buf.split_to(pos + 1);
            lines.push(decode_line(&line[..pos]));
            self.scanned = 0;
        }
        self.scanned = self.buf.len();
        lines
    }

    /// Flush the unterminated remainder at end of stream.
    ///
    /// Returns `None` when nothing but an optional `\r` is left.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split();
        let line = decode_line(&rest);
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }

    /// Bytes held back waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
