//! Line-oriented event-stream codec.
//!
//! Streaming chat responses travel as `data: ` frames separated by a blank
//! line:
//!
//! ```text
//! data: Hel
//!
//! data: lo
//!
//! data: [DONE]
//!
//! ```
//!
//! A failed stream ends with `data: [ERROR] <message>` instead. Text
//! fragments are escaped so they always fit on one line and never read as a
//! terminal marker: `\` becomes `\\`, LF becomes `\n`, CR becomes `\r`, and a
//! fragment that would otherwise equal a marker gets a leading `\`.
//!
//! [`LineBuffer`] is also what provider adapters use to split vendor SSE
//! bodies, since a line may span several network reads.

use std::borrow::Cow;

use crate::foundation::chat::Chunk;

pub const DONE_MARKER: &str = "[DONE]";
pub const ERROR_MARKER: &str = "[ERROR]";

const DATA_PREFIX: &str = "data: ";

fn reads_as_marker(text: &str) -> bool {
    text == DONE_MARKER
        || text == ERROR_MARKER
        || text
            .strip_prefix(ERROR_MARKER)
            .is_some_and(|rest| rest.starts_with(' '))
}

/// Escapes a text fragment for a single `data: ` line.
pub fn escape(text: &str) -> Cow<'_, str> {
    let needs_escape = text.contains(['\\', '\n', '\r']);
    let escaped = if needs_escape {
        let mut out = String::with_capacity(text.len() + 8);
        for c in text.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                c => out.push(c),
            }
        }
        Cow::Owned(out)
    } else {
        Cow::Borrowed(text)
    };

    if reads_as_marker(&escaped) {
        Cow::Owned(format!("\\{escaped}"))
    } else {
        escaped
    }
}

/// Reverses [`escape`].
pub fn unescape(text: &str) -> Cow<'_, str> {
    if !text.contains('\\') {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Cow::Owned(out)
}

/// Encodes one chunk as a complete frame, trailing blank line included.
pub fn encode_chunk(chunk: &Chunk) -> String {
    match chunk {
        Chunk::Text(text) => encode_text(text),
        Chunk::Done(_) => encode_done(),
        Chunk::Error(err) => encode_error(&err.to_string()),
    }
}

pub fn encode_text(text: &str) -> String {
    format!("{DATA_PREFIX}{}\n\n", escape(text))
}

pub fn encode_done() -> String {
    format!("{DATA_PREFIX}{DONE_MARKER}\n\n")
}

pub fn encode_error(message: &str) -> String {
    let message = message.replace('\\', "\\\\").replace('\n', "\\n").replace('\r', "\\r");
    format!("{DATA_PREFIX}{ERROR_MARKER} {message}\n\n")
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Done,
    Error(String),
}

impl Frame {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Text(_))
    }
}

/// Returns the value of an SSE `data:` field, or `None` for other lines.
pub fn data_field(line: &str) -> Option<&str> {
    let value = line.strip_prefix("data:")?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

/// Splits a byte stream into lines, buffering partial lines across reads.
///
/// Bytes are kept until a full line arrives, so multi-byte characters split
/// across reads decode correctly. Trailing `\r` is stripped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes and returns every line they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Returns the residual partial line at end of input, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Incremental decoder for the chat event stream.
#[derive(Debug, Default)]
pub struct Decoder {
    lines: LineBuffer,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes and returns the frames they complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.lines
            .push(bytes)
            .iter()
            .filter_map(|line| Self::decode_line(line))
            .collect()
    }

    /// Decodes any final unterminated line.
    pub fn finish(&mut self) -> Option<Frame> {
        self.lines
            .finish()
            .and_then(|line| Self::decode_line(&line))
    }

    fn decode_line(line: &str) -> Option<Frame> {
        let value = line.strip_prefix(DATA_PREFIX)?;
        if value == DONE_MARKER {
            return Some(Frame::Done);
        }
        if value == ERROR_MARKER {
            return Some(Frame::Error(String::new()));
        }
        if let Some(message) = value
            .strip_prefix(ERROR_MARKER)
            .and_then(|rest| rest.strip_prefix(' '))
        {
            return Some(Frame::Error(unescape(message).into_owned()));
        }
        Some(Frame::Text(unescape(value).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::error::ChatError;

    #[test]
    fn test_encode_scenario() {
        let frames: String = [Chunk::text("Hel"), Chunk::text("lo"), Chunk::done()]
            .iter()
            .map(encode_chunk)
            .collect();
        assert_eq!(frames, "data: Hel\n\ndata: lo\n\ndata: [DONE]\n\n");
    }

    #[test]
    fn test_encode_error() {
        assert_eq!(
            encode_chunk(&Chunk::Error(ChatError::Timeout)),
            "data: [ERROR] Timeout\n\n"
        );
    }

    #[test]
    fn test_escape_newlines_and_markers() {
        assert_eq!(escape("a\nb"), "a\\nb");
        assert_eq!(escape("c:\\dir"), "c:\\\\dir");
        assert_eq!(escape("[DONE]"), "\\[DONE]");
        assert_eq!(escape("[ERROR] nope"), "\\[ERROR] nope");
        assert_eq!(escape("not [DONE]"), "not [DONE]");
        assert_eq!(escape("[DONE]!"), "[DONE]!");
        assert!(matches!(escape("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_fragment_survives_wire() {
        let fragments = ["line1\nline2", "[DONE]", "[ERROR] x", "back\\slash", "\\[DONE]", "crlf\r\n"];
        let mut decoder = Decoder::new();
        for fragment in fragments {
            let frames = decoder.feed(encode_text(fragment).as_bytes());
            assert_eq!(frames, vec![Frame::Text(fragment.to_string())]);
        }
    }

    #[test]
    fn test_decoder_buffers_partial_lines() {
        let wire = "data: Hel\n\ndata: lo\n\ndata: [DONE]\n\n";
        let mut decoder = Decoder::new();
        let mut frames = Vec::new();
        for byte in wire.as_bytes() {
            frames.extend(decoder.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(
            frames,
            vec![
                Frame::Text("Hel".into()),
                Frame::Text("lo".into()),
                Frame::Done
            ]
        );
    }

    #[test]
    fn test_decoder_split_multibyte() {
        let wire = "data: héllo\n\n".as_bytes();
        let mut decoder = Decoder::new();
        let mut frames = decoder.feed(&wire[..8]);
        frames.extend(decoder.feed(&wire[8..]));
        assert_eq!(frames, vec![Frame::Text("héllo".into())]);
    }

    #[test]
    fn test_decoder_error_and_residual() {
        let mut decoder = Decoder::new();
        assert_eq!(decoder.feed(b"data: [ERROR] Timeout"), vec![]);
        assert_eq!(decoder.finish(), Some(Frame::Error("Timeout".into())));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_ignores_other_fields() {
        let mut decoder = Decoder::new();
        let frames = decoder.feed(b": keepalive\nevent: ping\r\ndata: x\r\n\r\n");
        assert_eq!(frames, vec![Frame::Text("x".into())]);
    }

    #[test]
    fn test_data_field() {
        assert_eq!(data_field("data: {}"), Some("{}"));
        assert_eq!(data_field("data:{}"), Some("{}"));
        assert_eq!(data_field("event: x"), None);
    }
}
