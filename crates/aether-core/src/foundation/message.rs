//! Platform-agnostic message shapes.
//!
//! Platform adapters normalize whatever their vendor sends into
//! [`InboundMessage`] before publishing, and accept [`OutboundMessage`] for
//! replies, so nothing past the adapter boundary knows which platform it
//! is talking to.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// A message received from a chat platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Platform-assigned message id.
    pub id: String,
    /// Name of the registered platform that received it.
    pub platform: String,
    /// Conversation the message belongs to.
    pub chat_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub text: String,
    /// Id of the message this one replies to.
    #[serde(default)]
    pub reply_to: Option<String>,
    pub timestamp: SystemTime,
}

impl InboundMessage {
    /// Creates an inbound message stamped with the current time.
    pub fn new(
        platform: impl Into<String>,
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            platform: platform.into(),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            sender_name: None,
            text: text.into(),
            reply_to: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn with_reply_to(mut self, id: impl Into<String>) -> Self {
        self.reply_to = Some(id.into());
        self
    }

    /// Builds a reply to this message in the same chat.
    pub fn reply(&self, text: impl Into<String>) -> OutboundMessage {
        OutboundMessage {
            chat_id: self.chat_id.clone(),
            text: text.into(),
            reply_to: Some(self.id.clone()),
        }
    }
}

/// A message to deliver to a chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: String,
    pub text: String,
    #[serde(default)]
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    pub fn new(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            reply_to: None,
        }
    }
}

/// Splits `text` into pieces of at most `max_chars` characters.
///
/// Breaks after the last newline inside each window when there is one, so
/// paragraphs survive platform length limits. Empty text yields nothing.
pub fn split_text(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut pieces = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let end = match rest.char_indices().nth(max_chars) {
            None => rest.len(),
            Some((limit, _)) => rest[..limit].rfind('\n').map_or(limit, |nl| nl + 1),
        };
        let (head, tail) = rest.split_at(end);
        pieces.push(head);
        rest = tail;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_text_prefers_newlines() {
        assert_eq!(split_text("abc\ndef", 5), vec!["abc\n", "def"]);
        assert_eq!(split_text("abcdefg", 3), vec!["abc", "def", "g"]);
        assert_eq!(split_text("short", 10), vec!["short"]);
        assert!(split_text("", 10).is_empty());
    }

    #[test]
    fn test_split_text_counts_chars() {
        assert_eq!(split_text("ééé", 2), vec!["éé", "é"]);
    }

    #[test]
    fn test_reply_targets_origin() {
        let inbound = InboundMessage::new("tg", "42", "7", "hi").with_id("m1");
        let reply = inbound.reply("hello");
        assert_eq!(reply.chat_id, "42");
        assert_eq!(reply.reply_to.as_deref(), Some("m1"));
        assert_eq!(reply.text, "hello");
    }

    #[test]
    fn test_inbound_serde_defaults() {
        let value = serde_json::json!({
            "id": "1",
            "platform": "discord",
            "chat_id": "c",
            "sender_id": "s",
            "text": "yo",
            "timestamp": {"secs_since_epoch": 0, "nanos_since_epoch": 0},
        });
        let msg: InboundMessage = serde_json::from_value(value).unwrap_or_else(|e| panic!("{e}"));
        assert!(msg.sender_name.is_none());
        assert!(msg.reply_to.is_none());
    }
}
