//! Events and topic patterns.
//!
//! An [`Event`] is immutable once published: the bus hands every subscriber
//! the same `Arc<Event>` and never touches the payload.

use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known topic names.
pub mod topics {
    /// A platform received a message (payload: `InboundMessage`).
    pub const INBOUND_MESSAGE: &str = "inbound_message";
    /// One streamed text fragment of a chat response.
    pub const RESPONSE_CHUNK: &str = "response_chunk";
    /// A chat request finished successfully.
    pub const RESPONSE_COMPLETE: &str = "response_complete";
    /// A chat request terminated with an error.
    pub const RESPONSE_FAILED: &str = "response_failed";
    /// A platform gave up connecting.
    pub const PLATFORM_ERROR: &str = "platform_error";
    pub const PLATFORM_STATE_CHANGED: &str = "platform_state_changed";
    pub const PLUGIN_STATE_CHANGED: &str = "plugin_state_changed";
    pub const ENGINE_STARTED: &str = "engine_started";
    pub const ENGINE_STOPPING: &str = "engine_stopping";
}

/// A published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    id: String,
    topic: String,
    payload: Value,
    timestamp: SystemTime,
    source_id: String,
}

impl Event {
    /// Creates a new event stamped with the current time.
    pub fn new(topic: impl Into<String>, payload: Value, source_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            topic: topic.into(),
            payload,
            timestamp: SystemTime::now(),
            source_id: source_id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Deserializes the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }
}

/// A subscription pattern over topic names.
///
/// Topics are dot-separated. A pattern whose last segment is `*` matches
/// exactly one further segment: `chat.*` matches `chat.reply` but neither
/// `chat` nor `chat.reply.sent`. Any other pattern matches literally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPattern {
    /// Matches one topic exactly.
    Exact(String),
    /// Matches `<prefix>.<segment>`, or any single segment if the prefix is empty.
    Wildcard(String),
}

impl TopicPattern {
    /// Parses a pattern string.
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            Self::Wildcard(String::new())
        } else if let Some(prefix) = pattern.strip_suffix(".*") {
            Self::Wildcard(prefix.to_string())
        } else {
            Self::Exact(pattern.to_string())
        }
    }

    /// Returns true if `topic` matches this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Exact(name) => name == topic,
            Self::Wildcard(prefix) if prefix.is_empty() => {
                !topic.is_empty() && !topic.contains('.')
            }
            Self::Wildcard(prefix) => topic
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('.'))
                .is_some_and(|segment| !segment.is_empty() && !segment.contains('.')),
        }
    }
}

impl From<&str> for TopicPattern {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}

impl From<String> for TopicPattern {
    fn from(pattern: String) -> Self {
        Self::parse(&pattern)
    }
}

impl std::fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(name) => f.write_str(name),
            Self::Wildcard(prefix) if prefix.is_empty() => f.write_str("*"),
            Self::Wildcard(prefix) => write!(f, "{prefix}.*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_pattern() {
        let pattern = TopicPattern::parse("inbound_message");
        assert!(pattern.matches("inbound_message"));
        assert!(!pattern.matches("inbound_message.x"));
        assert!(!pattern.matches("response_chunk"));
    }

    #[test]
    fn test_trailing_wildcard() {
        let pattern = TopicPattern::parse("chat.*");
        assert!(pattern.matches("chat.reply"));
        assert!(!pattern.matches("chat"));
        assert!(!pattern.matches("chat."));
        assert!(!pattern.matches("chat.reply.sent"));
        assert!(!pattern.matches("chatter.reply"));
        assert_eq!(pattern.to_string(), "chat.*");
    }

    #[test]
    fn test_lone_wildcard() {
        let pattern = TopicPattern::parse("*");
        assert!(pattern.matches("inbound_message"));
        assert!(!pattern.matches("chat.reply"));
        assert!(!pattern.matches(""));
    }

    #[test]
    fn test_inner_star_is_literal() {
        let pattern = TopicPattern::parse("a.*.b");
        assert!(pattern.matches("a.*.b"));
        assert!(!pattern.matches("a.x.b"));
    }

    #[test]
    fn test_event_payload_as() {
        let event = Event::new("t", serde_json::json!({"n": 3}), "test");
        #[derive(Deserialize)]
        struct P {
            n: u32,
        }
        let p: P = event.payload_as().unwrap_or(P { n: 0 });
        assert_eq!(p.n, 3);
        assert_eq!(event.topic(), "t");
        assert_eq!(event.source_id(), "test");
        assert!(!event.id().is_empty());
    }
}
