//! Foundation layer - Core data types.
//!
//! - Error taxonomy for providers and platforms
//! - Events and topic patterns
//! - Normalized platform messages
//! - Chat requests, responses, and streamed chunks

pub mod chat;
pub mod error;
pub mod event;
pub mod message;

pub use chat::{ChatMessage, ChatRequest, ChatResponse, Chunk, Completion, Role, Usage};
pub use error::{BoxError, ChatError, ChatResult, ErrorKind, PlatformError, PlatformResult};
pub use event::{Event, TopicPattern, topics};
pub use message::{InboundMessage, OutboundMessage, split_text};
