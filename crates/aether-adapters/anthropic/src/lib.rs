//! Anthropic messages provider for the Aether chatbot runtime.
//!
//! Speaks the `/v1/messages` API. System turns of the request are joined
//! into the top-level `system` field; the remaining turns are sent as the
//! conversation.
//!
//! Streaming follows the typed event sequence of the API:
//! `message_start` carries input token usage, each `content_block_delta`
//! with a `text_delta` becomes a text chunk, `message_delta` carries the
//! stop reason and output usage, and `message_stop` ends the stream. An
//! `error` event is mapped by its error type.
//!
//! ```toml
//! [[providers]]
//! name = "claude"
//! type = "anthropic"
//! credentials_ref = "ANTHROPIC_API_KEY"
//!
//! [providers.settings]
//! max_tokens = 2048
//! ```

pub mod config;
mod error;
mod model;
pub mod provider;

pub use config::AnthropicConfig;
pub use provider::AnthropicProvider;
