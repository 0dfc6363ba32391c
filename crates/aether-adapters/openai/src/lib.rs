//! OpenAI-compatible provider for the Aether chatbot runtime.
//!
//! Talks to any server that implements the `/chat/completions` endpoint:
//! OpenAI itself, Azure-style gateways, or local servers such as Ollama
//! and vLLM when `base_url` points at them.
//!
//! # Streaming
//!
//! Streaming calls read the server-sent event body incrementally and yield
//! one [`Chunk::Text`](aether_core::Chunk) per content delta. The stream
//! ends with `Done` on `data: [DONE]` (or on a clean close after a
//! `finish_reason`), and with `Error` for anything else.
//!
//! # Errors
//!
//! HTTP failures are normalized with [`ChatError::from_status`], using the
//! vendor's own error message as detail. Rate limits and transient server
//! errors are retried with backoff, but only before the response body
//! starts; once a chunk has been delivered a failure ends the stream.
//!
//! # Registration
//!
//! ```ignore
//! runtime.register_provider_type::<OpenAiProvider>();
//! ```
//!
//! ```toml
//! [[providers]]
//! name = "openai"
//! type = "openai"
//! default_model = "gpt-4o-mini"
//! credentials_ref = "OPENAI_API_KEY"
//! ```
//!
//! [`ChatError::from_status`]: aether_core::ChatError::from_status

pub mod config;
mod error;
mod model;
pub mod provider;

pub use config::OpenAiConfig;
pub use provider::OpenAiProvider;
