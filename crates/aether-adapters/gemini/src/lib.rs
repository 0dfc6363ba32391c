//! Google Gemini provider for the Aether chatbot runtime.
//!
//! Calls `models/{model}:generateContent`, or
//! `models/{model}:streamGenerateContent?alt=sse` for streaming, with the
//! key in the `x-goog-api-key` header.
//!
//! System messages become the request's `systemInstruction`; assistant
//! turns are sent with the `model` role. A streamed body has no end marker:
//! it completes when it closes after a candidate reported a
//! `finishReason`.
//!
//! # Registration
//!
//! ```ignore
//! runtime.register_provider_type::<GeminiProvider>();
//! ```
//!
//! ```toml
//! [[providers]]
//! name = "gemini"
//! type = "gemini"
//! default_model = "gemini-pro"
//! credentials_ref = "GEMINI_API_KEY"
//! ```

pub mod config;
mod error;
mod model;
pub mod provider;

pub use config::GeminiConfig;
pub use provider::GeminiProvider;
