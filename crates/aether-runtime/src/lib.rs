//! Aether Runtime - the runtime context of the Aether chatbot runtime.
//!
//! This crate provides:
//! - Layered configuration (`AetherConfig`, `ConfigLoader`)
//! - Logging setup (`LoggingBuilder`)
//! - Provider and platform registries
//! - The chat orchestrator (intercept chain, provider dispatch, streaming)
//! - Runtime lifecycle and config reload (`AetherRuntime`)
//! - A control surface for admin front ends (`Control`)
//!
//! ```ignore
//! use aether_runtime::AetherRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = AetherRuntime::new();
//!
//!     // Adapter types referenced by `type = "..."` in aether.toml
//!     runtime.register_provider_type::<OpenAiProvider>();
//!     runtime.register_platform_type::<TelegramPlatform>();
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Streaming Chat
//!
//! ```ignore
//! let mut frames = runtime.control().chat_frames(ChatRequest::new("hi").streaming());
//! while let Some(frame) = frames.next().await {
//!     socket.write_all(frame.as_bytes()).await?;
//! }
//! ```

pub mod chat;
pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod registry;
pub mod runtime;

// Re-exports
pub use chat::{ChatOrchestrator, ChatStream, OrchestratorSettings};
pub use config::{AetherConfig, ConfigError, ConfigLoader, ConfigResult};
pub use control::{Control, RuntimeStatus};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use registry::{PlatformInfo, PlatformRegistry, ProviderInfo, ProviderRegistry};
pub use runtime::{AetherRuntime, ReloadSummary, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;

/// Logging macros for plugin and adapter code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
