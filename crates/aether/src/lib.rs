//! # Aether
//!
//! A multi-platform chatbot runtime.
//!
//! ## Overview
//!
//! Aether connects chat platforms (Telegram, Discord, ...) to LLM providers
//! (OpenAI-compatible, Anthropic, Gemini, ...) through an event bus. Plugins
//! subscribe to bus topics and may answer chat requests before any provider
//! is called.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐ inbound_message ┌──────────┐      ┌──────────────┐      ┌───────────┐
//! │ Platforms │────────────────▶│ EventBus │─────▶│ Orchestrator │─────▶│ Providers │
//! └───────────┘                 └──────────┘      └──────────────┘      └───────────┘
//!       ▲                         │     ▲                │ intercept
//!       │ send_outbound           ▼     │ response_*     ▼
//!       └──────────────────── Plugins ──┘          PluginManager
//! ```
//!
//! - **Runtime**: configuration, registries, lifecycle, config reload
//! - **Platforms**: chat services, normalized to [`InboundMessage`](crate::core::InboundMessage)
//! - **Providers**: LLM services, streamed as [`Chunk`](crate::core::Chunk)s
//! - **Plugins**: isolated bus subscribers with an optional intercept hook
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use aether::prelude::*;
//! use aether::adapters::{openai::OpenAiProvider, telegram::TelegramPlatform};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = AetherRuntime::builder().build()?;
//!     runtime.register_provider_type::<OpenAiProvider>();
//!     runtime.register_platform_type::<TelegramPlatform>();
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `builtin-plugins`: the `echo` and `chat` plugins (default)
//! - `toml-config` / `yaml-config`: config file formats
//! - `json-log`: JSON log output
//! - `openai`, `anthropic`, `gemini`, `telegram`, `discord`: adapters
//! - `providers`, `platforms`, `full`: adapter bundles

pub use aether_core as core;
pub use aether_framework as framework;
pub use aether_runtime as runtime;

/// Adapters enabled through cargo features.
pub mod adapters {
    #[cfg(feature = "anthropic")]
    pub use aether_adapter_anthropic as anthropic;
    #[cfg(feature = "discord")]
    pub use aether_adapter_discord as discord;
    #[cfg(feature = "gemini")]
    pub use aether_adapter_gemini as gemini;
    #[cfg(feature = "openai")]
    pub use aether_adapter_openai as openai;
    #[cfg(feature = "telegram")]
    pub use aether_adapter_telegram as telegram;
}

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use aether::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use aether_runtime::{AetherConfig, AetherRuntime, Control, RuntimeBuilder};

    // Plugin system
    pub use aether_framework::{
        Plugin, PluginContext, PluginDescriptor, PluginMetadata, Subscription, submit_plugin,
    };

    // Bus and events
    pub use aether_core::{Event, EventBus, handler_fn, topics};

    // Chat
    pub use aether_core::{ChatError, ChatRequest, ChatResponse, ChatResult, Chunk};

    // Messages
    pub use aether_core::{InboundMessage, OutboundMessage};

    // Adapter traits for custom implementations
    pub use aether_core::{
        BoxError, ConfigurablePlatform, ConfigurableProvider, Platform, PlatformContext, Provider,
        ProviderRequest,
    };
}
