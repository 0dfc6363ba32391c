//! # Aether Core
//!
//! The core engine of the Aether chatbot runtime.
//!
//! ## Architecture Layers
//!
//! ### Foundation Layer
//!
//! Core data types:
//! - **Errors**: normalized provider taxonomy ([`ChatError`], [`ErrorKind`]) and [`PlatformError`]
//! - **Events**: immutable [`Event`]s addressed by topic, matched by [`TopicPattern`]
//! - **Messages**: platform-agnostic [`InboundMessage`] / [`OutboundMessage`]
//! - **Chat**: [`ChatRequest`], [`ChatResponse`], and streamed [`Chunk`]s
//!
//! ### Event Bus
//!
//! [`EventBus`] fans events out to subscribers through bounded per-subscriber
//! queues. Publishing never blocks; a full queue sheds its oldest event.
//!
//! ### Integration Layer
//!
//! - **Providers**: the [`Provider`] capability interface over LLM services
//! - **Platforms**: the [`Platform`] capability interface over chat services
//!
//! ### Wire
//!
//! [`wire`] encodes chunk streams as `data: ` frames and decodes them back.
//!
//! ## Data Flow
//!
//! ```text
//! ┌──────────┐ inbound_message ┌──────────┐      ┌──────────────┐      ┌──────────┐
//! │ Platform │────────────────▶│ EventBus │─────▶│ Orchestrator │─────▶│ Provider │
//! └──────────┘                 └──────────┘      └──────────────┘      └──────────┘
//!                                   ▲   response_chunk / complete / failed   │
//!                                   └────────────────────────────────────────┘
//! ```

pub mod bus;
pub mod foundation;
pub mod integration;
pub mod wire;

pub use bus::{
    DEFAULT_QUEUE_CAPACITY, EventBus, EventHandler, SubscriptionId, SubscriptionInfo, handler_fn,
};

pub use foundation::{
    BoxError, ChatError, ChatMessage, ChatRequest, ChatResponse, ChatResult, Chunk, Completion,
    ErrorKind, Event, InboundMessage, OutboundMessage, PlatformError, PlatformResult, Role,
    TopicPattern, Usage, split_text, topics,
};

pub use integration::{
    BoxedPlatform, BoxedProvider, ChunkStream, ConfigurablePlatform, ConfigurableProvider,
    ConnectionState, Platform, PlatformContext, PlatformStatus, Provider, ProviderLookup,
    ProviderRequest, ProviderSpec, RetryPolicy,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::bus::{EventBus, EventHandler, SubscriptionId, handler_fn};
    pub use super::foundation::*;
    pub use super::integration::{
        ConnectionState, Platform, PlatformContext, Provider, ProviderRequest,
    };
}
