//! Integration layer - External system interfaces.
//!
//! - Provider capability interface for LLM services
//! - Platform capability interface and connection lifecycle
//! - Retry policy shared by both

pub mod platform;
pub mod provider;
pub mod retry;

pub use platform::{
    BoxedPlatform, ConfigurablePlatform, ConnectionState, DEFAULT_CONNECT_TIMEOUT, Platform,
    PlatformContext, PlatformStatus, connect_with_retry,
};
pub use provider::{
    BoxedProvider, ChunkStream, ConfigurableProvider, Provider, ProviderLookup, ProviderRequest,
    ProviderSpec, collect_response, conform,
};
pub use retry::RetryPolicy;
