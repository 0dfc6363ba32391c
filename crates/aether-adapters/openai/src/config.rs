//! Configuration for the OpenAI provider.
//!
//! Read from the `settings` table of a `type = "openai"` provider entry.
//! Common fields (`default_model`, `models`, `credentials_ref`, `base_url`)
//! live on the entry itself.
//!
//! # Example Configuration
//!
//! ```toml
//! [[providers]]
//! name = "openai"
//! type = "openai"
//! credentials_ref = "OPENAI_API_KEY"
//!
//! [providers.settings]
//! organization = "org-123"
//! max_retries = 2
//! retry_initial_ms = 500
//! ```

use std::time::Duration;

use aether_core::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Base URL used when the entry does not set one.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Model used when the entry does not set `default_model`.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// Sent as the `OpenAI-Organization` header.
    pub organization: Option<String>,

    /// Retries for rate-limited or unavailable responses, before any
    /// content has been received.
    pub max_retries: u32,

    pub retry_initial_ms: u64,

    pub retry_max_ms: u64,

    /// TCP/TLS connect deadline in seconds.
    pub connect_timeout_secs: u64,

    /// Ask the server to append token usage to the stream.
    pub include_usage: bool,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            organization: None,
            max_retries: 2,
            retry_initial_ms: 500,
            retry_max_ms: 8_000,
            connect_timeout_secs: 10,
            include_usage: true,
        }
    }
}

impl OpenAiConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.retry_initial_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
            multiplier: 2.0,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
