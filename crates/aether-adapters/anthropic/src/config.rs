//! Configuration for the Anthropic provider.

use std::time::Duration;

use aether_core::RetryPolicy;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";

/// Value of the `anthropic-version` header.
pub const API_VERSION: &str = "2023-06-01";

/// Anthropic provider settings, read from the entry's `settings` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig {
    /// Output budget when the request does not set one. The API requires it.
    pub max_tokens: u32,

    /// Retries for rate-limited or overloaded responses, before any
    /// content has been received.
    pub max_retries: u32,

    pub retry_initial_ms: u64,

    pub retry_max_ms: u64,

    pub connect_timeout_secs: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            max_retries: 2,
            retry_initial_ms: 500,
            retry_max_ms: 8_000,
            connect_timeout_secs: 10,
        }
    }
}

impl AnthropicConfig {
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
