//! Configuration for the Gemini provider.
//!
//! Read from the `settings` table of a `type = "gemini"` provider entry.
//!
//! ```toml
//! [providers.settings]
//! max_output_tokens = 2048
//! max_retries = 1
//! ```

use std::time::Duration;

use aether_core::RetryPolicy;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_MODEL: &str = "gemini-pro";

/// Gemini provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// Output cap used when a request sets no `max_tokens`.
    pub max_output_tokens: Option<u32>,

    /// Retries for rate-limited or unavailable responses, before any
    /// content has been received.
    pub max_retries: u32,

    pub retry_initial_ms: u64,

    pub retry_max_ms: u64,

    pub connect_timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: None,
            max_retries: 2,
            retry_initial_ms: 500,
            retry_max_ms: 8_000,
            connect_timeout_secs: 10,
        }
    }
}

impl GeminiConfig {
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
