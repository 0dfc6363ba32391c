//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use aether_core::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AetherConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Backoff used for platform connects and provider retries.
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub platforms: Vec<PlatformConfig>,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    #[serde(default)]
    pub plugins: PluginsConfig,
}

impl AetherConfig {
    pub fn platform(&self, name: &str) -> Option<&PlatformConfig> {
        self.platforms.iter().find(|p| p.name == name)
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

// =============================================================================
// Runtime / Bus / Timeouts
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Provider used when a request names none.
    #[serde(default)]
    pub default_provider: Option<String>,

    /// Answer every `inbound_message` and send the reply back to its chat.
    #[serde(default = "default_true")]
    pub respond_to_inbound: bool,

    /// How long `stop()` waits for in-flight chat requests.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            respond_to_inbound: true,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl RuntimeConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-subscriber queue bound; beyond it the oldest pending event is dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    aether_core::DEFAULT_QUEUE_CAPACITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Bound on plugin `on_load`, `on_unload`, and intercept hooks.
    #[serde(default = "default_plugin_hook_ms")]
    pub plugin_hook_ms: u64,

    /// Deadline for a whole provider call, first byte to terminal chunk.
    #[serde(default = "default_provider_ms")]
    pub provider_ms: u64,

    /// Bound on a single platform connect attempt.
    #[serde(default = "default_platform_connect_ms")]
    pub platform_connect_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            plugin_hook_ms: default_plugin_hook_ms(),
            provider_ms: default_provider_ms(),
            platform_connect_ms: default_platform_connect_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn plugin_hook(&self) -> Duration {
        Duration::from_millis(self.plugin_hook_ms)
    }

    pub fn provider(&self) -> Duration {
        Duration::from_millis(self.provider_ms)
    }

    pub fn platform_connect(&self) -> Duration {
        Duration::from_millis(self.platform_connect_ms)
    }
}

fn default_plugin_hook_ms() -> u64 {
    5_000
}

fn default_provider_ms() -> u64 {
    120_000
}

fn default_platform_connect_ms() -> u64 {
    10_000
}

// =============================================================================
// Retry
// =============================================================================

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Converts to the core retry policy.
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.backoff_multiplier,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const ALL: [&'static str; 5] = ["trace", "debug", "info", "warn", "error"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `Full` without it.
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Rotation period for file output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, used when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Rotated files kept on disk; 0 keeps all.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Per-module levels, e.g. `aether_runtime = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            rotation: LogRotation::Never,
            max_files: default_max_files(),
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
            filters: HashMap::new(),
        }
    }
}

fn default_max_files() -> usize {
    5
}

// =============================================================================
// Platforms / Providers / Plugins
// =============================================================================

/// One chat platform connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Unique registry key.
    pub name: String,

    /// Adapter type, e.g. `"telegram"`.
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Adapter-specific settings, deserialized into the adapter's config type.
    #[serde(default)]
    pub settings: Map<String, Value>,
}

/// One LLM provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique registry key.
    pub name: String,

    /// Adapter type, e.g. `"openai"`.
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub default_model: Option<String>,

    /// Accepted models. Empty accepts any.
    #[serde(default)]
    pub models: Vec<String>,

    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub credentials_ref: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub settings: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Load every registered plugin at startup.
    #[serde(default = "default_true")]
    pub autoload: bool,

    /// Plugins that start out disabled.
    #[serde(default)]
    pub disabled: Vec<String>,

    /// Per-plugin config sections, keyed by plugin name.
    #[serde(default)]
    pub settings: HashMap<String, Value>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            autoload: true,
            disabled: Vec::new(),
            settings: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AetherConfig::default();
        assert!(config.runtime.respond_to_inbound);
        assert_eq!(config.bus.queue_capacity, aether_core::DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.timeouts.platform_connect(), Duration::from_secs(10));
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.plugins.autoload);
    }

    #[test]
    fn test_retry_to_policy() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 200,
            max_delay_ms: 800,
            backoff_multiplier: 2.0,
        };
        let policy = retry.to_policy();
        assert_eq!(policy.max_attempts(), 6);
        assert_eq!(policy.delay_for(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(5), Duration::from_millis(800));
    }

    #[test]
    fn test_entries_from_json() {
        let config: AetherConfig = serde_json::from_value(serde_json::json!({
            "platforms": [{ "name": "tg", "type": "telegram", "settings": { "token": "t" } }],
            "providers": [{ "name": "gpt", "type": "openai", "models": ["a", "b"] }],
        }))
        .unwrap_or_else(|e| panic!("config should parse: {e}"));

        let tg = config.platform("tg").unwrap_or_else(|| panic!("tg missing"));
        assert_eq!(tg.kind, "telegram");
        assert!(tg.enabled);
        assert_eq!(tg.settings.get("token"), Some(&Value::from("t")));

        let gpt = config.provider("gpt").unwrap_or_else(|| panic!("gpt missing"));
        assert_eq!(gpt.models, vec!["a", "b"]);
        assert_eq!(gpt.default_model, None);
    }
}
