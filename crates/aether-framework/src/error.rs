//! Error types for the plugin subsystem.

use thiserror::Error;

/// Errors that can occur in plugin management.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// No plugin with this name is in the catalog.
    #[error("plugin '{0}' not found")]
    NotFound(String),

    /// A plugin with this name is already in the catalog.
    #[error("plugin '{0}' is already registered")]
    AlreadyRegistered(String),

    /// `on_load` returned an error, panicked, or timed out.
    #[error("plugin '{plugin}' failed to initialize: {reason}")]
    InitFailure {
        /// The plugin name.
        plugin: String,
        /// Reason for failure.
        reason: String,
    },

    /// `on_unload` returned an error, panicked, or timed out.
    #[error("plugin '{plugin}' failed to tear down: {reason}")]
    TeardownFailure {
        /// The plugin name.
        plugin: String,
        /// Reason for failure.
        reason: String,
    },

    /// The descriptor targets an incompatible plugin API.
    #[error("plugin '{plugin}' targets API {found}, host provides {expected}")]
    Incompatible {
        plugin: String,
        found: String,
        expected: String,
    },
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
