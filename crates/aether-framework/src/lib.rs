//! # Aether Framework
//!
//! Plugin subsystem for the Aether runtime.
//!
//! This layer provides:
//! - The [`Plugin`] capability interface (subscriptions + chat intercept)
//! - [`PluginDescriptor`]s and link-time discovery via [`submit_plugin!`]
//! - [`PluginManager`], which loads, unloads, hot-reloads, enables, and
//!   disables plugins and runs the intercept chain
//! - Builtin `echo` and `chat` plugins (with the `builtin-plugins` feature)

pub mod error;
pub mod manager;
pub mod plugin;

#[doc(hidden)]
pub use linkme;

pub use error::{PluginError, PluginResult};
pub use manager::{DEFAULT_HOOK_TIMEOUT, Interception, PluginInfo, PluginManager, PluginState};
pub use plugin::{
    AETHER_PLUGIN_API_VERSION, BoxedPlugin, Plugin, PluginContext, PluginDescriptor,
    PluginMetadata, Subscription,
};
