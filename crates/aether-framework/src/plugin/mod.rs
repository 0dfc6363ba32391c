//! Plugin model.
//!
//! - [`Plugin`]: the capability interface every plugin implements
//! - [`PluginDescriptor`]: name, metadata, and a factory for fresh instances
//! - [`AETHER_PLUGINS`]: link-time discovery slice filled by [`submit_plugin!`](crate::submit_plugin)

#[cfg(feature = "builtin-plugins")]
pub mod builtin;
mod core;
mod descriptor;

pub use self::core::{BoxedPlugin, Plugin, PluginContext, Subscription};
pub use descriptor::{
    AETHER_PLUGIN_API_VERSION, AETHER_PLUGINS, PluginDescriptor, PluginMetadata, discovered,
};
