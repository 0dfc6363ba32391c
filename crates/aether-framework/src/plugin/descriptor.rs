//! Plugin descriptor: the factory handle that identifies and instantiates a
//! plugin, plus link-time discovery.

use std::sync::Arc;

use linkme::distributed_slice;
use serde::Serialize;

use super::core::Plugin;

// ─── API versioning ───────────────────────────────────────────────────────────

/// Current Aether plugin API version (1.0).
pub const AETHER_PLUGIN_API_VERSION: u32 = 0x0001_0000;

fn format_version(version: u32) -> String {
    format!("{}.{}", version >> 16, version & 0xFFFF)
}

// ─── PluginMetadata ───────────────────────────────────────────────────────────

/// Descriptive metadata attached to every plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginMetadata {
    pub version: String,
    pub description: String,
    pub author: String,
}

impl PluginMetadata {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }
}

// ─── PluginDescriptor ─────────────────────────────────────────────────────────

type Factory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Identifies a plugin and builds fresh instances of it.
///
/// Each call to [`instantiate`](Self::instantiate) produces a new code unit;
/// reloading a plugin always goes through it.
#[derive(Clone)]
pub struct PluginDescriptor {
    /// Plugin API version this descriptor was compiled against.
    pub api_version: u32,
    /// Unique plugin name (also the config lookup key).
    pub name: String,
    pub metadata: PluginMetadata,
    create: Factory,
}

impl PluginDescriptor {
    /// Creates a descriptor for the current API version.
    pub fn new<F>(name: impl Into<String>, metadata: PluginMetadata, create: F) -> Self
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        Self {
            api_version: AETHER_PLUGIN_API_VERSION,
            name: name.into(),
            metadata,
            create: Arc::new(create),
        }
    }

    pub fn with_api_version(mut self, api_version: u32) -> Self {
        self.api_version = api_version;
        self
    }

    /// Returns `true` if this descriptor's API version is compatible with the
    /// running framework.
    ///
    /// The major part must match exactly; the descriptor's minor part must be
    /// at most the host's minor part.
    pub fn is_compatible(&self) -> bool {
        let host_major = AETHER_PLUGIN_API_VERSION >> 16;
        let host_minor = AETHER_PLUGIN_API_VERSION & 0xFFFF;
        let desc_major = self.api_version >> 16;
        let desc_minor = self.api_version & 0xFFFF;
        desc_major == host_major && desc_minor <= host_minor
    }

    pub fn api_version_string(&self) -> String {
        format_version(self.api_version)
    }

    pub fn host_version_string() -> String {
        format_version(AETHER_PLUGIN_API_VERSION)
    }

    /// Builds a fresh plugin instance.
    #[inline]
    pub fn instantiate(&self) -> Arc<dyn Plugin> {
        (self.create)()
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("api_version", &self.api_version_string())
            .field("name", &self.name)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

// ─── Discovery ────────────────────────────────────────────────────────────────

/// Link-time plugin registry.
///
/// Plugin crates add a descriptor constructor with [`submit_plugin!`]; the
/// manager's [`discover`](crate::manager::PluginManager::discover) collects
/// every entry linked into the final binary.
#[distributed_slice]
pub static AETHER_PLUGINS: [fn() -> PluginDescriptor];

/// Returns every descriptor submitted with [`submit_plugin!`].
pub fn discovered() -> Vec<PluginDescriptor> {
    AETHER_PLUGINS.iter().map(|create| create()).collect()
}

/// Submits a descriptor constructor to link-time discovery.
///
/// ```rust,ignore
/// fn greeter() -> PluginDescriptor {
///     PluginDescriptor::new("greeter", PluginMetadata::new("1.0.0"), || Arc::new(Greeter))
/// }
/// aether_framework::submit_plugin!(GREETER = greeter);
/// ```
#[macro_export]
macro_rules! submit_plugin {
    ($ident:ident = $descriptor:path) => {
        #[$crate::linkme::distributed_slice($crate::plugin::AETHER_PLUGINS)]
        #[linkme(crate = $crate::linkme)]
        static $ident: fn() -> $crate::plugin::PluginDescriptor = $descriptor;
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Plugin for Noop {}

    fn noop() -> PluginDescriptor {
        PluginDescriptor::new("noop", PluginMetadata::new("0.1.0"), || Arc::new(Noop))
    }

    #[test]
    fn test_compatibility() {
        assert!(noop().is_compatible());
        assert!(noop().with_api_version(0x0001_0000).is_compatible());
        assert!(!noop().with_api_version(0x0001_0001).is_compatible());
        assert!(!noop().with_api_version(0x0002_0000).is_compatible());
        assert_eq!(noop().with_api_version(0x0002_0003).api_version_string(), "2.3");
    }

    #[test]
    fn test_instantiate_builds_fresh_units() {
        let desc = noop();
        let a = desc.instantiate();
        let b = desc.instantiate();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
