use std::future::Future;
use std::sync::Arc;

use aether_core::{
    BoxError, ChatRequest, Event, EventBus, EventHandler, ProviderLookup, TopicPattern, handler_fn,
};
use async_trait::async_trait;
use serde_json::Value;

// ─── PluginContext ────────────────────────────────────────────────────────────

/// Context passed to a plugin's `on_load` hook.
///
/// Provides the plugin's configuration section (`plugins.settings.<name>`,
/// or an empty object when absent), the shared event bus for plugins
/// that publish their own events, and, when the host wires one in, access to
/// the registered providers.
///
/// ```rust,ignore
/// #[derive(serde::Deserialize, Default)]
/// #[serde(default)]
/// struct GreeterConfig { greeting: String }
///
/// async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
///     let cfg: GreeterConfig = ctx.get_config()?;
///     *self.greeting.write() = cfg.greeting;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct PluginContext {
    name: String,
    config: Arc<Value>,
    bus: EventBus,
    providers: Option<Arc<dyn ProviderLookup>>,
}

impl PluginContext {
    pub fn new(name: impl Into<String>, config: Arc<Value>, bus: EventBus) -> Self {
        Self {
            name: name.into(),
            config,
            bus,
            providers: None,
        }
    }

    pub fn with_providers(mut self, providers: Arc<dyn ProviderLookup>) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Registered providers. `None` when the host runs plugins without any.
    pub fn providers(&self) -> Option<&Arc<dyn ProviderLookup>> {
        self.providers.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn raw_config(&self) -> &Value {
        &self.config
    }

    /// Deserialise the plugin config section into `T`.
    ///
    /// Use `#[serde(default)]` on the struct to make all fields optional.
    pub fn get_config<T>(&self) -> serde_json::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        T::deserialize(self.config.as_ref())
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("providers", &self.providers.is_some())
            .finish_non_exhaustive()
    }
}

// ─── Subscription ─────────────────────────────────────────────────────────────

/// An event subscription declared by a plugin.
pub struct Subscription {
    pub pattern: TopicPattern,
    pub handler: EventHandler,
}

impl Subscription {
    pub fn new(pattern: impl Into<TopicPattern>, handler: EventHandler) -> Self {
        Self {
            pattern: pattern.into(),
            handler,
        }
    }

    /// Subscribes an async closure.
    pub fn on<F, Fut>(pattern: impl Into<TopicPattern>, f: F) -> Self
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::new(pattern, handler_fn(f))
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

// ─── Plugin ───────────────────────────────────────────────────────────────────

/// A live plugin instance.
///
/// Every capability is optional: a plugin may subscribe to events, intercept
/// chat turns, both, or neither. Instances are created by a
/// [`PluginDescriptor`](super::PluginDescriptor) and are never mutated in
/// place by the manager; a reload builds a fresh instance.
///
/// # Concurrency
///
/// Hooks may run concurrently with each other and with event handlers. Use
/// interior mutability for state.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Initializes the instance. An error leaves the plugin `failed` with no
    /// subscriptions.
    async fn on_load(&self, _ctx: &PluginContext) -> Result<(), BoxError> {
        Ok(())
    }

    /// Releases resources before the instance is dropped.
    async fn on_unload(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Event subscriptions, established after a successful load and on every
    /// enable. Called once per (re)subscription.
    fn subscriptions(self: Arc<Self>) -> Vec<Subscription> {
        Vec::new()
    }

    /// Chat-intercept hook run before provider dispatch.
    ///
    /// Returning `Some(content)` answers the request directly and skips the
    /// provider. Errors are logged and treated as `None`.
    async fn intercept(&self, _request: &ChatRequest) -> Result<Option<String>, BoxError> {
        Ok(None)
    }
}

/// A shared plugin trait object.
pub type BoxedPlugin = Arc<dyn Plugin>;
