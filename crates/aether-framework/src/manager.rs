//! Plugin lifecycle management and the chat-intercept chain.
//!
//! [`PluginManager`] is the central owner of all plugins. It:
//!
//! - Keeps a catalog of [`PluginDescriptor`]s (link-time discovered ones plus
//!   explicitly registered ones) in registration order.
//! - Drives each plugin through its lifecycle:
//!
//! ```text
//! load()    : Unloaded ──► Loading ──► Active
//!                              └─────► Failed   (on_load error / timeout)
//! reload()  : Active ──► Loading ──► Active | Failed
//! unload()  : Active ──► Unloaded
//! ```
//!
//! - Owns every plugin's bus subscriptions. Subscriptions exist only while a
//!   plugin is `Active` and enabled; the old set is fully removed before a
//!   new unit initializes, and the new set is added only after it succeeds.
//! - Runs the intercept hooks of active, enabled plugins in registration
//!   order for every chat turn.
//!
//! Each plugin also has a dispatch gate. An intercept hook runs under its
//! read side; unload, reload, and disable hold the write side, so they wait
//! for hooks already running on the old unit, and hooks arriving meanwhile
//! wait for the swap and then see the new unit. No hook answers from a
//! torn-down unit.
//!
//! Mutations of one plugin are serialized by a per-plugin async lock, so two
//! concurrent reloads of the same plugin never interleave. Operations on
//! different plugins proceed independently.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = Arc::new(PluginManager::new(bus.clone()));
//! manager.discover();
//! manager.register(greeter::descriptor())?;
//! manager.load_all().await;
//! manager.reload("greeter").await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use aether_core::{BoxError, ChatRequest, EventBus, ProviderLookup, SubscriptionId, topics};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::{PluginError, PluginResult};
use crate::plugin::{BoxedPlugin, PluginContext, PluginDescriptor, discovered};

/// Default bound for `on_load`, `on_unload`, and intercept hooks.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of a plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    #[default]
    Unloaded,
    Loading,
    Active,
    Failed,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Loading => write!(f, "loading"),
            Self::Active => write!(f, "active"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot of one plugin for listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub enabled: bool,
    pub state: PluginState,
    pub subscriptions: usize,
    pub last_error: Option<String>,
}

/// A successful intercept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interception {
    /// Plugin that produced the response.
    pub plugin: String,
    pub content: String,
}

// =============================================================================
// PluginSlot (internal)
// =============================================================================

struct SlotState {
    descriptor: PluginDescriptor,
    instance: Option<BoxedPlugin>,
    state: PluginState,
    enabled: bool,
    subscriptions: Vec<SubscriptionId>,
    last_error: Option<String>,
}

struct PluginSlot {
    name: String,
    /// Serializes lifecycle operations on this plugin.
    op_lock: AsyncMutex<()>,
    /// Read-held by running intercept hooks, write-held while the unit is
    /// swapped out or excluded from dispatch.
    gate: AsyncRwLock<()>,
    inner: RwLock<SlotState>,
}

impl PluginSlot {
    fn info(&self) -> PluginInfo {
        let inner = self.inner.read();
        PluginInfo {
            name: self.name.clone(),
            version: inner.descriptor.metadata.version.clone(),
            description: inner.descriptor.metadata.description.clone(),
            author: inner.descriptor.metadata.author.clone(),
            enabled: inner.enabled,
            state: inner.state,
            subscriptions: inner.subscriptions.len(),
            last_error: inner.last_error.clone(),
        }
    }

    /// Returns the instance if it should take part in dispatch.
    fn dispatchable(&self) -> Option<BoxedPlugin> {
        let inner = self.inner.read();
        (inner.state == PluginState::Active && inner.enabled)
            .then(|| inner.instance.clone())
            .flatten()
    }
}

async fn run_hook<T, F>(timeout: Duration, hook: F) -> Result<T, String>
where
    F: std::future::Future<Output = Result<T, BoxError>>,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(hook).catch_unwind()).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(err))) => Err(err.to_string()),
        Ok(Err(_)) => Err("hook panicked".to_string()),
        Err(_) => Err(format!("Timeout after {} ms", timeout.as_millis())),
    }
}

// =============================================================================
// PluginManager
// =============================================================================

/// Central manager for plugin registration, lifecycle, and interception.
pub struct PluginManager {
    bus: EventBus,
    slots: RwLock<Vec<Arc<PluginSlot>>>,
    /// Per-plugin config sections, keyed by plugin name.
    configs: RwLock<HashMap<String, Value>>,
    /// Plugins registered in the disabled state.
    disabled: RwLock<HashSet<String>>,
    /// Handed to plugins through their load context.
    providers: RwLock<Option<Arc<dyn ProviderLookup>>>,
    hook_timeout: Duration,
}

impl PluginManager {
    /// Creates a manager publishing lifecycle events on `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            slots: RwLock::new(Vec::new()),
            configs: RwLock::new(HashMap::new()),
            disabled: RwLock::new(HashSet::new()),
            providers: RwLock::new(None),
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn hook_timeout(&self) -> Duration {
        self.hook_timeout
    }

    /// Replaces the per-plugin config sections used by subsequent loads.
    pub fn set_configs(&self, configs: HashMap<String, Value>) {
        *self.configs.write() = configs;
    }

    /// Gives subsequently loaded plugins access to `providers`.
    pub fn set_providers(&self, providers: Arc<dyn ProviderLookup>) {
        *self.providers.write() = Some(providers);
    }

    /// Sets which plugins start out disabled when registered.
    pub fn set_disabled(&self, names: impl IntoIterator<Item = String>) {
        *self.disabled.write() = names.into_iter().collect();
    }

    // ─── Catalog ─────────────────────────────────────────────────────────────

    /// Registers a descriptor in the `unloaded` state.
    pub fn register(&self, descriptor: PluginDescriptor) -> PluginResult<()> {
        if !descriptor.is_compatible() {
            warn!(
                plugin = %descriptor.name,
                descriptor_version = %descriptor.api_version_string(),
                host_version = %PluginDescriptor::host_version_string(),
                "Plugin API version mismatch, rejecting"
            );
            return Err(PluginError::Incompatible {
                plugin: descriptor.name.clone(),
                found: descriptor.api_version_string(),
                expected: PluginDescriptor::host_version_string(),
            });
        }

        let mut slots = self.slots.write();
        if slots.iter().any(|slot| slot.name == descriptor.name) {
            return Err(PluginError::AlreadyRegistered(descriptor.name));
        }

        let name = descriptor.name.clone();
        let enabled = !self.disabled.read().contains(&name);
        slots.push(Arc::new(PluginSlot {
            name: name.clone(),
            op_lock: AsyncMutex::new(()),
            gate: AsyncRwLock::new(()),
            inner: RwLock::new(SlotState {
                descriptor,
                instance: None,
                state: PluginState::Unloaded,
                enabled,
                subscriptions: Vec::new(),
                last_error: None,
            }),
        }));
        info!(plugin = %name, enabled, "Plugin registered");
        Ok(())
    }

    /// Registers every link-time submitted descriptor not yet in the catalog.
    /// Returns how many were added.
    pub fn discover(&self) -> usize {
        let mut added = 0;
        for descriptor in discovered() {
            let name = descriptor.name.clone();
            match self.register(descriptor) {
                Ok(()) => added += 1,
                Err(PluginError::AlreadyRegistered(_)) => {
                    debug!(plugin = %name, "Discovered plugin already registered");
                }
                Err(err) => warn!(plugin = %name, error = %err, "Skipping discovered plugin"),
            }
        }
        added
    }

    /// Swaps the descriptor used for the next load or reload of `name`.
    ///
    /// The running instance is untouched until then.
    pub async fn replace_descriptor(&self, descriptor: PluginDescriptor) -> PluginResult<()> {
        if !descriptor.is_compatible() {
            return Err(PluginError::Incompatible {
                plugin: descriptor.name.clone(),
                found: descriptor.api_version_string(),
                expected: PluginDescriptor::host_version_string(),
            });
        }
        let slot = self.slot(&descriptor.name)?;
        let _guard = slot.op_lock.lock().await;
        slot.inner.write().descriptor = descriptor;
        debug!(plugin = %slot.name, "Plugin descriptor replaced");
        Ok(())
    }

    /// Removes an unloaded plugin from the catalog, unloading it first if needed.
    pub async fn remove(&self, name: &str) -> PluginResult<()> {
        let slot = self.slot(name)?;
        {
            let _guard = slot.op_lock.lock().await;
            self.quiesce(&slot).await?;
        }
        self.slots.write().retain(|s| !Arc::ptr_eq(s, &slot));
        info!(plugin = %name, "Plugin removed");
        Ok(())
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    /// Lists plugins in registration order.
    pub fn list(&self) -> Vec<PluginInfo> {
        self.slots.read().iter().map(|slot| slot.info()).collect()
    }

    pub fn info(&self, name: &str) -> Option<PluginInfo> {
        self.slot(name).ok().map(|slot| slot.info())
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.slot(name).ok().map(|slot| slot.inner.read().state)
    }

    pub fn plugin_count(&self) -> usize {
        self.slots.read().len()
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .read()
            .iter()
            .filter(|slot| slot.inner.read().state == PluginState::Active)
            .count()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Loads `name`. A no-op for an already active plugin.
    pub async fn load(&self, name: &str) -> PluginResult<()> {
        let slot = self.slot(name)?;
        let _guard = slot.op_lock.lock().await;
        if slot.inner.read().state == PluginState::Active {
            return Ok(());
        }
        self.activate(&slot).await
    }

    /// Unloads `name`: removes its subscriptions and runs its teardown hook.
    pub async fn unload(&self, name: &str) -> PluginResult<()> {
        let slot = self.slot(name)?;
        let _guard = slot.op_lock.lock().await;
        self.quiesce(&slot).await
    }

    /// Replaces the running unit of `name` with a fresh instance.
    ///
    /// The old unit's subscriptions are removed and its teardown hook runs
    /// before the new unit initializes. If either step fails the plugin ends
    /// up `failed` with no subscriptions.
    ///
    /// Waits for intercept hooks running on the old unit. Hooks started
    /// during the reload run on the new unit once it is active.
    pub async fn reload(&self, name: &str) -> PluginResult<()> {
        let slot = self.slot(name)?;
        let _guard = slot.op_lock.lock().await;
        let _gate = slot.gate.write().await;
        let span = info_span!("plugin_reload", plugin = %name);
        async {
            if slot.inner.read().instance.is_some() {
                self.set_state(&slot, PluginState::Loading, None);
                self.quiesce_as(&slot, PluginState::Loading).await?;
            }
            self.activate(&slot).await?;
            info!("Plugin reloaded");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Re-subscribes a disabled plugin without re-initializing it.
    pub async fn enable(&self, name: &str) -> PluginResult<()> {
        let slot = self.slot(name)?;
        let _guard = slot.op_lock.lock().await;
        let instance = {
            let mut inner = slot.inner.write();
            if inner.enabled {
                return Ok(());
            }
            inner.enabled = true;
            (inner.state == PluginState::Active)
                .then(|| inner.instance.clone())
                .flatten()
        };
        if let Some(instance) = instance {
            let ids = self.subscribe(&slot.name, instance);
            slot.inner.write().subscriptions = ids;
        }
        self.disabled.write().remove(name);
        self.publish_state(&slot);
        info!(plugin = %name, "Plugin enabled");
        Ok(())
    }

    /// Removes a plugin's subscriptions and excludes it from interception.
    /// The loaded unit is kept.
    pub async fn disable(&self, name: &str) -> PluginResult<()> {
        let slot = self.slot(name)?;
        let _guard = slot.op_lock.lock().await;
        let _gate = slot.gate.write().await;
        let ids = {
            let mut inner = slot.inner.write();
            if !inner.enabled {
                return Ok(());
            }
            inner.enabled = false;
            std::mem::take(&mut inner.subscriptions)
        };
        self.unsubscribe(ids).await;
        self.disabled.write().insert(name.to_string());
        self.publish_state(&slot);
        info!(plugin = %name, "Plugin disabled");
        Ok(())
    }

    /// Loads every unloaded plugin in registration order. Returns the number
    /// of failures; each is logged.
    pub async fn load_all(&self) -> usize {
        let slots: Vec<_> = self.slots.read().clone();
        let mut failures = 0;
        for slot in slots {
            let _guard = slot.op_lock.lock().await;
            if slot.inner.read().state != PluginState::Unloaded {
                continue;
            }
            if let Err(err) = self.activate(&slot).await {
                error!(plugin = %slot.name, error = %err, "Plugin failed to load");
                failures += 1;
            }
        }
        failures
    }

    /// Unloads every plugin in reverse registration order.
    pub async fn unload_all(&self) {
        let slots: Vec<_> = self.slots.read().clone();
        for slot in slots.iter().rev() {
            let _guard = slot.op_lock.lock().await;
            if let Err(err) = self.quiesce(slot).await {
                warn!(plugin = %slot.name, error = %err, "Plugin teardown failed");
            }
        }
    }

    // ─── Interception ────────────────────────────────────────────────────────

    /// Runs intercept hooks in registration order until one answers.
    ///
    /// Hook errors, panics, and timeouts are logged and count as "did not
    /// intercept".
    pub async fn intercept(&self, request: &ChatRequest) -> Option<Interception> {
        let slots: Vec<Arc<PluginSlot>> = self.slots.read().clone();

        for slot in slots {
            let _gate = slot.gate.read().await;
            let Some(plugin) = slot.dispatchable() else {
                continue;
            };
            match run_hook(self.hook_timeout, plugin.intercept(request)).await {
                Ok(Some(content)) => {
                    debug!(plugin = %slot.name, "Chat intercepted");
                    return Some(Interception {
                        plugin: slot.name.clone(),
                        content,
                    });
                }
                Ok(None) => {}
                Err(reason) => {
                    warn!(plugin = %slot.name, error = %reason, "Intercept hook failed, continuing");
                }
            }
        }
        None
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    fn slot(&self, name: &str) -> PluginResult<Arc<PluginSlot>> {
        self.slots
            .read()
            .iter()
            .find(|slot| slot.name == name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    fn plugin_config(&self, name: &str) -> Arc<Value> {
        Arc::new(
            self.configs
                .read()
                .get(name)
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::default())),
        )
    }

    /// Instantiates and initializes a fresh unit. Caller holds the op lock.
    async fn activate(&self, slot: &PluginSlot) -> PluginResult<()> {
        if slot.inner.read().state != PluginState::Loading {
            self.set_state(slot, PluginState::Loading, None);
        }

        let instance = slot.inner.read().descriptor.instantiate();
        let mut ctx = PluginContext::new(
            slot.name.clone(),
            self.plugin_config(&slot.name),
            self.bus.clone(),
        );
        if let Some(providers) = self.providers.read().clone() {
            ctx = ctx.with_providers(providers);
        }

        if let Err(reason) = run_hook(self.hook_timeout, instance.on_load(&ctx)).await {
            error!(plugin = %slot.name, error = %reason, "Plugin initialization failed");
            slot.inner.write().instance = None;
            self.set_state(slot, PluginState::Failed, Some(reason.clone()));
            return Err(PluginError::InitFailure {
                plugin: slot.name.clone(),
                reason,
            });
        }

        let enabled = slot.inner.read().enabled;
        let ids = if enabled {
            self.subscribe(&slot.name, Arc::clone(&instance))
        } else {
            Vec::new()
        };
        {
            let mut inner = slot.inner.write();
            inner.instance = Some(instance);
            inner.subscriptions = ids;
        }
        self.set_state(slot, PluginState::Active, None);
        info!(plugin = %slot.name, enabled, "Plugin loaded and active");
        Ok(())
    }

    /// Tears the unit down for good. Caller holds the op lock.
    async fn quiesce(&self, slot: &PluginSlot) -> PluginResult<()> {
        let _gate = slot.gate.write().await;
        self.quiesce_as(slot, PluginState::Unloaded).await
    }

    /// Unsubscribes and tears down the current unit, leaving `next` on
    /// success. Caller holds the op lock and the write side of the gate.
    async fn quiesce_as(&self, slot: &PluginSlot, next: PluginState) -> PluginResult<()> {
        let (instance, ids) = {
            let mut inner = slot.inner.write();
            (inner.instance.take(), std::mem::take(&mut inner.subscriptions))
        };
        self.unsubscribe(ids).await;

        let Some(instance) = instance else {
            let state = slot.inner.read().state;
            if matches!(state, PluginState::Active | PluginState::Failed) {
                self.set_state(slot, next, None);
            }
            return Ok(());
        };

        match run_hook(self.hook_timeout, instance.on_unload()).await {
            Ok(()) => {
                if next != PluginState::Loading {
                    self.set_state(slot, next, None);
                }
                debug!(plugin = %slot.name, "Plugin unloaded");
                Ok(())
            }
            Err(reason) => {
                error!(plugin = %slot.name, error = %reason, "Plugin teardown failed");
                self.set_state(slot, PluginState::Failed, Some(reason.clone()));
                Err(PluginError::TeardownFailure {
                    plugin: slot.name.clone(),
                    reason,
                })
            }
        }
    }

    fn subscribe(&self, name: &str, instance: BoxedPlugin) -> Vec<SubscriptionId> {
        instance
            .subscriptions()
            .into_iter()
            .map(|sub| self.bus.subscribe(sub.pattern, name, sub.handler))
            .collect()
    }

    async fn unsubscribe(&self, ids: Vec<SubscriptionId>) {
        for id in ids {
            self.bus.unsubscribe(id).await;
        }
    }

    fn set_state(&self, slot: &PluginSlot, state: PluginState, error: Option<String>) {
        {
            let mut inner = slot.inner.write();
            inner.state = state;
            match state {
                PluginState::Failed => inner.last_error = error,
                PluginState::Active => inner.last_error = None,
                _ => {}
            }
        }
        self.publish_state(slot);
    }

    fn publish_state(&self, slot: &PluginSlot) {
        let (state, enabled, error) = {
            let inner = slot.inner.read();
            (inner.state, inner.enabled, inner.last_error.clone())
        };
        self.bus.publish(
            topics::PLUGIN_STATE_CHANGED,
            json!({
                "plugin": slot.name,
                "state": state,
                "enabled": enabled,
                "error": error,
            }),
            "plugin_manager",
        );
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.plugin_count())
            .field("hook_timeout", &self.hook_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Plugin, PluginMetadata, Subscription};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct Counters {
        loads: AtomicUsize,
        unloads: AtomicUsize,
        events: AtomicUsize,
    }

    struct Counted {
        counters: Arc<Counters>,
        reply: Option<&'static str>,
        fail_load: bool,
    }

    #[async_trait]
    impl Plugin for Counted {
        async fn on_load(&self, _ctx: &PluginContext) -> Result<(), BoxError> {
            self.counters.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_load {
                return Err("init exploded".into());
            }
            Ok(())
        }

        async fn on_unload(&self) -> Result<(), BoxError> {
            self.counters.unloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn subscriptions(self: Arc<Self>) -> Vec<Subscription> {
            let counters = Arc::clone(&self.counters);
            vec![Subscription::on("ping", move |_| {
                let counters = Arc::clone(&counters);
                async move {
                    counters.events.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })]
        }

        async fn intercept(&self, request: &ChatRequest) -> Result<Option<String>, BoxError> {
            Ok(self
                .reply
                .filter(|_| request.message == "ping")
                .map(str::to_string))
        }
    }

    fn counted(name: &str, counters: &Arc<Counters>, reply: Option<&'static str>) -> PluginDescriptor {
        let counters = Arc::clone(counters);
        PluginDescriptor::new(name, PluginMetadata::new("1.0.0"), move || {
            Arc::new(Counted {
                counters: Arc::clone(&counters),
                reply,
                fail_load: false,
            })
        })
    }

    fn failing(name: &str, counters: &Arc<Counters>) -> PluginDescriptor {
        let counters = Arc::clone(counters);
        PluginDescriptor::new(name, PluginMetadata::new("2.0.0"), move || {
            Arc::new(Counted {
                counters: Arc::clone(&counters),
                reply: None,
                fail_load: true,
            })
        })
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_incompatible() {
        let manager = PluginManager::new(EventBus::new());
        let counters = Arc::new(Counters::default());
        assert_ok!(manager.register(counted("a", &counters, None)));
        assert_eq!(
            manager.register(counted("a", &counters, None)),
            Err(PluginError::AlreadyRegistered("a".into()))
        );
        let incompatible = counted("b", &counters, None).with_api_version(0x0002_0000);
        assert!(matches!(
            manager.register(incompatible),
            Err(PluginError::Incompatible { .. })
        ));
        assert_eq!(manager.plugin_count(), 1);
        assert_eq!(manager.state("a"), Some(PluginState::Unloaded));
    }

    #[tokio::test]
    async fn test_load_subscribes_after_init() {
        let bus = EventBus::new();
        let manager = PluginManager::new(bus.clone());
        let counters = Arc::new(Counters::default());
        manager.register(counted("a", &counters, None)).ok();

        assert_ok!(manager.load("a").await);
        assert_ok!(manager.load("a").await);
        assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state("a"), Some(PluginState::Active));
        assert_eq!(bus.subscriptions_of("a").len(), 1);

        bus.publish("ping", Value::Null, "test");
        bus.flush().await;
        assert_eq!(counters.events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_init_leaves_no_subscriptions() {
        let bus = EventBus::new();
        let manager = PluginManager::new(bus.clone());
        let counters = Arc::new(Counters::default());
        manager.register(failing("bad", &counters)).ok();

        let result = manager.load("bad").await;
        assert!(matches!(result, Err(PluginError::InitFailure { .. })));
        assert_eq!(manager.state("bad"), Some(PluginState::Failed));
        assert!(bus.subscriptions_of("bad").is_empty());
        let info = manager.info("bad");
        assert!(info.and_then(|i| i.last_error).is_some_and(|e| e.contains("init exploded")));
    }

    #[tokio::test]
    async fn test_reload_swaps_unit() {
        let bus = EventBus::new();
        let manager = PluginManager::new(bus.clone());
        let old = Arc::new(Counters::default());
        let new = Arc::new(Counters::default());
        manager.register(counted("p", &old, None)).ok();
        manager.load("p").await.ok();

        assert_ok!(manager.replace_descriptor(counted("p", &new, None)).await);
        assert_ok!(manager.reload("p").await);
        assert_eq!(old.unloads.load(Ordering::SeqCst), 1);
        assert_eq!(new.loads.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriptions_of("p").len(), 1);

        bus.publish("ping", Value::Null, "test");
        bus.flush().await;
        assert_eq!(old.events.load(Ordering::SeqCst), 0);
        assert_eq!(new.events.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reload_failure_never_falls_back() {
        let bus = EventBus::new();
        let manager = PluginManager::new(bus.clone());
        let counters = Arc::new(Counters::default());
        manager.register(counted("p", &counters, Some("pong"))).ok();
        manager.load("p").await.ok();

        manager.replace_descriptor(failing("p", &counters)).await.ok();
        assert_err!(manager.reload("p").await);
        assert_eq!(manager.state("p"), Some(PluginState::Failed));
        assert!(bus.subscriptions_of("p").is_empty());
        assert_eq!(manager.intercept(&ChatRequest::new("ping")).await, None);

        manager.replace_descriptor(counted("p", &counters, Some("pong"))).await.ok();
        assert_ok!(manager.reload("p").await);
        assert_eq!(manager.state("p"), Some(PluginState::Active));
    }

    #[tokio::test]
    async fn test_disable_enable_skips_reinit() {
        let bus = EventBus::new();
        let manager = PluginManager::new(bus.clone());
        let counters = Arc::new(Counters::default());
        manager.register(counted("p", &counters, Some("pong"))).ok();
        manager.load("p").await.ok();
        let before: Vec<_> = bus
            .subscriptions_of("p")
            .into_iter()
            .map(|s| s.pattern)
            .collect();

        assert_ok!(manager.disable("p").await);
        assert!(bus.subscriptions_of("p").is_empty());
        assert_eq!(manager.intercept(&ChatRequest::new("ping")).await, None);
        assert_eq!(manager.info("p").map(|i| i.enabled), Some(false));

        assert_ok!(manager.enable("p").await);
        let after: Vec<_> = bus
            .subscriptions_of("p")
            .into_iter()
            .map(|s| s.pattern)
            .collect();
        assert_eq!(before, after);
        assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
        assert!(manager.intercept(&ChatRequest::new("ping")).await.is_some());
    }

    #[tokio::test]
    async fn test_intercept_runs_in_registration_order() {
        let manager = PluginManager::new(EventBus::new());
        let counters = Arc::new(Counters::default());
        manager.register(counted("silent", &counters, None)).ok();
        manager.register(counted("first", &counters, Some("one"))).ok();
        manager.register(counted("second", &counters, Some("two"))).ok();
        assert_eq!(manager.load_all().await, 0);

        let hit = manager.intercept(&ChatRequest::new("ping")).await;
        assert_eq!(
            hit,
            Some(Interception {
                plugin: "first".into(),
                content: "one".into()
            })
        );
        assert_eq!(manager.intercept(&ChatRequest::new("other")).await, None);
    }

    #[tokio::test]
    async fn test_hook_timeout_is_init_failure() {
        struct Stuck;

        #[async_trait]
        impl Plugin for Stuck {
            async fn on_load(&self, _ctx: &PluginContext) -> Result<(), BoxError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }

        let manager =
            PluginManager::new(EventBus::new()).with_hook_timeout(Duration::from_millis(20));
        manager
            .register(PluginDescriptor::new("stuck", PluginMetadata::new("0.1.0"), || {
                Arc::new(Stuck)
            }))
            .ok();

        match manager.load("stuck").await {
            Err(PluginError::InitFailure { reason, .. }) => assert!(reason.starts_with("Timeout")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_reloads_serialize() {
        let bus = EventBus::new();
        let manager = Arc::new(PluginManager::new(bus.clone()));
        let counters = Arc::new(Counters::default());
        manager.register(counted("p", &counters, None)).ok();
        manager.load("p").await.ok();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.reload("p").await })
            })
            .collect();
        for task in tasks {
            assert!(matches!(task.await, Ok(Ok(()))));
        }

        assert_eq!(counters.loads.load(Ordering::SeqCst), 9);
        assert_eq!(counters.unloads.load(Ordering::SeqCst), 8);
        assert_eq!(bus.subscriptions_of("p").len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_by_config_loads_without_subscriptions() {
        let bus = EventBus::new();
        let manager = PluginManager::new(bus.clone());
        manager.set_disabled(["p".to_string()]);
        let counters = Arc::new(Counters::default());
        manager.register(counted("p", &counters, Some("pong"))).ok();
        manager.load_all().await;

        assert_eq!(manager.state("p"), Some(PluginState::Active));
        assert!(bus.subscriptions_of("p").is_empty());
        assert_ok!(manager.enable("p").await);
        assert_eq!(bus.subscriptions_of("p").len(), 1);
    }

    #[cfg(feature = "builtin-plugins")]
    #[tokio::test]
    async fn test_discover_finds_builtin_echo() {
        let manager = PluginManager::new(EventBus::new());
        assert!(manager.discover() >= 1);
        assert_eq!(manager.discover(), 0);
        assert_ok!(manager.load("echo").await);
        let hit = manager.intercept(&ChatRequest::new("/ping")).await;
        assert_eq!(hit.map(|h| h.content).as_deref(), Some("Pong!"));
    }

    // ─── Swap atomicity ──────────────────────────────────────────────────────

    /// A unit that records what it did, tagged with its version.
    struct Versioned {
        tag: &'static str,
        hook_delay: Duration,
        load_delay: Duration,
        torn_down: std::sync::atomic::AtomicBool,
        journal: Arc<parking_lot::Mutex<Vec<String>>>,
        /// `(tag, event n, torn down at handler entry)`.
        handled: Arc<parking_lot::Mutex<Vec<(&'static str, u64, bool)>>>,
    }

    #[async_trait]
    impl Plugin for Versioned {
        async fn on_load(&self, _ctx: &PluginContext) -> Result<(), BoxError> {
            tokio::time::sleep(self.load_delay).await;
            self.journal.lock().push(format!("load:{}", self.tag));
            Ok(())
        }

        async fn on_unload(&self) -> Result<(), BoxError> {
            tokio::time::sleep(self.load_delay).await;
            self.torn_down.store(true, Ordering::SeqCst);
            self.journal.lock().push(format!("unload:{}", self.tag));
            Ok(())
        }

        fn subscriptions(self: Arc<Self>) -> Vec<Subscription> {
            vec![Subscription::on("tick", move |event| {
                let unit = Arc::clone(&self);
                async move {
                    let torn = unit.torn_down.load(Ordering::SeqCst);
                    let n = event.payload()["n"].as_u64().unwrap_or_default();
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    unit.handled.lock().push((unit.tag, n, torn));
                    Ok(())
                }
            })]
        }

        async fn intercept(&self, _request: &ChatRequest) -> Result<Option<String>, BoxError> {
            tokio::time::sleep(self.hook_delay).await;
            let stale = if self.torn_down.load(Ordering::SeqCst) { " (torn down)" } else { "" };
            self.journal.lock().push(format!("answer:{}{stale}", self.tag));
            Ok(Some(self.tag.to_string()))
        }
    }

    type Journal = Arc<parking_lot::Mutex<Vec<String>>>;
    type Handled = Arc<parking_lot::Mutex<Vec<(&'static str, u64, bool)>>>;

    fn versioned(
        tag: &'static str,
        hook_delay: Duration,
        load_delay: Duration,
        journal: &Journal,
        handled: &Handled,
    ) -> PluginDescriptor {
        let journal = Arc::clone(journal);
        let handled = Arc::clone(handled);
        PluginDescriptor::new("greeter", PluginMetadata::new("1.0.0"), move || {
            Arc::new(Versioned {
                tag,
                hook_delay,
                load_delay,
                torn_down: std::sync::atomic::AtomicBool::new(false),
                journal: Arc::clone(&journal),
                handled: Arc::clone(&handled),
            })
        })
    }

    #[tokio::test]
    async fn test_reload_waits_for_running_intercept() {
        let manager = Arc::new(PluginManager::new(EventBus::new()));
        let journal = Journal::default();
        let handled = Handled::default();
        let slow = Duration::from_millis(200);
        let quick = Duration::from_millis(30);
        manager
            .register(versioned("old", slow, Duration::ZERO, &journal, &handled))
            .ok();
        assert_ok!(manager.load("greeter").await);
        journal.lock().clear();

        // In flight on the old unit when the reload starts.
        let early = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.intercept(&ChatRequest::new("hi")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_ok!(
            manager
                .replace_descriptor(versioned("new", Duration::ZERO, quick, &journal, &handled))
                .await
        );
        let reload = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.reload("greeter").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Arrives while the reload is pending.
        let late = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.intercept(&ChatRequest::new("hi")).await }
        });

        assert_ok!(assert_ok!(reload.await));
        let early = assert_ok!(early.await).map(|hit| hit.content);
        let late = assert_ok!(late.await).map(|hit| hit.content);

        assert_eq!(early.as_deref(), Some("old"));
        assert_eq!(late.as_deref(), Some("new"));
        assert_eq!(
            *journal.lock(),
            vec!["answer:old", "unload:old", "load:new", "answer:new"]
        );
    }

    #[tokio::test]
    async fn test_events_during_reload_reach_one_live_unit() {
        let bus = EventBus::new();
        let manager = Arc::new(PluginManager::new(bus.clone()));
        let journal = Journal::default();
        let handled = Handled::default();
        let pause = Duration::from_millis(20);
        manager
            .register(versioned("old", Duration::ZERO, pause, &journal, &handled))
            .ok();
        assert_ok!(manager.load("greeter").await);

        let publisher = tokio::spawn({
            let bus = bus.clone();
            async move {
                for n in 0..150u64 {
                    bus.publish("tick", json!({ "n": n }), "test");
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_ok!(
            manager
                .replace_descriptor(versioned("new", Duration::ZERO, pause, &journal, &handled))
                .await
        );
        assert_ok!(manager.reload("greeter").await);
        assert_ok!(publisher.await);
        bus.flush().await;

        let handled = handled.lock().clone();
        assert!(handled.iter().all(|(_, _, torn)| !torn), "handled by a torn-down unit");

        let mut seen: Vec<u64> = handled.iter().map(|(_, n, _)| *n).collect();
        let total = seen.len();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), total, "an event was handled twice");

        let last_old = handled.iter().filter(|h| h.0 == "old").map(|h| h.1).max();
        let first_new = handled.iter().filter(|h| h.0 == "new").map(|h| h.1).min();
        match (last_old, first_new) {
            (Some(old), Some(new)) => assert!(old < new),
            other => panic!("both units should have served events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unload_clears_failed_state() {
        let manager = PluginManager::new(EventBus::new());
        let counters = Arc::new(Counters::default());
        manager.register(failing("bad", &counters)).ok();
        assert_err!(manager.load("bad").await);
        assert_eq!(manager.state("bad"), Some(PluginState::Failed));

        assert_ok!(manager.unload("bad").await);
        assert_eq!(manager.state("bad"), Some(PluginState::Unloaded));
        assert_eq!(counters.unloads.load(Ordering::SeqCst), 0);

        assert_ok!(manager.replace_descriptor(counted("bad", &counters, None)).await);
        assert_ok!(manager.load("bad").await);
        assert_eq!(manager.state("bad"), Some(PluginState::Active));
    }
}
