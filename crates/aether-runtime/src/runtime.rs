//! Runtime context and lifecycle.
//!
//! [`AetherRuntime`] owns the event bus, the three registries, and the chat
//! orchestrator. It builds providers and platforms from configuration
//! through type factories, drives startup and graceful shutdown, and applies
//! configuration reloads without a restart.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use aether_runtime::AetherRuntime;
//!
//! // Auto-loads aether.toml from the current directory
//! let runtime = AetherRuntime::new();
//! runtime.register_provider_type::<OpenAiProvider>();
//! runtime.register_platform_type::<TelegramPlatform>();
//! runtime.run().await?;
//!
//! // Custom configuration path
//! let runtime = AetherRuntime::builder()
//!     .config_file("config/aether.toml")
//!     .profile("production")
//!     .build()?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use aether_core::{
    BoxError, BoxedPlatform, BoxedProvider, ConfigurablePlatform, ConfigurableProvider, EventBus,
    ProviderLookup, ProviderSpec, topics,
};
use aether_framework::{PluginDescriptor, PluginManager};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::chat::{ChatOrchestrator, OrchestratorSettings};
use crate::config::{
    AetherConfig, ConfigError, ConfigLoader, ConfigResult, PlatformConfig, ProviderConfig,
    validate_config,
};
use crate::control::Control;
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::registry::{PlatformRegistry, ProviderRegistry};

/// Source id of lifecycle events published by the runtime.
pub const RUNTIME_ID: &str = "runtime";

type ProviderFactory =
    Arc<dyn Fn(&ProviderConfig) -> Result<BoxedProvider, BoxError> + Send + Sync>;
type PlatformFactory =
    Arc<dyn Fn(&PlatformConfig) -> Result<BoxedPlatform, BoxError> + Send + Sync>;

/// Outcome of applying a new configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub providers_added: Vec<String>,
    pub providers_updated: Vec<String>,
    pub providers_removed: Vec<String>,
    pub platforms_added: Vec<String>,
    pub platforms_updated: Vec<String>,
    pub platforms_removed: Vec<String>,
    /// Entries that could not be applied. The rest of the reload still went
    /// through.
    pub errors: Vec<String>,
}

impl ReloadSummary {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

struct RuntimeInner {
    config: RwLock<AetherConfig>,
    loader: ConfigLoader,
    bus: EventBus,
    plugins: Arc<PluginManager>,
    providers: Arc<ProviderRegistry>,
    platforms: Arc<PlatformRegistry>,
    orchestrator: ChatOrchestrator,
    provider_factories: RwLock<HashMap<String, ProviderFactory>>,
    platform_factories: RwLock<HashMap<String, PlatformFactory>>,
    /// Entries built from configuration. Reloads only touch these, so
    /// instances registered in code survive them.
    managed_providers: Mutex<HashSet<String>>,
    managed_platforms: Mutex<HashSet<String>>,
    initialized: AtomicBool,
    running: AtomicBool,
    /// Set by `stop`. The bus is closed for good at that point.
    stopped: AtomicBool,
    /// Serializes lifecycle transitions and config reloads.
    lifecycle: tokio::sync::Mutex<()>,
}

/// The Aether runtime.
///
/// Cheap to clone; clones share the same context.
///
/// ```rust,ignore
/// let runtime = AetherRuntime::from_config(&config);
/// runtime.register_plugin(greeter())?;
/// runtime.run_until(shutdown_signal).await?;
/// ```
#[derive(Clone)]
pub struct AetherRuntime {
    inner: Arc<RuntimeInner>,
}

impl AetherRuntime {
    /// Creates a runtime from `aether.toml` in the current directory.
    ///
    /// If no configuration file is found, or it fails to load, default
    /// settings are used.
    pub fn new() -> Self {
        let loader = ConfigLoader::new().with_current_dir();
        match loader.load() {
            Ok(config) => Self::with_loader(&config, loader),
            Err(err) => {
                // Logging comes up inside with_loader, so warn afterwards.
                let runtime = Self::with_loader(&AetherConfig::default(), loader);
                warn!(error = %err, "Failed to load config, using defaults");
                runtime
            }
        }
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration.
    ///
    /// Initializes logging from `config.logging` unless a subscriber is
    /// already installed.
    pub fn from_config(config: &AetherConfig) -> Self {
        Self::with_loader(config, ConfigLoader::new().with_current_dir())
    }

    fn with_loader(config: &AetherConfig, loader: ConfigLoader) -> Self {
        logging::init_from_config(&config.logging);

        let bus = EventBus::with_capacity(config.bus.queue_capacity);
        let plugins = Arc::new(
            PluginManager::new(bus.clone()).with_hook_timeout(config.timeouts.plugin_hook()),
        );
        let providers = Arc::new(ProviderRegistry::new());
        plugins.set_providers(Arc::clone(&providers) as Arc<dyn ProviderLookup>);
        let platforms = Arc::new(PlatformRegistry::new(bus.clone()));
        let orchestrator = ChatOrchestrator::new(
            bus.clone(),
            Arc::clone(&plugins),
            Arc::clone(&providers),
            Arc::clone(&platforms),
        );

        let runtime = Self {
            inner: Arc::new(RuntimeInner {
                config: RwLock::new(config.clone()),
                loader,
                bus,
                plugins,
                providers,
                platforms,
                orchestrator,
                provider_factories: RwLock::new(HashMap::new()),
                platform_factories: RwLock::new(HashMap::new()),
                managed_providers: Mutex::new(HashSet::new()),
                managed_platforms: Mutex::new(HashSet::new()),
                initialized: AtomicBool::new(false),
                running: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        };
        runtime.apply_settings(config);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            platforms = config.platforms.len(),
            providers = config.providers.len(),
            "Runtime initialized from configuration"
        );
        runtime
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    /// A snapshot of the active configuration.
    pub fn config(&self) -> AetherConfig {
        self.inner.config.read().clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.inner.plugins
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.inner.providers
    }

    pub fn platforms(&self) -> &Arc<PlatformRegistry> {
        &self.inner.platforms
    }

    pub fn orchestrator(&self) -> &ChatOrchestrator {
        &self.inner.orchestrator
    }

    /// Handle for external control surfaces.
    pub fn control(&self) -> Control {
        Control::new(self.clone())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Makes provider entries with `type = P::TYPE` buildable.
    ///
    /// The entry's `settings` table is deserialized into `P::Config`; an
    /// empty table uses `P::Config::default()`.
    pub fn register_provider_type<P: ConfigurableProvider>(&self) {
        let factory: ProviderFactory = Arc::new(|config: &ProviderConfig| {
            let settings: P::Config = decode_settings(&config.settings)?;
            let spec = ProviderSpec {
                name: config.name.clone(),
                default_model: config.default_model.clone(),
                models: config.models.clone(),
                api_key: resolve_credentials(config)?,
                base_url: config.base_url.clone(),
            };
            Ok(Arc::new(P::from_config(spec, settings)?) as BoxedProvider)
        });
        self.inner
            .provider_factories
            .write()
            .insert(P::TYPE.to_string(), factory);
        debug!(kind = P::TYPE, "Registered provider type");
    }

    /// Makes platform entries with `type = P::TYPE` buildable.
    pub fn register_platform_type<P: ConfigurablePlatform>(&self) {
        let factory: PlatformFactory = Arc::new(|config: &PlatformConfig| {
            let settings: P::Config = decode_settings(&config.settings)?;
            Ok(Arc::new(P::from_config(&config.name, settings)?) as BoxedPlatform)
        });
        self.inner
            .platform_factories
            .write()
            .insert(P::TYPE.to_string(), factory);
        debug!(kind = P::TYPE, "Registered platform type");
    }

    /// Registers a ready-made provider outside configuration.
    pub fn register_provider(&self, provider: BoxedProvider) -> RuntimeResult<()> {
        self.inner.providers.register(provider)
    }

    /// Registers a ready-made platform outside configuration.
    ///
    /// Connected on [`start`](Self::start), or immediately if the runtime is
    /// already running.
    pub async fn register_platform(
        &self,
        name: impl Into<String>,
        platform: BoxedPlatform,
    ) -> RuntimeResult<()> {
        let name = name.into();
        self.inner.platforms.register(name.clone(), platform)?;
        if self.is_running()
            && let Err(err) = self.inner.platforms.connect(&name).await
        {
            warn!(platform = %name, error = %err, "Platform failed to connect");
        }
        Ok(())
    }

    /// Adds a plugin descriptor to the catalog.
    pub fn register_plugin(&self, descriptor: PluginDescriptor) -> RuntimeResult<()> {
        Ok(self.inner.plugins.register(descriptor)?)
    }

    fn build_provider(&self, config: &ProviderConfig) -> RuntimeResult<BoxedProvider> {
        let factory = self
            .inner
            .provider_factories
            .read()
            .get(&config.kind)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownType {
                category: "provider",
                kind: config.kind.clone(),
                name: config.name.clone(),
            })?;
        let provider = factory(config).map_err(|e| adapter_error("provider", &config.name, e))?;
        if provider.name() != config.name {
            return Err(RuntimeError::AdapterInit {
                category: "provider",
                name: config.name.clone(),
                reason: format!("adapter reported name '{}'", provider.name()),
            });
        }
        Ok(provider)
    }

    fn build_platform(&self, config: &PlatformConfig) -> RuntimeResult<BoxedPlatform> {
        let factory = self
            .inner
            .platform_factories
            .read()
            .get(&config.kind)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownType {
                category: "platform",
                kind: config.kind.clone(),
                name: config.name.clone(),
            })?;
        factory(config).map_err(|e| adapter_error("platform", &config.name, e))
    }

    /// Pushes tunables from `config` into the registries and orchestrator.
    fn apply_settings(&self, config: &AetherConfig) {
        let inner = &self.inner;
        inner
            .providers
            .set_default(config.runtime.default_provider.clone());
        inner.platforms.set_connect_settings(
            config.retry.to_policy(),
            config.timeouts.platform_connect(),
        );
        inner.orchestrator.update_settings(OrchestratorSettings {
            provider_timeout: config.timeouts.provider(),
            respond_to_inbound: config.runtime.respond_to_inbound,
        });
        inner.plugins.set_configs(config.plugins.settings.clone());
        inner.plugins.set_disabled(config.plugins.disabled.iter().cloned());
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Builds configured providers and platforms, discovers link-time
    /// plugins, and attaches the orchestrator to the bus. Idempotent.
    pub async fn init(&self) -> RuntimeResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.init_locked()
    }

    fn init_locked(&self) -> RuntimeResult<()> {
        if self.inner.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let config = self.config();

        for entry in config.providers.iter().filter(|p| p.enabled) {
            let provider = self.build_provider(entry)?;
            self.inner.providers.register(provider)?;
            self.inner.managed_providers.lock().insert(entry.name.clone());
        }
        for entry in config.platforms.iter().filter(|p| p.enabled) {
            let platform = self.build_platform(entry)?;
            self.inner.platforms.register(entry.name.clone(), platform)?;
            self.inner.managed_platforms.lock().insert(entry.name.clone());
        }

        let discovered = self.inner.plugins.discover();
        self.inner.orchestrator.attach();
        self.inner.initialized.store(true, Ordering::Release);

        info!(
            providers = self.inner.providers.len(),
            platforms = self.inner.platforms.len(),
            plugins = self.inner.plugins.plugin_count(),
            discovered,
            "Runtime initialized"
        );
        Ok(())
    }

    /// Loads plugins, connects platforms, and publishes `engine_started`.
    ///
    /// A platform that fails to connect is left in `error`; it does not fail
    /// startup. A stopped runtime cannot be started again.
    pub async fn start(&self) -> RuntimeResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.is_running() {
            warn!("Runtime is already running");
            return Ok(());
        }
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(RuntimeError::Stopped);
        }
        self.init_locked()?;
        info!("Starting Aether runtime");

        if self.inner.config.read().plugins.autoload {
            let loaded = self.inner.plugins.load_all().await;
            info!(loaded, "Plugins loaded");
        }

        let names = self.inner.platforms.names();
        for (name, err) in self.inner.platforms.connect_many(&names).await {
            error!(platform = %name, error = %err, "Failed to connect platform");
        }

        self.inner.running.store(true, Ordering::Release);
        self.inner.bus.publish(
            topics::ENGINE_STARTED,
            json!({
                "plugins": self.inner.plugins.active_count(),
                "platforms": self.inner.platforms.connected_count(),
                "providers": self.inner.providers.len(),
            }),
            RUNTIME_ID,
        );
        info!("Runtime started");
        Ok(())
    }

    /// Stops the runtime.
    ///
    /// Publishes `engine_stopping`, stops accepting chat requests, waits up
    /// to `runtime.shutdown_grace_ms` for in-flight ones, disconnects every
    /// platform, unloads plugins, and closes the bus.
    ///
    /// Stopping is final: the closed bus is not reopened, and a later
    /// [`start`](Self::start) fails with [`RuntimeError::Stopped`]. Build a
    /// new runtime to run again.
    pub async fn stop(&self) -> RuntimeResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            warn!("Runtime is not running");
            return Ok(());
        }
        self.inner.stopped.store(true, Ordering::Release);
        info!("Stopping Aether runtime");

        let inner = &self.inner;
        inner
            .bus
            .publish(topics::ENGINE_STOPPING, json!({}), RUNTIME_ID);

        let grace = inner.config.read().runtime.shutdown_grace();
        let abandoned = inner.orchestrator.shutdown(grace).await;
        if abandoned > 0 {
            warn!(abandoned, "Chat requests cancelled at shutdown");
        }

        inner.platforms.disconnect_all().await;
        inner.plugins.unload_all().await;
        inner.bus.flush().await;
        inner.bus.close().await;

        info!("Runtime stopped");
        Ok(())
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        info!("Aether runtime is now running. Press Ctrl+C to stop.");
        let signal = wait_for_shutdown().await;
        self.stop().await?;
        signal
    }

    /// Runs until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await
    }

    // =========================================================================
    // Config Reload
    // =========================================================================

    /// Reloads configuration from its sources and applies it.
    pub async fn reload_config(&self) -> RuntimeResult<ReloadSummary> {
        let config = self.inner.loader.load()?;
        self.apply_config(config).await
    }

    /// Applies `config` in place.
    ///
    /// New provider/platform entries are registered (and connected when
    /// running), removed ones deregistered, and changed ones rebuilt.
    /// Entries that fail to build are reported in the summary; the previous
    /// instance, if any, stays registered. Plugin hook timeout, bus capacity,
    /// and logging are fixed at construction.
    pub async fn apply_config(&self, config: AetherConfig) -> RuntimeResult<ReloadSummary> {
        validate_config(&config)?;
        let _guard = self.inner.lifecycle.lock().await;
        let old = self.config();
        let mut summary = ReloadSummary::default();

        if self.inner.initialized.load(Ordering::Acquire) {
            self.diff_providers(&old, &config, &mut summary);
            self.diff_platforms(&old, &config, &mut summary).await;
        }

        // The default must exist after the diff; keep the old one otherwise.
        let mut effective = config;
        if let Some(name) = &effective.runtime.default_provider
            && self.inner.initialized.load(Ordering::Acquire)
            && self.inner.providers.get(name).is_none()
        {
            summary
                .errors
                .push(format!("default provider '{name}' is not registered"));
            effective.runtime.default_provider = old.runtime.default_provider.clone();
        }

        self.apply_settings(&effective);
        *self.inner.config.write() = effective;

        info!(
            providers_added = summary.providers_added.len(),
            providers_updated = summary.providers_updated.len(),
            providers_removed = summary.providers_removed.len(),
            platforms_added = summary.platforms_added.len(),
            platforms_updated = summary.platforms_updated.len(),
            platforms_removed = summary.platforms_removed.len(),
            errors = summary.errors.len(),
            "Configuration applied"
        );
        Ok(summary)
    }

    fn diff_providers(&self, old: &AetherConfig, new: &AetherConfig, summary: &mut ReloadSummary) {
        let registry = &self.inner.providers;
        let wanted: HashMap<&str, &ProviderConfig> = new
            .providers
            .iter()
            .filter(|p| p.enabled)
            .map(|p| (p.name.as_str(), p))
            .collect();

        let managed: Vec<String> = self.inner.managed_providers.lock().iter().cloned().collect();
        for name in managed {
            if !wanted.contains_key(name.as_str()) {
                registry.deregister(&name);
                self.inner.managed_providers.lock().remove(&name);
                summary.providers_removed.push(name);
            }
        }

        for entry in new.providers.iter().filter(|p| p.enabled) {
            let managed = self.inner.managed_providers.lock().contains(&entry.name);
            if managed && old.provider(&entry.name) == Some(entry) {
                continue;
            }
            if !managed && registry.get(&entry.name).is_some() {
                summary.errors.push(format!(
                    "provider '{}' is registered outside configuration",
                    entry.name
                ));
                continue;
            }
            match self.build_provider(entry) {
                Ok(provider) => {
                    registry.replace(provider);
                    self.inner.managed_providers.lock().insert(entry.name.clone());
                    if managed {
                        summary.providers_updated.push(entry.name.clone());
                    } else {
                        summary.providers_added.push(entry.name.clone());
                    }
                }
                Err(err) => summary.errors.push(err.to_string()),
            }
        }
    }

    async fn diff_platforms(
        &self,
        old: &AetherConfig,
        new: &AetherConfig,
        summary: &mut ReloadSummary,
    ) {
        let registry = &self.inner.platforms;
        let running = self.is_running();
        let wanted: HashSet<&str> = new
            .platforms
            .iter()
            .filter(|p| p.enabled)
            .map(|p| p.name.as_str())
            .collect();

        let managed: Vec<String> = self.inner.managed_platforms.lock().iter().cloned().collect();
        for name in managed {
            if wanted.contains(name.as_str()) {
                continue;
            }
            if let Err(err) = registry.deregister(&name).await {
                warn!(platform = %name, error = %err, "Deregistration failed");
            }
            self.inner.managed_platforms.lock().remove(&name);
            summary.platforms_removed.push(name);
        }

        for entry in new.platforms.iter().filter(|p| p.enabled) {
            let managed = self.inner.managed_platforms.lock().contains(&entry.name);
            if managed && old.platform(&entry.name) == Some(entry) {
                continue;
            }
            if !managed && registry.contains(&entry.name) {
                summary.errors.push(format!(
                    "platform '{}' is registered outside configuration",
                    entry.name
                ));
                continue;
            }
            let platform = match self.build_platform(entry) {
                Ok(platform) => platform,
                Err(err) => {
                    summary.errors.push(err.to_string());
                    continue;
                }
            };
            if managed && let Err(err) = registry.deregister(&entry.name).await {
                warn!(platform = %entry.name, error = %err, "Deregistration failed");
            }
            if let Err(err) = registry.register(entry.name.clone(), platform) {
                summary.errors.push(err.to_string());
                self.inner.managed_platforms.lock().remove(&entry.name);
                continue;
            }
            self.inner.managed_platforms.lock().insert(entry.name.clone());
            if managed {
                summary.platforms_updated.push(entry.name.clone());
            } else {
                summary.platforms_added.push(entry.name.clone());
            }
            if running && let Err(err) = registry.connect(&entry.name).await {
                warn!(platform = %entry.name, error = %err, "Platform failed to connect");
            }
        }
    }
}

impl Default for AetherRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AetherRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AetherRuntime")
            .field("running", &self.is_running())
            .field("providers", &self.inner.providers)
            .field("platforms", &self.inner.platforms.names())
            .field("plugins", &self.inner.plugins.plugin_count())
            .finish()
    }
}

fn decode_settings<T: DeserializeOwned + Default>(
    settings: &Map<String, Value>,
) -> Result<T, BoxError> {
    if settings.is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(Value::Object(settings.clone()))?)
}

fn resolve_credentials(config: &ProviderConfig) -> Result<Option<String>, BoxError> {
    let Some(var) = config.credentials_ref.as_deref() else {
        return Ok(None);
    };
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(Some(value)),
        _ => Err(ConfigError::EnvVarError(format!(
            "{var} is not set (credentials_ref of provider '{}')",
            config.name
        ))
        .into()),
    }
}

fn adapter_error(category: &'static str, name: &str, err: BoxError) -> RuntimeError {
    match err.downcast::<ConfigError>() {
        Ok(config) => RuntimeError::Config(*config),
        Err(err) => RuntimeError::AdapterInit {
            category,
            name: name.to_string(),
            reason: err.to_string(),
        },
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for an [`AetherRuntime`] with custom configuration sources.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Also searches the user's config directory (`~/.config/aether`).
    pub fn with_user_config_dir(mut self) -> Self {
        self.config_loader = self.config_loader.with_user_config_dir();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges configuration on top of every file and environment source.
    pub fn merge(mut self, config: AetherConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads the configuration and builds the runtime. The loader is kept
    /// for [`AetherRuntime::reload_config`].
    pub fn build(self) -> ConfigResult<AetherRuntime> {
        let config = self.config_loader.load()?;
        Ok(AetherRuntime::with_loader(&config, self.config_loader))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
