//! Platform registry: owns registered platforms and drives their connection
//! lifecycle.
//!
//! State transitions are made by the adapters through their
//! [`PlatformContext`]; the registry only observes them via a `watch`
//! channel per platform. Lifecycle operations on one platform are serialized
//! by a per-platform lock; listing and lookups never wait on them.

use std::sync::Arc;
use std::time::Duration;

use aether_core::{
    BoxedPlatform, ConnectionState, EventBus, OutboundMessage, PlatformContext, PlatformError,
    PlatformResult, PlatformStatus, RetryPolicy,
};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tracing::{debug, info, warn};

/// Listing entry for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub state: ConnectionState,
    pub connected: bool,
    pub last_error: Option<String>,
}

struct PlatformEntry {
    name: Arc<str>,
    platform: BoxedPlatform,
    status: Arc<watch::Sender<PlatformStatus>>,
    /// Serializes connect / disconnect / reconnect.
    op_lock: AsyncMutex<()>,
    /// Context of the current connection session.
    session: Mutex<Option<PlatformContext>>,
}

impl PlatformEntry {
    fn info(&self) -> PlatformInfo {
        let status = self.status.borrow().clone();
        PlatformInfo {
            name: self.name.to_string(),
            kind: self.platform.kind().to_string(),
            state: status.state,
            connected: status.state == ConnectionState::Connected,
            last_error: status.last_error,
        }
    }

    fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }
}

#[derive(Debug, Clone)]
struct ConnectSettings {
    retry: RetryPolicy,
    connect_timeout: Duration,
}

/// Registered platforms in registration order.
pub struct PlatformRegistry {
    bus: EventBus,
    entries: RwLock<Vec<Arc<PlatformEntry>>>,
    settings: RwLock<ConnectSettings>,
}

impl PlatformRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            entries: RwLock::new(Vec::new()),
            settings: RwLock::new(ConnectSettings {
                retry: RetryPolicy::default(),
                connect_timeout: aether_core::integration::DEFAULT_CONNECT_TIMEOUT,
            }),
        }
    }

    /// Sets the retry policy and per-attempt timeout used by later connects.
    pub fn set_connect_settings(&self, retry: RetryPolicy, connect_timeout: Duration) {
        *self.settings.write() = ConnectSettings {
            retry,
            connect_timeout,
        };
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers `platform` as `name` in the `disconnected` state.
    pub fn register(&self, name: impl Into<String>, platform: BoxedPlatform) -> PlatformResult<()> {
        let name = name.into();
        let mut entries = self.entries.write();
        if entries.iter().any(|e| *e.name == *name) {
            return Err(PlatformError::AlreadyRegistered(name));
        }
        info!(platform = %name, kind = platform.kind(), "Registered platform");
        entries.push(Arc::new(PlatformEntry {
            name: name.into(),
            platform,
            status: Arc::new(watch::Sender::new(PlatformStatus::default())),
            op_lock: AsyncMutex::new(()),
            session: Mutex::new(None),
        }));
        Ok(())
    }

    /// Disconnects (best-effort) and removes `name`.
    pub async fn deregister(&self, name: &str) -> PlatformResult<()> {
        let entry = self.entry(name)?;
        {
            let _guard = entry.op_lock.lock().await;
            if let Err(err) = self.disconnect_locked(&entry).await {
                warn!(platform = %name, error = %err, "Disconnect during deregistration failed");
            }
        }
        self.entries.write().retain(|e| !Arc::ptr_eq(e, &entry));
        info!(platform = %name, "Deregistered platform");
        Ok(())
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Connects `name`. A no-op when it is already connected.
    ///
    /// Retries with backoff happen inside the adapter; when they are
    /// exhausted the platform is left in `error` with `last_error` set.
    pub async fn connect(&self, name: &str) -> PlatformResult<()> {
        let entry = self.entry(name)?;
        let _guard = entry.op_lock.lock().await;
        self.connect_locked(&entry).await
    }

    /// Disconnects `name` and stops its background work.
    pub async fn disconnect(&self, name: &str) -> PlatformResult<()> {
        let entry = self.entry(name)?;
        let _guard = entry.op_lock.lock().await;
        self.disconnect_locked(&entry).await
    }

    /// Disconnects (ignoring failure) and connects again.
    ///
    /// A failed connect leaves the platform registered in `error`.
    pub async fn reconnect(&self, name: &str) -> PlatformResult<()> {
        let entry = self.entry(name)?;
        let _guard = entry.op_lock.lock().await;
        if let Err(err) = self.disconnect_locked(&entry).await {
            debug!(platform = %name, error = %err, "Ignoring disconnect failure before reconnect");
        }
        self.connect_locked(&entry).await
    }

    /// Connects every listed platform concurrently. Returns the failures.
    pub async fn connect_many(&self, names: &[String]) -> Vec<(String, PlatformError)> {
        let results = join_all(names.iter().map(|name| async move {
            (name.clone(), self.connect(name).await)
        }))
        .await;
        results
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|err| (name, err)))
            .collect()
    }

    pub async fn disconnect_all(&self) {
        let names = self.names();
        info!("Disconnecting {} platform(s)", names.len());
        join_all(names.iter().map(|name| async move {
            if let Err(err) = self.disconnect(name).await {
                warn!(platform = %name, error = %err, "Disconnect failed");
            }
        }))
        .await;
    }

    async fn connect_locked(&self, entry: &PlatformEntry) -> PlatformResult<()> {
        if entry.state() == ConnectionState::Connected {
            debug!(platform = %entry.name, "Already connected");
            return Ok(());
        }

        let settings = self.settings.read().clone();
        let ctx = PlatformContext::new(entry.name.clone(), self.bus.clone(), entry.status.clone())
            .with_retry(settings.retry)
            .with_connect_timeout(settings.connect_timeout);
        // Retire the session of a run that errored out without a disconnect.
        let stale = entry.session.lock().replace(ctx.clone());
        if let Some(stale) = stale {
            debug!(platform = %entry.name, "Cancelling stale session");
            stale.cancellation().cancel();
        }

        let result = entry.platform.connect(&ctx).await;
        if result.is_err() {
            ctx.cancellation().cancel();
            entry.session.lock().take();
        }
        result
    }

    async fn disconnect_locked(&self, entry: &PlatformEntry) -> PlatformResult<()> {
        let session = entry.session.lock().take();
        let Some(ctx) = session else {
            return Ok(());
        };
        ctx.cancellation().cancel();
        let result = entry.platform.disconnect().await;
        ctx.set_state(ConnectionState::Disconnected);
        info!(platform = %entry.name, "Platform disconnected");
        result
    }

    // ─── Messaging ───────────────────────────────────────────────────────────

    /// Sends `message` through a connected platform.
    pub async fn send_outbound(&self, name: &str, message: OutboundMessage) -> PlatformResult<()> {
        let entry = self.entry(name)?;
        if entry.state() != ConnectionState::Connected {
            return Err(PlatformError::NotConnected(name.to_string()));
        }
        entry.platform.send_outbound(message).await
    }

    pub async fn send_typing(&self, name: &str, chat_id: &str) -> PlatformResult<()> {
        let entry = self.entry(name)?;
        if entry.state() != ConnectionState::Connected {
            return Err(PlatformError::NotConnected(name.to_string()));
        }
        entry.platform.send_typing(chat_id).await
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    pub fn list(&self) -> Vec<PlatformInfo> {
        self.entries.read().iter().map(|e| e.info()).collect()
    }

    pub fn info(&self, name: &str) -> Option<PlatformInfo> {
        self.entry(name).ok().map(|e| e.info())
    }

    pub fn status(&self, name: &str) -> Option<PlatformStatus> {
        self.entry(name).ok().map(|e| e.status.borrow().clone())
    }

    /// Watches status changes of `name`.
    pub fn watch(&self, name: &str) -> Option<watch::Receiver<PlatformStatus>> {
        self.entry(name).ok().map(|e| e.status.subscribe())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().iter().any(|e| &*e.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|e| e.name.to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|e| e.state() == ConnectionState::Connected)
            .count()
    }

    fn entry(&self, name: &str) -> PlatformResult<Arc<PlatformEntry>> {
        self.entries
            .read()
            .iter()
            .find(|e| &*e.name == name)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(name.to_string()))
    }
}

impl std::fmt::Debug for PlatformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformRegistry")
            .field("platforms", &self.list())
            .finish()
    }
}
