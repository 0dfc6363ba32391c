//! Platform capability interface.
//!
//! A platform adapter owns its connection lifecycle. The registry hands it a
//! [`PlatformContext`] on every connect; the adapter reports state through
//! that context and publishes normalized inbound messages on the bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use crate::bus::EventBus;
use crate::foundation::error::{BoxError, PlatformError, PlatformResult};
use crate::foundation::event::topics;
use crate::foundation::message::{InboundMessage, OutboundMessage};

/// Default deadline of a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state of a platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Observable status of a platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformStatus {
    pub state: ConnectionState,
    pub last_error: Option<String>,
}

/// Handle given to a platform adapter for one connection session.
///
/// Cancelled when the registry disconnects the platform; background loops
/// should select on [`cancelled`](Self::cancelled).
#[derive(Clone)]
pub struct PlatformContext {
    name: Arc<str>,
    bus: EventBus,
    status: Arc<watch::Sender<PlatformStatus>>,
    retry: RetryPolicy,
    connect_timeout: Duration,
    cancel: CancellationToken,
}

impl PlatformContext {
    /// Creates a context reporting into `status`.
    pub fn new(
        name: impl Into<Arc<str>>,
        bus: EventBus,
        status: Arc<watch::Sender<PlatformStatus>>,
    ) -> Self {
        Self {
            name: name.into(),
            bus,
            status,
            retry: RetryPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Registered name of the platform.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolves when this session is torn down.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn status(&self) -> PlatformStatus {
        self.status.borrow().clone()
    }

    /// Moves to `state`. Reaching `Connected` clears the last error.
    pub fn set_state(&self, state: ConnectionState) {
        let changed = self.status.send_if_modified(|status| {
            let clear_error = state == ConnectionState::Connected && status.last_error.is_some();
            if status.state == state && !clear_error {
                return false;
            }
            status.state = state;
            if state == ConnectionState::Connected {
                status.last_error = None;
            }
            true
        });
        if changed {
            debug!(platform = %self.name, state = %state, "Platform state changed");
            self.bus.publish(
                topics::PLATFORM_STATE_CHANGED,
                json!({ "platform": &*self.name, "state": state }),
                &*self.name,
            );
        }
    }

    /// Moves to `Error`, records `error`, and publishes `platform_error`.
    pub fn report_error(&self, error: &PlatformError) {
        let message = error.to_string();
        self.status.send_modify(|status| {
            status.state = ConnectionState::Error;
            status.last_error = Some(message.clone());
        });
        warn!(platform = %self.name, error = %message, "Platform error");
        self.bus.publish(
            topics::PLATFORM_STATE_CHANGED,
            json!({ "platform": &*self.name, "state": ConnectionState::Error }),
            &*self.name,
        );
        self.bus.publish(
            topics::PLATFORM_ERROR,
            json!({ "platform": &*self.name, "error": message }),
            &*self.name,
        );
    }

    /// Publishes a normalized inbound message.
    pub fn publish_inbound(&self, message: InboundMessage) {
        match serde_json::to_value(&message) {
            Ok(payload) => {
                self.bus
                    .publish(topics::INBOUND_MESSAGE, payload, &*self.name);
            }
            Err(err) => warn!(platform = %self.name, error = %err, "Dropping unserializable message"),
        }
    }
}

impl std::fmt::Debug for PlatformContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformContext")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

/// A chat platform.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Platform type, e.g. `"telegram"`.
    fn kind(&self) -> &str;

    /// Makes a single connection attempt.
    ///
    /// On success the adapter starts whatever background loop receives
    /// messages, stopping it when `ctx` is cancelled.
    async fn open(&self, ctx: &PlatformContext) -> PlatformResult<()>;

    /// Connects with retries.
    ///
    /// The default calls [`open`](Self::open) up to `1 + max_retries` times,
    /// bounding each attempt by the context's connect timeout and sleeping
    /// with exponential backoff in between. Exhausting all attempts leaves
    /// the platform in `Error` and publishes `platform_error`.
    async fn connect(&self, ctx: &PlatformContext) -> PlatformResult<()> {
        connect_with_retry(self, ctx).await
    }

    /// Closes the connection. Best-effort.
    async fn disconnect(&self) -> PlatformResult<()>;

    async fn send_outbound(&self, message: OutboundMessage) -> PlatformResult<()>;

    /// Shows a typing indicator. No-op unless the platform supports it.
    async fn send_typing(&self, _chat_id: &str) -> PlatformResult<()> {
        Ok(())
    }
}

/// A shared platform trait object.
pub type BoxedPlatform = Arc<dyn Platform>;

/// Platforms that can be built from configuration.
pub trait ConfigurablePlatform: Platform + Sized + 'static {
    /// The `type` value in configuration, e.g. `"telegram"`.
    const TYPE: &'static str;

    type Config: DeserializeOwned + Default;

    fn from_config(name: &str, config: Self::Config) -> Result<Self, BoxError>;
}

/// Retry loop behind [`Platform::connect`].
pub async fn connect_with_retry<P>(platform: &P, ctx: &PlatformContext) -> PlatformResult<()>
where
    P: Platform + ?Sized,
{
    let policy = ctx.retry().clone();
    let max_attempts = policy.max_attempts();
    let mut last_error = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = policy.delay_for(attempt - 1);
            debug!(platform = ctx.name(), ?delay, "Waiting before reconnect attempt");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancelled() => {
                    ctx.set_state(ConnectionState::Disconnected);
                    return Err(PlatformError::connect(ctx.name(), "connect cancelled"));
                }
            }
        }

        ctx.set_state(ConnectionState::Connecting);
        let result = match tokio::time::timeout(ctx.connect_timeout(), platform.open(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout {
                platform: ctx.name().to_string(),
                elapsed: ctx.connect_timeout(),
            }),
        };

        match result {
            Ok(()) => {
                ctx.set_state(ConnectionState::Connected);
                info!(platform = ctx.name(), kind = platform.kind(), "Platform connected");
                return Ok(());
            }
            Err(err) => {
                warn!(
                    platform = ctx.name(),
                    attempt = attempt + 1,
                    max_attempts,
                    error = %err,
                    "Connect attempt failed"
                );
                last_error = Some(err);
            }
        }
    }

    let reason = match last_error {
        Some(err) => format!("{err} (after {max_attempts} attempts)"),
        None => "no connect attempt made".to_string(),
    };
    let error = PlatformError::connect(ctx.name(), reason);
    ctx.report_error(&error);
    Err(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_err, assert_ok};

    struct Flaky {
        failures: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Platform for Flaky {
        fn kind(&self) -> &str {
            "flaky"
        }

        async fn open(&self, _ctx: &PlatformContext) -> PlatformResult<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(PlatformError::connect("flaky", "refused"))
            } else {
                Ok(())
            }
        }

        async fn disconnect(&self) -> PlatformResult<()> {
            Ok(())
        }

        async fn send_outbound(&self, _message: OutboundMessage) -> PlatformResult<()> {
            Ok(())
        }
    }

    fn context(bus: &EventBus, max_retries: u32) -> PlatformContext {
        let (status, _) = watch::channel(PlatformStatus::default());
        PlatformContext::new("flaky", bus.clone(), Arc::new(status)).with_retry(RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            multiplier: 2.0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_recovers_within_budget() {
        let bus = EventBus::new();
        let ctx = context(&bus, 3);
        let platform = Flaky {
            failures: 2,
            attempts: AtomicU32::new(0),
        };

        assert_ok!(platform.connect(&ctx).await);
        assert_eq!(platform.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.status().state, ConnectionState::Connected);
        assert!(ctx.status().last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_exhausts_retries() {
        let bus = EventBus::new();
        let errors = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&errors);
        bus.subscribe(
            topics::PLATFORM_ERROR,
            "test",
            crate::bus::handler_fn(move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        let ctx = context(&bus, 2);
        let platform = Flaky {
            failures: u32::MAX,
            attempts: AtomicU32::new(0),
        };

        let result = platform.connect(&ctx).await;
        assert!(matches!(result, Err(PlatformError::ConnectFailure { .. })));
        assert_eq!(platform.attempts.load(Ordering::SeqCst), 3);

        let status = ctx.status();
        assert_eq!(status.state, ConnectionState::Error);
        assert!(status.last_error.is_some_and(|e| e.contains("refused")));

        bus.flush().await;
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_times_out() {
        struct Hanging;

        #[async_trait]
        impl Platform for Hanging {
            fn kind(&self) -> &str {
                "hanging"
            }

            async fn open(&self, _ctx: &PlatformContext) -> PlatformResult<()> {
                std::future::pending().await
            }

            async fn disconnect(&self) -> PlatformResult<()> {
                Ok(())
            }

            async fn send_outbound(&self, _message: OutboundMessage) -> PlatformResult<()> {
                Ok(())
            }
        }

        let bus = EventBus::new();
        let ctx = context(&bus, 0).with_connect_timeout(Duration::from_millis(50));
        let result = Hanging.connect(&ctx).await;
        assert_err!(result);
        assert!(
            ctx.status()
                .last_error
                .is_some_and(|e| e.contains("timed out"))
        );
    }
}
