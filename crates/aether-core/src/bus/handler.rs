//! Subscriber handler type.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::foundation::error::BoxError;
use crate::foundation::event::Event;

/// A type-erased event handler.
///
/// Each call receives the shared event and returns a future that reports
/// success or failure. Failures are logged by the bus and never reach the
/// publisher.
pub type EventHandler =
    Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Wraps an async closure as an [`EventHandler`].
///
/// ```rust,ignore
/// let handler = handler_fn(|event| async move {
///     tracing::info!(topic = event.topic(), "seen");
///     Ok(())
/// });
/// bus.subscribe("inbound_message", "logger", handler);
/// ```
pub fn handler_fn<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}
