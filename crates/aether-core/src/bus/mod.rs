//! In-process publish/subscribe hub.
//!
//! Every subscription owns a bounded FIFO queue drained by its own task, so
//! one slow or failing subscriber never holds up the publisher or its peers:
//!
//! ```text
//!                     ┌─ queue ─▶ worker ─▶ handler A
//! publish ─▶ EventBus ┼─ queue ─▶ worker ─▶ handler B
//!                     └─ queue ─▶ worker ─▶ handler C
//! ```
//!
//! - Per subscriber, events arrive in publish order.
//! - A full queue drops its oldest pending event and bumps the drop counter.
//! - Handler errors and panics are logged and swallowed.

mod handler;

pub use handler::{EventHandler, handler_fn};

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace, warn};

use crate::foundation::event::{Event, TopicPattern};

/// Default bound of each subscriber queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Identifies one subscription on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Snapshot of one live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub pattern: TopicPattern,
    pub subscriber_id: String,
    pub dropped: u64,
}

#[derive(Default)]
struct Pending {
    events: VecDeque<Arc<Event>>,
    busy: bool,
}

struct Subscriber {
    id: SubscriptionId,
    pattern: TopicPattern,
    subscriber_id: String,
    handler: EventHandler,
    pending: Mutex<Pending>,
    wake: Notify,
    idle: Notify,
    cancel: CancellationToken,
    dropped: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Subscriber {
    /// Queues an event, evicting the oldest one if the queue is full.
    /// Returns true if an event was dropped.
    fn enqueue(&self, event: Arc<Event>, capacity: usize) -> bool {
        let mut pending = self.pending.lock();
        let mut evicted = false;
        while pending.events.len() >= capacity {
            pending.events.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            evicted = true;
        }
        pending.events.push_back(event);
        drop(pending);

        self.wake.notify_one();
        evicted
    }

    fn is_idle(&self) -> bool {
        let pending = self.pending.lock();
        pending.events.is_empty() && !pending.busy
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.cancel.is_cancelled() || self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    async fn deliver(&self, event: Arc<Event>) {
        let handler = Arc::clone(&self.handler);
        let call = Arc::clone(&event);
        let result = AssertUnwindSafe(async move { handler(call).await })
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                subscription = %self.id,
                subscriber = %self.subscriber_id,
                topic = event.topic(),
                error = %err,
                "Event handler failed"
            ),
            Err(_) => error!(
                subscription = %self.id,
                subscriber = %self.subscriber_id,
                topic = event.topic(),
                "Event handler panicked"
            ),
        }
    }

    fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            pattern: self.pattern.clone(),
            subscriber_id: self.subscriber_id.clone(),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_subscriber(sub: Arc<Subscriber>) {
    loop {
        if sub.cancel.is_cancelled() {
            break;
        }

        let next = {
            let mut pending = sub.pending.lock();
            let event = pending.events.pop_front();
            pending.busy = event.is_some();
            event
        };

        match next {
            Some(event) => sub.deliver(event).await,
            None => {
                sub.idle.notify_waiters();
                tokio::select! {
                    _ = sub.wake.notified() => {}
                    _ = sub.cancel.cancelled() => break,
                }
            }
        }
    }

    {
        let mut pending = sub.pending.lock();
        pending.events.clear();
        pending.busy = false;
    }
    sub.idle.notify_waiters();
    trace!(subscription = %sub.id, "Subscriber worker exited");
}

struct BusInner {
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    next_id: AtomicU64,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
    tracker: TaskTracker,
}

/// The event bus.
///
/// Cheap to clone; clones share the same subscriptions. Subscribing spawns a
/// task, so it must happen inside a Tokio runtime.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with [`DEFAULT_QUEUE_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates a bus whose subscriber queues hold at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Publishes a new event and returns it.
    ///
    /// Never blocks on subscribers.
    pub fn publish(
        &self,
        topic: impl Into<String>,
        payload: Value,
        source_id: impl Into<String>,
    ) -> Arc<Event> {
        let event = Arc::new(Event::new(topic, payload, source_id));
        self.publish_event(Arc::clone(&event));
        event
    }

    /// Publishes an already-built event. Returns how many subscribers it was
    /// queued for.
    pub fn publish_event(&self, event: Arc<Event>) -> usize {
        if self.inner.closed.load(Ordering::Acquire) {
            trace!(topic = event.topic(), "Bus closed, event discarded");
            return 0;
        }

        let subscribers = self.inner.subscribers.read();
        let mut queued = 0;
        for sub in subscribers
            .iter()
            .filter(|sub| sub.pattern.matches(event.topic()))
        {
            if sub.enqueue(Arc::clone(&event), self.inner.capacity) {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    subscription = %sub.id,
                    subscriber = %sub.subscriber_id,
                    topic = event.topic(),
                    "Subscriber queue full, dropped oldest event"
                );
            }
            queued += 1;
        }
        trace!(topic = event.topic(), queued, "Event published");
        queued
    }

    /// Registers `handler` for every topic matching `pattern`.
    ///
    /// On a closed bus the returned id is dead: nothing is spawned and no
    /// event is ever delivered to it.
    pub fn subscribe(
        &self,
        pattern: impl Into<TopicPattern>,
        subscriber_id: impl Into<String>,
        handler: EventHandler,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        if self.is_closed() {
            debug!(subscription = %id, "Bus closed, subscription not started");
            return id;
        }
        let sub = Arc::new(Subscriber {
            id,
            pattern: pattern.into(),
            subscriber_id: subscriber_id.into(),
            handler,
            pending: Mutex::new(Pending::default()),
            wake: Notify::new(),
            idle: Notify::new(),
            cancel: CancellationToken::new(),
            dropped: AtomicU64::new(0),
            worker: Mutex::new(None),
        });

        let worker = self.inner.tracker.spawn(run_subscriber(Arc::clone(&sub)));
        *sub.worker.lock() = Some(worker);

        debug!(
            subscription = %id,
            subscriber = %sub.subscriber_id,
            pattern = %sub.pattern,
            "Subscribed"
        );
        self.inner.subscribers.write().push(sub);
        id
    }

    /// Removes a subscription.
    ///
    /// Pending events for it are discarded. Resolves once any handler call
    /// already in progress has returned, so after this no code of the
    /// subscription is running. Must not be awaited from inside the same
    /// subscription's handler.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut subscribers = self.inner.subscribers.write();
            subscribers
                .iter()
                .position(|sub| sub.id == id)
                .map(|index| subscribers.remove(index))
        };
        let Some(sub) = removed else {
            return false;
        };

        sub.cancel.cancel();
        let worker = sub.worker.lock().take();
        if let Some(worker) = worker
            && let Err(err) = worker.await
        {
            warn!(subscription = %id, error = %err, "Subscriber worker ended abnormally");
        }
        debug!(subscription = %id, subscriber = %sub.subscriber_id, "Unsubscribed");
        true
    }

    /// Waits until every subscriber has handled all queued events.
    pub async fn flush(&self) {
        loop {
            let subscribers: Vec<_> = self.inner.subscribers.read().clone();
            for sub in &subscribers {
                sub.wait_idle().await;
            }
            // Handlers may have published more while we waited on later queues.
            if subscribers.iter().all(|sub| sub.is_idle()) {
                return;
            }
        }
    }

    /// Stops all workers and rejects further events.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscribers = std::mem::take(&mut *self.inner.subscribers.write());
        for sub in &subscribers {
            sub.cancel.cancel();
        }
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        debug!(subscriptions = subscribers.len(), "Event bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Total events dropped across all subscribers.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Lists live subscriptions in subscription order.
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner
            .subscribers
            .read()
            .iter()
            .map(|sub| sub.info())
            .collect()
    }

    /// Lists live subscriptions owned by `subscriber_id`.
    pub fn subscriptions_of(&self, subscriber_id: &str) -> Vec<SubscriptionInfo> {
        self.inner
            .subscribers
            .read()
            .iter()
            .filter(|sub| sub.subscriber_id == subscriber_id)
            .map(|sub| sub.info())
            .collect()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscription_count())
            .field("capacity", &self.inner.capacity)
            .field("dropped", &self.dropped_count())
            .finish()
    }
}
