//! Chat orchestration.
//!
//! Every chat turn, whether it comes from a platform's `inbound_message` or a
//! direct call, runs the same pipeline:
//!
//! ```text
//! received ──► intercept chain ──► answered by a plugin ─────────────► completed
//!                    │
//!                    └──► resolve provider ──► complete / stream ──► completed | failed
//! ```
//!
//! Lifecycle events (`response_chunk`, `response_complete`,
//! `response_failed`) are published for every turn. Streaming turns run on
//! their own task and hand chunks to the caller through a channel of
//! capacity one, so nothing is buffered beyond the chunk in transit.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use aether_core::{
    BoxError, ChatError, ChatRequest, ChatResponse, ChatResult, Chunk, Event, EventBus,
    InboundMessage, ProviderRequest, SubscriptionId, handler_fn, topics,
};
use aether_framework::PluginManager;
use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::registry::{PlatformRegistry, ProviderRegistry};

/// Source id of events published by the orchestrator.
pub const ORCHESTRATOR_ID: &str = "chat_orchestrator";

/// Tunables that may change on config reload.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Deadline for a whole provider call.
    pub provider_timeout: Duration,
    /// Answer `inbound_message` events.
    pub respond_to_inbound: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(120),
            respond_to_inbound: true,
        }
    }
}

// =============================================================================
// In-flight bookkeeping
// =============================================================================

type InFlightSet = Arc<Mutex<HashSet<String>>>;

/// Holds a request id in the in-flight set until dropped.
struct InFlight {
    id: String,
    set: InFlightSet,
}

impl InFlight {
    fn acquire(set: &InFlightSet, id: String) -> ChatResult<Self> {
        if !set.lock().insert(id.clone()) {
            return Err(ChatError::invalid(format!(
                "request '{id}' is already in flight"
            )));
        }
        Ok(Self {
            id,
            set: Arc::clone(set),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

// =============================================================================
// ChatStream
// =============================================================================

/// Chunks of one streaming chat turn.
///
/// Ends after exactly one terminal chunk. Dropping the stream cancels the
/// turn and drops the provider stream.
pub struct ChatStream {
    request_id: String,
    rx: mpsc::Receiver<Chunk>,
    cancel: CancellationToken,
}

impl ChatStream {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Requests cancellation without dropping the stream.
    ///
    /// Chunks already in transit are still delivered, followed by a
    /// `Cancelled` error.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for ChatStream {
    type Item = Chunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Chunk>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// ChatOrchestrator
// =============================================================================

struct Inner {
    bus: EventBus,
    plugins: Arc<PluginManager>,
    providers: Arc<ProviderRegistry>,
    platforms: Arc<PlatformRegistry>,
    settings: RwLock<OrchestratorSettings>,
    in_flight: InFlightSet,
    tracker: TaskTracker,
    /// Cancelled when shutdown gives up waiting on in-flight turns.
    shutdown: CancellationToken,
    accepting: AtomicBool,
    inbound: Mutex<Option<SubscriptionId>>,
}

/// Routes chat turns through plugins and providers.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChatOrchestrator {
    inner: Arc<Inner>,
}

impl ChatOrchestrator {
    pub fn new(
        bus: EventBus,
        plugins: Arc<PluginManager>,
        providers: Arc<ProviderRegistry>,
        platforms: Arc<PlatformRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                plugins,
                providers,
                platforms,
                settings: RwLock::new(OrchestratorSettings::default()),
                in_flight: Arc::new(Mutex::new(HashSet::new())),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                accepting: AtomicBool::new(true),
                inbound: Mutex::new(None),
            }),
        }
    }

    pub fn with_settings(self, settings: OrchestratorSettings) -> Self {
        self.update_settings(settings);
        self
    }

    pub fn settings(&self) -> OrchestratorSettings {
        self.inner.settings.read().clone()
    }

    pub fn update_settings(&self, settings: OrchestratorSettings) {
        *self.inner.settings.write() = settings;
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    // ─── Direct invocation ───────────────────────────────────────────────────

    /// Runs a chat turn to completion.
    ///
    /// With `request.stream` set, the provider is driven through its
    /// streaming interface (publishing `response_chunk` events) and the
    /// chunks are concatenated.
    pub async fn chat(&self, request: ChatRequest) -> ChatResult<ChatResponse> {
        let guard = match self.admit(&request) {
            Ok(guard) => guard,
            Err(err) => {
                self.inner
                    .publish_failed(request.id.as_deref().unwrap_or_default(), &err);
                return Err(err);
            }
        };
        let span = info_span!("chat", request_id = %guard.id, stream = request.stream);
        let inner = Arc::clone(&self.inner);

        let turn = async move {
            let id = guard.id.clone();
            let result = if request.stream {
                inner.collect_streamed(request, &id).await
            } else {
                inner.complete(request, &id).await
            };
            drop(guard);
            result
        };
        self.inner
            .tracker
            .track_future(turn.instrument(span))
            .await
    }

    /// Starts a streaming chat turn.
    ///
    /// Admission failures (shutdown, duplicate request id) surface as the
    /// stream's only chunk.
    pub fn chat_stream(&self, request: ChatRequest) -> ChatStream {
        let (tx, rx) = mpsc::channel(1);
        let cancel = self.inner.shutdown.child_token();

        let guard = match self.admit(&request) {
            Ok(guard) => guard,
            Err(err) => {
                let request_id = request.id.unwrap_or_default();
                self.inner.publish_failed(&request_id, &err);
                let _ = tx.try_send(Chunk::Error(err));
                return ChatStream {
                    request_id,
                    rx,
                    cancel,
                };
            }
        };

        let request_id = guard.id.clone();
        let span = info_span!("chat_stream", request_id = %request_id);
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        self.inner.tracker.spawn(
            async move {
                let id = guard.id.clone();
                let _ = inner.stream_turn(request, &id, token, tx).await;
                drop(guard);
            }
            .instrument(span),
        );

        ChatStream {
            request_id,
            rx,
            cancel,
        }
    }

    fn admit(&self, request: &ChatRequest) -> ChatResult<InFlight> {
        if !self.is_accepting() {
            return Err(ChatError::unavailable("runtime is shutting down"));
        }
        if request.message.trim().is_empty() {
            return Err(ChatError::invalid("message must not be empty"));
        }
        let id = request
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        InFlight::acquire(&self.inner.in_flight, id)
    }

    // ─── Inbound platform messages ───────────────────────────────────────────

    /// Subscribes to `inbound_message`. Idempotent.
    pub fn attach(&self) {
        let mut inbound = self.inner.inbound.lock();
        if inbound.is_some() {
            return;
        }
        let this = self.clone();
        let id = self.inner.bus.subscribe(
            topics::INBOUND_MESSAGE,
            ORCHESTRATOR_ID,
            handler_fn(move |event: Arc<Event>| {
                let this = this.clone();
                async move { this.on_inbound(&event) }
            }),
        );
        *inbound = Some(id);
    }

    /// Removes the `inbound_message` subscription.
    pub async fn detach(&self) {
        let id = self.inner.inbound.lock().take();
        if let Some(id) = id {
            self.inner.bus.unsubscribe(id).await;
        }
    }

    fn on_inbound(&self, event: &Event) -> Result<(), BoxError> {
        if !self.settings().respond_to_inbound || !self.is_accepting() {
            return Ok(());
        }
        let message: InboundMessage = event.payload_as()?;
        if message.text.trim().is_empty() {
            return Ok(());
        }
        // Replies run on their own task so one slow provider call does not
        // hold up later inbound messages.
        let this = self.clone();
        self.inner.tracker.spawn(async move { this.reply(message).await });
        Ok(())
    }

    async fn reply(&self, message: InboundMessage) {
        let platforms = &self.inner.platforms;
        if let Err(err) = platforms.send_typing(&message.platform, &message.chat_id).await {
            debug!(platform = %message.platform, error = %err, "Typing indicator failed");
        }

        let request = ChatRequest::new(message.text.clone())
            .with_id(format!("{}:{}", message.platform, message.id));
        match self.chat(request).await {
            Ok(response) => {
                let outbound = message.reply(response.content);
                if let Err(err) = platforms.send_outbound(&message.platform, outbound).await {
                    warn!(platform = %message.platform, error = %err, "Failed to send reply");
                }
            }
            Err(err) => {
                warn!(
                    platform = %message.platform,
                    chat_id = %message.chat_id,
                    error = %err,
                    "Inbound message not answered"
                );
            }
        }
    }

    // ─── Shutdown ────────────────────────────────────────────────────────────

    /// Stops accepting turns and waits up to `grace` for in-flight ones.
    ///
    /// Turns still running after `grace` are cancelled; returns how many
    /// were still in flight at that point.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.inner.accepting.store(false, Ordering::Release);
        self.detach().await;
        self.inner.tracker.close();

        if tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_ok()
        {
            debug!("All chat requests drained");
            return 0;
        }
        let remaining = self.in_flight_count();
        warn!(remaining, "Shutdown grace period elapsed, cancelling chat requests");
        self.inner.shutdown.cancel();
        remaining
    }
}

impl std::fmt::Debug for ChatOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOrchestrator")
            .field("settings", &self.settings())
            .field("in_flight", &self.in_flight_count())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

// =============================================================================
// Turn execution
// =============================================================================

/// Where a turn was answered.
struct Answer {
    response: ChatResponse,
    intercepted_by: Option<String>,
}

fn intercepted(plugin: String, content: String) -> Answer {
    Answer {
        response: ChatResponse {
            content,
            provider_used: format!("plugin:{plugin}"),
            model_used: String::new(),
            usage: None,
            finish_reason: None,
        },
        intercepted_by: Some(plugin),
    }
}

impl Inner {
    fn provider_timeout(&self) -> Duration {
        self.settings.read().provider_timeout
    }

    fn route(
        &self,
        request: &ChatRequest,
    ) -> ChatResult<(aether_core::BoxedProvider, String)> {
        let provider = self.providers.resolve(request.provider.as_deref())?;
        let model = ProviderRegistry::resolve_model(&provider, request.model.as_deref())?;
        Ok((provider, model))
    }

    /// Non-streaming turn.
    async fn complete(&self, request: ChatRequest, id: &str) -> ChatResult<ChatResponse> {
        match self.answer(&request).await {
            Ok(answer) => {
                self.publish_complete(id, &answer.response, answer.intercepted_by.as_deref());
                Ok(answer.response)
            }
            Err(err) => {
                self.publish_failed(id, &err);
                Err(err)
            }
        }
    }

    async fn answer(&self, request: &ChatRequest) -> ChatResult<Answer> {
        if let Some(hit) = self.plugins.intercept(request).await {
            return Ok(intercepted(hit.plugin, hit.content));
        }

        let (provider, model) = self.route(request)?;
        debug!(provider = provider.name(), %model, "Dispatching chat request");
        let call = provider.complete(ProviderRequest::from_chat(request, model));
        let response = match tokio::time::timeout(self.provider_timeout(), call).await {
            Ok(result) => result?,
            Err(_) => return Err(ChatError::Timeout),
        };
        Ok(Answer {
            response,
            intercepted_by: None,
        })
    }

    /// Streaming turn collected into one response.
    async fn collect_streamed(&self, request: ChatRequest, id: &str) -> ChatResult<ChatResponse> {
        let (tx, mut rx) = mpsc::channel(1);
        let drain = async move { while rx.recv().await.is_some() {} };
        let (result, ()) = tokio::join!(
            self.stream_turn(request, id, self.shutdown.child_token(), tx),
            drain
        );
        result
    }

    /// Drives one streaming turn, forwarding chunks to `tx`.
    ///
    /// Exactly one terminal chunk is sent, unless the receiver is gone.
    async fn stream_turn(
        &self,
        request: ChatRequest,
        id: &str,
        cancel: CancellationToken,
        tx: mpsc::Sender<Chunk>,
    ) -> ChatResult<ChatResponse> {
        if let Some(hit) = self.plugins.intercept(&request).await {
            let answer = intercepted(hit.plugin, hit.content);
            let content = &answer.response.content;
            if !content.is_empty() {
                self.publish_chunk(id, 0, content);
                let _ = tx.send(Chunk::text(content.clone())).await;
            }
            self.publish_complete(id, &answer.response, answer.intercepted_by.as_deref());
            let _ = tx.send(Chunk::done()).await;
            return Ok(answer.response);
        }

        let (provider, model) = match self.route(&request) {
            Ok(routed) => routed,
            Err(err) => return self.fail_stream(id, err, &tx).await,
        };
        debug!(provider = provider.name(), %model, "Dispatching streaming chat request");

        let deadline = Instant::now() + self.provider_timeout();
        let mut chunks = aether_core::integration::conform(
            provider.complete_stream(ProviderRequest::from_chat(&request, model.clone())),
        );
        let mut content = String::new();
        let mut index: u64 = 0;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(chunks = index, "Chat stream cancelled");
                    return self.fail_stream(id, ChatError::Cancelled, &tx).await;
                }
                chunk = chunks.next() => chunk,
                _ = tokio::time::sleep_until(deadline) => Some(Chunk::Error(ChatError::Timeout)),
            };
            let Some(chunk) = chunk else {
                return self
                    .fail_stream(id, ChatError::unavailable("stream ended early"), &tx)
                    .await;
            };

            match chunk {
                Chunk::Text(text) if text.is_empty() => {}
                Chunk::Text(text) => {
                    self.publish_chunk(id, index, &text);
                    index += 1;
                    content.push_str(&text);
                    if tx.send(Chunk::Text(text)).await.is_err() {
                        info!(chunks = index, "Chat stream receiver dropped");
                        return self.fail_stream(id, ChatError::Cancelled, &tx).await;
                    }
                }
                Chunk::Done(completion) => {
                    let response = ChatResponse {
                        content,
                        provider_used: provider.name().to_string(),
                        model_used: model,
                        usage: completion.usage,
                        finish_reason: completion.finish_reason.clone(),
                    };
                    self.publish_complete(id, &response, None);
                    let _ = tx.send(Chunk::Done(completion)).await;
                    return Ok(response);
                }
                Chunk::Error(err) => return self.fail_stream(id, err, &tx).await,
            }
        }
    }

    async fn fail_stream(
        &self,
        id: &str,
        err: ChatError,
        tx: &mpsc::Sender<Chunk>,
    ) -> ChatResult<ChatResponse> {
        self.publish_failed(id, &err);
        let _ = tx.send(Chunk::Error(err.clone())).await;
        Err(err)
    }

    // ─── Events ──────────────────────────────────────────────────────────────

    fn publish(&self, topic: &str, payload: Value) {
        self.bus.publish(topic, payload, ORCHESTRATOR_ID);
    }

    fn publish_chunk(&self, id: &str, index: u64, text: &str) {
        self.publish(
            topics::RESPONSE_CHUNK,
            json!({ "request_id": id, "index": index, "text": text }),
        );
    }

    fn publish_complete(&self, id: &str, response: &ChatResponse, intercepted_by: Option<&str>) {
        debug!(
            request_id = %id,
            provider = %response.provider_used,
            chars = response.content.len(),
            "Chat request completed"
        );
        self.publish(
            topics::RESPONSE_COMPLETE,
            json!({
                "request_id": id,
                "content": response.content,
                "provider": response.provider_used,
                "model": response.model_used,
                "intercepted_by": intercepted_by,
            }),
        );
    }

    fn publish_failed(&self, id: &str, err: &ChatError) {
        warn!(request_id = %id, error = %err, "Chat request failed");
        self.publish(
            topics::RESPONSE_FAILED,
            json!({ "request_id": id, "error": err.kind(), "message": err.to_string() }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use aether_core::{ChunkStream, ErrorKind, Provider};
    use aether_framework::{Plugin, PluginDescriptor, PluginMetadata};
    use async_trait::async_trait;

    struct Script {
        chunks: Vec<Chunk>,
        calls: AtomicUsize,
        stall: Option<Duration>,
    }

    #[async_trait]
    impl Provider for Script {
        fn name(&self) -> &str {
            "script"
        }

        fn default_model(&self) -> &str {
            "m"
        }

        fn complete_stream(&self, _request: ProviderRequest) -> ChunkStream<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let chunks = self.chunks.clone();
            let stall = self.stall;
            futures::stream::iter(chunks)
                .then(move |chunk| async move {
                    if let Some(stall) = stall {
                        tokio::time::sleep(stall).await;
                    }
                    chunk
                })
                .boxed()
        }
    }

    fn script(chunks: Vec<Chunk>) -> Arc<Script> {
        Arc::new(Script {
            chunks,
            calls: AtomicUsize::new(0),
            stall: None,
        })
    }

    fn orchestrator(provider: Arc<Script>) -> (ChatOrchestrator, Arc<PluginManager>) {
        let bus = EventBus::new();
        let plugins = Arc::new(PluginManager::new(bus.clone()));
        let providers = Arc::new(ProviderRegistry::new());
        let _ = providers.register(provider);
        let platforms = Arc::new(PlatformRegistry::new(bus.clone()));
        let orchestrator = ChatOrchestrator::new(bus, plugins.clone(), providers, platforms);
        (orchestrator, plugins)
    }

    #[tokio::test]
    async fn test_stream_and_complete_agree() {
        let provider = script(vec![Chunk::text("Hel"), Chunk::text("lo"), Chunk::done()]);
        let (orchestrator, _) = orchestrator(provider.clone());

        let chunks: Vec<Chunk> = orchestrator
            .chat_stream(ChatRequest::new("hi").streaming())
            .collect()
            .await;
        assert_eq!(chunks, vec![Chunk::text("Hel"), Chunk::text("lo"), Chunk::done()]);

        let response = orchestrator.chat(ChatRequest::new("hi")).await;
        let response = response.unwrap_or_else(|e| panic!("chat failed: {e}"));
        assert_eq!(response.content, "Hello");
        assert_eq!(response.provider_used, "script");
        assert_eq!(response.model_used, "m");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_timeout_is_terminal() {
        let provider = Arc::new(Script {
            chunks: vec![Chunk::text("a"), Chunk::text("b"), Chunk::done()],
            calls: AtomicUsize::new(0),
            stall: Some(Duration::from_secs(4)),
        });
        let (orchestrator, _) = orchestrator(provider);
        let orchestrator = orchestrator.with_settings(OrchestratorSettings {
            provider_timeout: Duration::from_secs(6),
            respond_to_inbound: false,
        });

        let chunks: Vec<Chunk> = orchestrator
            .chat_stream(ChatRequest::new("hi").streaming())
            .collect()
            .await;
        assert_eq!(chunks, vec![Chunk::text("a"), Chunk::Error(ChatError::Timeout)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_stalled_provider() {
        let provider = Arc::new(Script {
            chunks: vec![Chunk::text("late"), Chunk::done()],
            calls: AtomicUsize::new(0),
            stall: Some(Duration::from_secs(30)),
        });
        let (orchestrator, _) = orchestrator(provider);

        let stream = orchestrator.chat_stream(ChatRequest::new("hi"));
        stream.cancel();
        let chunks: Vec<Chunk> = stream.collect().await;
        assert_eq!(chunks, vec![Chunk::Error(ChatError::Cancelled)]);
    }

    #[tokio::test]
    async fn test_duplicate_request_id_rejected() {
        let provider = Arc::new(Script {
            chunks: vec![Chunk::text("x"), Chunk::done()],
            calls: AtomicUsize::new(0),
            stall: Some(Duration::from_millis(50)),
        });
        let (orchestrator, _) = orchestrator(provider.clone());

        let mut first = orchestrator.chat_stream(ChatRequest::new("a").with_id("req-1"));
        let second: Vec<Chunk> = orchestrator
            .chat_stream(ChatRequest::new("b").with_id("req-1"))
            .collect()
            .await;
        assert!(matches!(
            second.as_slice(),
            [Chunk::Error(err)] if err.kind() == ErrorKind::InvalidRequest
        ));

        assert_eq!(first.next().await, Some(Chunk::text("x")));
        assert_eq!(first.next().await, Some(Chunk::done()));
        assert_eq!(first.next().await, None);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_provider_fails_request_only() {
        let (orchestrator, _) = orchestrator(script(vec![Chunk::done()]));
        let result = orchestrator
            .chat(ChatRequest::new("hi").with_provider("missing"))
            .await;
        assert_eq!(
            result.err(),
            Some(ChatError::ProviderNotFound("missing".to_string()))
        );
        assert!(orchestrator.chat(ChatRequest::new("hi")).await.is_ok());
        assert_eq!(orchestrator.in_flight_count(), 0);
    }

    struct Canned;

    #[async_trait]
    impl Plugin for Canned {
        async fn intercept(&self, request: &ChatRequest) -> Result<Option<String>, BoxError> {
            Ok((request.message == "ping").then(|| "pong".to_string()))
        }
    }

    #[tokio::test]
    async fn test_intercept_skips_provider() {
        let provider = script(vec![Chunk::text("model"), Chunk::done()]);
        let (orchestrator, plugins) = orchestrator(provider.clone());
        let descriptor =
            PluginDescriptor::new("canned", PluginMetadata::new("1.0.0"), || Arc::new(Canned));
        assert!(plugins.register(descriptor).is_ok());
        assert!(plugins.load("canned").await.is_ok());

        let response = orchestrator.chat(ChatRequest::new("ping")).await;
        let response = response.unwrap_or_else(|e| panic!("chat failed: {e}"));
        assert_eq!(response.content, "pong");
        assert_eq!(response.provider_used, "plugin:canned");

        let chunks: Vec<Chunk> = orchestrator
            .chat_stream(ChatRequest::new("ping"))
            .collect()
            .await;
        assert_eq!(chunks, vec![Chunk::text("pong"), Chunk::done()]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_requests() {
        let (orchestrator, _) = orchestrator(script(vec![Chunk::done()]));
        assert_eq!(orchestrator.shutdown(Duration::from_millis(10)).await, 0);
        let result = orchestrator.chat(ChatRequest::new("hi")).await;
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::Unavailable));
    }
}
