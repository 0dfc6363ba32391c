//! Shared fixtures for runtime integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use aether_core::{
    Chunk, ChunkStream, EventBus, Provider, ProviderRequest, handler_fn,
};
use aether_runtime::{AetherConfig, AetherRuntime};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;

/// Provider that replays a fixed chunk script, optionally hanging afterwards.
pub struct ScriptedProvider {
    name: String,
    script: Vec<Chunk>,
    hang_after: bool,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(name: &str, script: Vec<Chunk>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script,
            hang_after: false,
            calls: AtomicUsize::new(0),
        })
    }

    /// Emits `script` and then never produces another chunk.
    pub fn hanging(name: &str, script: Vec<Chunk>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script,
            hang_after: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }

    fn complete_stream(&self, _request: ProviderRequest) -> ChunkStream<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let chunks = futures::stream::iter(self.script.clone());
        if self.hang_after {
            chunks.chain(futures::stream::pending()).boxed()
        } else {
            chunks.boxed()
        }
    }
}

/// Records every event on the bus as `(topic, payload)`.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Recorder {
    pub fn attach(bus: &EventBus) -> Self {
        let recorder = Self::default();
        let events = Arc::clone(&recorder.events);
        bus.subscribe(
            "*",
            "recorder",
            handler_fn(move |event| {
                let events = Arc::clone(&events);
                async move {
                    events
                        .lock()
                        .push((event.topic().to_string(), event.payload().clone()));
                    Ok(())
                }
            }),
        );
        recorder
    }

    pub fn topic(&self, topic: &str) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.topic(topic).len()
    }
}

/// Defaults tuned for fast tests.
pub fn test_config() -> AetherConfig {
    let mut config = AetherConfig::default();
    config.runtime.shutdown_grace_ms = 200;
    config.runtime.respond_to_inbound = false;
    config.retry.max_retries = 1;
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.timeouts.platform_connect_ms = 100;
    config.timeouts.plugin_hook_ms = 500;
    config
}

pub fn runtime_with(config: &AetherConfig, provider: Arc<ScriptedProvider>) -> AetherRuntime {
    let runtime = AetherRuntime::from_config(config);
    runtime
        .register_provider(provider)
        .unwrap_or_else(|e| panic!("provider registration failed: {e}"));
    runtime
}

/// Polls `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
