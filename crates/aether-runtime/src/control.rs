//! Control surface for external front ends.
//!
//! An admin dashboard or HTTP layer drives the runtime through [`Control`].
//! Every command goes through the same registries and orchestrator the
//! runtime itself uses.

use aether_core::{ChatRequest, ChatResponse, ChatResult, wire};
use aether_framework::{PluginInfo, PluginResult};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::chat::ChatStream;
use crate::error::RuntimeResult;
use crate::registry::{PlatformInfo, ProviderInfo};
use crate::runtime::{AetherRuntime, ReloadSummary};

/// Health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeStatus {
    pub running: bool,
    pub plugins: usize,
    pub active_plugins: usize,
    pub platforms: usize,
    pub connected_platforms: usize,
    pub providers: usize,
    pub in_flight: usize,
    pub dropped_events: u64,
}

/// Command handle over a runtime.
#[derive(Clone, Debug)]
pub struct Control {
    runtime: AetherRuntime,
}

impl Control {
    pub fn new(runtime: AetherRuntime) -> Self {
        Self { runtime }
    }

    // ─── Plugins ─────────────────────────────────────────────────────────────

    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.runtime.plugins().list()
    }

    pub async fn reload_plugin(&self, name: &str) -> PluginResult<()> {
        self.runtime.plugins().reload(name).await
    }

    pub async fn enable_plugin(&self, name: &str) -> PluginResult<()> {
        self.runtime.plugins().enable(name).await
    }

    pub async fn disable_plugin(&self, name: &str) -> PluginResult<()> {
        self.runtime.plugins().disable(name).await
    }

    // ─── Platforms / Providers ───────────────────────────────────────────────

    pub fn list_platforms(&self) -> Vec<PlatformInfo> {
        self.runtime.platforms().list()
    }

    /// Reconnects `name`. On failure the platform stays registered in
    /// `error`.
    pub async fn reconnect_platform(&self, name: &str) -> RuntimeResult<()> {
        Ok(self.runtime.platforms().reconnect(name).await?)
    }

    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        self.runtime.providers().list()
    }

    // ─── Chat ────────────────────────────────────────────────────────────────

    pub async fn chat(&self, request: ChatRequest) -> ChatResult<ChatResponse> {
        self.runtime.orchestrator().chat(request).await
    }

    /// Starts a streaming turn and returns its chunks.
    pub fn chat_stream(&self, request: ChatRequest) -> ChatStream {
        self.runtime.orchestrator().chat_stream(request)
    }

    /// Starts a streaming turn encoded as event-stream frames.
    ///
    /// Each item is one complete `data: …\n\n` frame, ready to write to the
    /// client as-is. The last frame is `data: [DONE]` or `data: [ERROR] …`.
    /// Dropping the stream cancels the turn.
    pub fn chat_frames(&self, request: ChatRequest) -> BoxStream<'static, String> {
        self.chat_stream(request)
            .map(|chunk| wire::encode_chunk(&chunk))
            .boxed()
    }

    // ─── Runtime ─────────────────────────────────────────────────────────────

    pub async fn reload_config(&self) -> RuntimeResult<ReloadSummary> {
        self.runtime.reload_config().await
    }

    pub fn status(&self) -> RuntimeStatus {
        let runtime = &self.runtime;
        RuntimeStatus {
            running: runtime.is_running(),
            plugins: runtime.plugins().plugin_count(),
            active_plugins: runtime.plugins().active_count(),
            platforms: runtime.platforms().len(),
            connected_platforms: runtime.platforms().connected_count(),
            providers: runtime.providers().len(),
            in_flight: runtime.orchestrator().in_flight_count(),
            dropped_events: runtime.bus().dropped_count(),
        }
    }
}
