//! End-to-end chat turns through the control surface.

mod common;

use std::sync::Arc;

use aether_core::wire::{Decoder, Frame};
use aether_core::{ChatRequest, Chunk, ErrorKind, topics};
use aether_framework::{BoxedPlugin, Plugin, PluginDescriptor, PluginMetadata};
use async_trait::async_trait;
use common::{Recorder, ScriptedProvider, runtime_with, test_config};
use futures::StreamExt;

#[tokio::test]
async fn test_stream_frames_match_completion() {
    let provider = ScriptedProvider::new(
        "main",
        vec![Chunk::text("Hel"), Chunk::text("lo"), Chunk::done()],
    );
    let runtime = runtime_with(&test_config(), provider.clone());
    let recorder = Recorder::attach(runtime.bus());
    let control = runtime.control();

    let frames: Vec<String> = control
        .chat_frames(ChatRequest::new("greet me").streaming())
        .collect()
        .await;
    assert_eq!(frames, vec!["data: Hel\n\n", "data: lo\n\n", "data: [DONE]\n\n"]);

    let response = control.chat(ChatRequest::new("greet me")).await;
    let response = response.unwrap_or_else(|e| panic!("chat failed: {e}"));
    assert_eq!(response.content, "Hello");
    assert_eq!(response.provider_used, "main");
    assert_eq!(provider.calls(), 2);

    runtime.bus().flush().await;
    let chunks = recorder.topic(topics::RESPONSE_CHUNK);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0]["index"], 0);
    assert_eq!(chunks[0]["text"], "Hel");
    assert_eq!(chunks[1]["text"], "lo");
    assert_eq!(recorder.count(topics::RESPONSE_COMPLETE), 2);
    assert_eq!(recorder.count(topics::RESPONSE_FAILED), 0);
}

#[tokio::test]
async fn test_collected_stream_publishes_chunks() {
    let provider = ScriptedProvider::new(
        "main",
        vec![Chunk::text("a"), Chunk::text("b"), Chunk::text("c"), Chunk::done()],
    );
    let runtime = runtime_with(&test_config(), provider);
    let recorder = Recorder::attach(runtime.bus());

    let response = runtime
        .control()
        .chat(ChatRequest::new("abc").streaming())
        .await;
    assert_eq!(response.ok().map(|r| r.content).as_deref(), Some("abc"));

    runtime.bus().flush().await;
    assert_eq!(recorder.count(topics::RESPONSE_CHUNK), 3);
    assert_eq!(recorder.count(topics::RESPONSE_COMPLETE), 1);
}

#[tokio::test]
async fn test_provider_timeout_mid_stream() {
    let mut config = test_config();
    config.timeouts.provider_ms = 100;
    let provider = ScriptedProvider::hanging("slow", vec![Chunk::text("partial")]);
    let runtime = runtime_with(&config, provider);
    let recorder = Recorder::attach(runtime.bus());

    let frames: Vec<String> = runtime
        .control()
        .chat_frames(ChatRequest::new("hi").with_id("slow-1").streaming())
        .collect()
        .await;
    assert_eq!(frames, vec!["data: partial\n\n", "data: [ERROR] Timeout\n\n"]);

    runtime.bus().flush().await;
    let failed = recorder.topic(topics::RESPONSE_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["request_id"], "slow-1");
    assert_eq!(failed[0]["error"], "Timeout");
    assert_eq!(recorder.count(topics::RESPONSE_COMPLETE), 0);
}

#[tokio::test]
async fn test_non_stream_timeout() {
    let mut config = test_config();
    config.timeouts.provider_ms = 50;
    let provider = ScriptedProvider::hanging("slow", Vec::new());
    let runtime = runtime_with(&config, provider);

    let result = runtime.control().chat(ChatRequest::new("hi")).await;
    assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::Timeout));
    assert_eq!(runtime.orchestrator().in_flight_count(), 0);
}

#[tokio::test]
async fn test_unconforming_stream_is_unavailable() {
    let provider = ScriptedProvider::new("broken", vec![Chunk::text("no terminal")]);
    let runtime = runtime_with(&test_config(), provider);

    let chunks: Vec<Chunk> = runtime
        .control()
        .chat_stream(ChatRequest::new("hi"))
        .collect()
        .await;
    assert_eq!(chunks.len(), 2);
    assert!(matches!(
        &chunks[1],
        Chunk::Error(err) if err.kind() == ErrorKind::Unavailable
    ));
}

#[tokio::test]
async fn test_escaped_fragments_decode_verbatim() {
    let provider = ScriptedProvider::new(
        "main",
        vec![
            Chunk::text("line one\nline two"),
            Chunk::text("[DONE]"),
            Chunk::text("C:\\path"),
            Chunk::done(),
        ],
    );
    let runtime = runtime_with(&test_config(), provider);

    let body: String = runtime
        .control()
        .chat_frames(ChatRequest::new("hi"))
        .collect::<Vec<_>>()
        .await
        .concat();

    // Feed in small reads so frames span several of them.
    let mut decoder = Decoder::new();
    let mut frames = Vec::new();
    for piece in body.as_bytes().chunks(3) {
        frames.extend(decoder.feed(piece));
    }
    frames.extend(decoder.finish());

    assert_eq!(
        frames,
        vec![
            Frame::Text("line one\nline two".to_string()),
            Frame::Text("[DONE]".to_string()),
            Frame::Text("C:\\path".to_string()),
            Frame::Done,
        ]
    );
}

#[tokio::test]
async fn test_concurrent_requests_are_independent() {
    let provider = ScriptedProvider::new("main", vec![Chunk::text("ok"), Chunk::done()]);
    let runtime = runtime_with(&test_config(), provider.clone());
    let control = runtime.control();

    let requests = (0..16).map(|i| {
        let control = control.clone();
        async move {
            control
                .chat(ChatRequest::new("hi").with_id(format!("req-{i}")))
                .await
        }
    });
    let results = futures::future::join_all(requests).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(provider.calls(), 16);
    assert_eq!(runtime.orchestrator().in_flight_count(), 0);
}

// ─── Plugin intercept ────────────────────────────────────────────────────────

struct Greeter {
    answers_ping: bool,
}

#[async_trait]
impl Plugin for Greeter {
    async fn intercept(
        &self,
        request: &ChatRequest,
    ) -> Result<Option<String>, aether_core::BoxError> {
        Ok((self.answers_ping && request.message == "ping").then(|| "Hi from greeter".to_string()))
    }
}

fn greeter(version: &str, answers_ping: bool) -> PluginDescriptor {
    PluginDescriptor::new("greeter", PluginMetadata::new(version), move || {
        Arc::new(Greeter { answers_ping }) as BoxedPlugin
    })
}

#[tokio::test]
async fn test_reloaded_plugin_intercepts_without_provider_call() {
    let provider = ScriptedProvider::new("main", vec![Chunk::text("from model"), Chunk::done()]);
    let runtime = runtime_with(&test_config(), provider.clone());
    let recorder = Recorder::attach(runtime.bus());
    runtime
        .register_plugin(greeter("1.0.0", false))
        .unwrap_or_else(|e| panic!("register failed: {e}"));
    assert!(runtime.start().await.is_ok());

    let control = runtime.control();
    let before = control.chat(ChatRequest::new("ping")).await;
    assert_eq!(before.ok().map(|r| r.content).as_deref(), Some("from model"));
    assert_eq!(provider.calls(), 1);

    assert!(
        runtime
            .plugins()
            .replace_descriptor(greeter("2.0.0", true))
            .await
            .is_ok()
    );
    assert!(control.reload_plugin("greeter").await.is_ok());

    let after = control.chat(ChatRequest::new("ping")).await;
    let after = after.unwrap_or_else(|e| panic!("chat failed: {e}"));
    assert_eq!(after.content, "Hi from greeter");
    assert_eq!(after.provider_used, "plugin:greeter");
    assert_eq!(provider.calls(), 1);

    runtime.bus().flush().await;
    let completed = recorder.topic(topics::RESPONSE_COMPLETE);
    assert_eq!(
        completed.last().map(|p| p["intercepted_by"].clone()),
        Some(serde_json::json!("greeter"))
    );

    let info = control
        .list_plugins()
        .into_iter()
        .find(|p| p.name == "greeter");
    assert_eq!(info.map(|p| p.version).as_deref(), Some("2.0.0"));

    assert!(runtime.stop().await.is_ok());
}

#[tokio::test]
async fn test_stop_rejects_new_chats() {
    let provider = ScriptedProvider::new("main", vec![Chunk::done()]);
    let runtime = runtime_with(&test_config(), provider.clone());
    assert!(runtime.start().await.is_ok());
    assert!(runtime.stop().await.is_ok());

    let frames: Vec<String> = runtime
        .control()
        .chat_frames(ChatRequest::new("late"))
        .collect()
        .await;
    assert_eq!(frames.len(), 1);
    assert!(frames[0].starts_with("data: [ERROR] Unavailable"));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_builtin_chat_plugin_reaches_default_provider() {
    let provider = ScriptedProvider::new("main", vec![Chunk::text("from model"), Chunk::done()]);
    let runtime = runtime_with(&test_config(), provider.clone());
    assert!(runtime.start().await.is_ok());
    let control = runtime.control();

    let reply = control.chat(ChatRequest::new("/chat tell me")).await;
    let reply = reply.unwrap_or_else(|e| panic!("chat failed: {e}"));
    assert_eq!(reply.content, "from model");
    assert_eq!(reply.provider_used, "plugin:chat");
    assert_eq!(provider.calls(), 1);

    let reply = control.chat(ChatRequest::new("/setprompt Be terse.")).await;
    assert_eq!(
        reply.ok().map(|r| r.content).as_deref(),
        Some("System prompt updated!")
    );
    assert_eq!(provider.calls(), 1);

    assert!(runtime.stop().await.is_ok());
}
