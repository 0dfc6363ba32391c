//! The OpenAI provider.

use aether_core::wire::{LineBuffer, data_field};
use aether_core::{
    BoxError, ChatError, ChatResponse, ChatResult, Chunk, ChunkStream, Completion,
    ConfigurableProvider, Provider, ProviderRequest, ProviderSpec, Usage,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use tracing::{debug, warn};

use crate::config::{DEFAULT_BASE_URL, DEFAULT_MODEL, OpenAiConfig};
use crate::error::{retry_after, transport_error, vendor_error};
use crate::model::{Completion as WireCompletion, CompletionChunk, CompletionRequest, StreamOptions};

/// Provider backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiProvider {
    name: String,
    default_model: String,
    models: Vec<String>,
    api_key: Option<String>,
    endpoint: String,
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    /// Creates a provider from its registry spec and settings.
    pub fn new(spec: ProviderSpec, config: OpenAiConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        let base_url = spec.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);

        Ok(Self {
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            default_model: spec.default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            name: spec.name,
            models: spec.models,
            api_key: spec.api_key,
            config,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn body<'a>(&self, request: &'a ProviderRequest, stream: bool) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &request.model,
            messages: &request.messages,
            stream,
            stream_options: (stream && self.config.include_usage)
                .then_some(StreamOptions { include_usage: true }),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }

    /// Posts `body`, retrying transient failures until a success status.
    async fn send(&self, body: &CompletionRequest<'_>) -> ChatResult<Response> {
        let policy = self.config.retry_policy();
        let mut retry = 0;
        loop {
            let err = match self.send_once(body).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            if !err.is_transient() || retry >= policy.max_retries {
                return Err(err);
            }
            let delay = match &err {
                ChatError::RateLimited {
                    retry_after: Some(hint),
                } => (*hint).min(policy.max_delay),
                _ => policy.delay_for(retry),
            };
            warn!(
                provider = %self.name,
                retry = retry + 1,
                ?delay,
                error = %err,
                "Retrying chat completion"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    async fn send_once(&self, body: &CompletionRequest<'_>) -> ChatResult<Response> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(org) = &self.config.organization {
            request = request.header("OpenAI-Organization", org);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let hint = retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        Err(vendor_error(status.as_u16(), &text, hint))
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.name)
            .field("default_model", &self.default_model)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn supported_models(&self) -> &[String] {
        &self.models
    }

    async fn complete(&self, request: ProviderRequest) -> ChatResult<ChatResponse> {
        let body = self.body(&request, false);
        debug!(provider = %self.name, model = %request.model, "Sending chat completion");

        let response = self.send(&body).await?;
        let completion: WireCompletion = response
            .json()
            .await
            .map_err(|e| ChatError::unavailable(format!("malformed completion: {e}")))?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::unavailable("completion had no choices"))?;

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            provider_used: self.name.clone(),
            model_used: request.model.clone(),
            usage: completion.usage.map(Usage::from),
            finish_reason: choice.finish_reason,
        })
    }

    fn complete_stream(&self, request: ProviderRequest) -> ChunkStream<'_> {
        Box::pin(async_stream::stream! {
            let body = self.body(&request, true);
            debug!(
                provider = %self.name,
                model = %request.model,
                messages = request.messages.len(),
                "Streaming chat completion"
            );

            let response = match self.send(&body).await {
                Ok(response) => response,
                Err(err) => {
                    yield Chunk::Error(err);
                    return;
                }
            };

            let mut bytes = response.bytes_stream();
            let mut lines = LineBuffer::new();
            let mut state = StreamState::default();

            while let Some(read) = bytes.next().await {
                let read = match read {
                    Ok(read) => read,
                    Err(err) => {
                        yield Chunk::Error(transport_error(err));
                        return;
                    }
                };
                for line in lines.push(&read) {
                    if let Some(chunk) = state.step(&line) {
                        let terminal = chunk.is_terminal();
                        yield chunk;
                        if terminal {
                            return;
                        }
                    }
                }
            }

            let tail = lines.finish().and_then(|line| state.step(&line));
            if let Some(chunk) = tail {
                let terminal = chunk.is_terminal();
                yield chunk;
                if terminal {
                    return;
                }
            }
            yield state.close();
        })
    }
}

impl ConfigurableProvider for OpenAiProvider {
    const TYPE: &'static str = "openai";

    type Config = OpenAiConfig;

    fn from_config(spec: ProviderSpec, config: Self::Config) -> Result<Self, BoxError> {
        Ok(Self::new(spec, config)?)
    }
}

// ─── Stream parsing ──────────────────────────────────────────────────────────

/// Per-call parse state of a streamed completion.
#[derive(Debug, Default)]
struct StreamState {
    usage: Option<Usage>,
    finish_reason: Option<String>,
}

impl StreamState {
    /// Interprets one body line, returning the chunk it produces, if any.
    fn step(&mut self, line: &str) -> Option<Chunk> {
        let data = data_field(line)?.trim();
        if data.is_empty() {
            return None;
        }
        if data == "[DONE]" {
            return Some(Chunk::Done(self.completion()));
        }

        let event: CompletionChunk = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(err) => {
                return Some(Chunk::Error(ChatError::unavailable(format!(
                    "malformed stream event: {err}"
                ))));
            }
        };
        if let Some(error) = event.error {
            return Some(Chunk::Error(ChatError::unavailable(error.message)));
        }
        if let Some(usage) = event.usage {
            self.usage = Some(usage.into());
        }

        let mut text = String::new();
        for choice in event.choices {
            if let Some(content) = choice.delta.content {
                text.push_str(&content);
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }
        (!text.is_empty()).then_some(Chunk::Text(text))
    }

    /// Terminal chunk for a body that closed without `[DONE]`.
    ///
    /// Some compatible servers omit the marker; a reported finish reason
    /// is accepted as completion.
    fn close(&mut self) -> Chunk {
        if self.finish_reason.is_some() {
            Chunk::Done(self.completion())
        } else {
            Chunk::Error(ChatError::unavailable("stream closed before completion"))
        }
    }

    fn completion(&mut self) -> Completion {
        Completion {
            usage: self.usage.take(),
            finish_reason: self.finish_reason.take(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use aether_core::{ChatMessage, ErrorKind};
    use axum::Router;
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::HeaderMap;
    use axum::response::Response as AxumResponse;
    use axum::routing::post;

    use super::*;

    struct Canned {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: String,
    }

    impl Canned {
        fn sse(body: &str) -> Self {
            Self {
                status: 200,
                headers: vec![("content-type", "text/event-stream".to_string())],
                body: body.to_string(),
            }
        }

        fn json(status: u16, body: serde_json::Value) -> Self {
            Self {
                status,
                headers: vec![("content-type", "application/json".to_string())],
                body: body.to_string(),
            }
        }

        fn header(mut self, name: &'static str, value: &str) -> Self {
            self.headers.push((name, value.to_string()));
            self
        }
    }

    struct Captured {
        headers: HeaderMap,
        body: serde_json::Value,
    }

    /// Serves `responses` in order on `/chat/completions` and records each
    /// request.
    async fn start_mock(responses: Vec<Canned>) -> (String, Arc<Mutex<Vec<Captured>>>) {
        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));
        let captured: Arc<Mutex<Vec<Captured>>> = Arc::new(Mutex::new(Vec::new()));
        let captured_clone = captured.clone();

        let app = Router::new().route(
            "/chat/completions",
            post(move |req: Request| {
                let queue = queue.clone();
                let cap = captured_clone.clone();
                async move {
                    let headers = req.headers().clone();
                    let bytes = axum::body::to_bytes(req.into_body(), 1024 * 1024)
                        .await
                        .unwrap_or_default();
                    let body = serde_json::from_slice(&bytes).unwrap_or_default();
                    cap.lock().unwrap().push(Captured { headers, body });

                    let canned = queue
                        .lock()
                        .unwrap()
                        .pop_front()
                        .unwrap_or_else(|| Canned::json(500, serde_json::json!({})));
                    let mut builder = AxumResponse::builder().status(canned.status);
                    for (name, value) in canned.headers {
                        builder = builder.header(name, value);
                    }
                    builder.body(Body::from(canned.body)).unwrap()
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), captured)
    }

    fn provider(base_url: &str, config: OpenAiConfig) -> OpenAiProvider {
        let spec = ProviderSpec {
            name: "oa".into(),
            api_key: Some("test-key".into()),
            base_url: Some(base_url.into()),
            ..Default::default()
        };
        OpenAiProvider::new(spec, config).unwrap()
    }

    fn fast_retry() -> OpenAiConfig {
        OpenAiConfig {
            retry_initial_ms: 1,
            retry_max_ms: 5,
            ..Default::default()
        }
    }

    fn request() -> ProviderRequest {
        ProviderRequest::new(
            "gpt-4o-mini",
            vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
        )
    }

    #[tokio::test]
    async fn test_stream_yields_deltas_and_usage() {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":9,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n",
        );
        let (url, captured) = start_mock(vec![Canned::sse(sse)]).await;
        let provider = provider(&url, OpenAiConfig::default());

        let chunks: Vec<Chunk> = provider.complete_stream(request()).collect().await;
        assert_eq!(
            chunks,
            vec![
                Chunk::text("Hel"),
                Chunk::text("lo"),
                Chunk::Done(Completion {
                    usage: Some(Usage {
                        input_tokens: 9,
                        output_tokens: 2
                    }),
                    finish_reason: Some("stop".into()),
                }),
            ]
        );

        let captured = captured.lock().unwrap();
        let sent = &captured[0];
        assert_eq!(sent.headers["authorization"], "Bearer test-key");
        assert_eq!(sent.body["model"], "gpt-4o-mini");
        assert_eq!(sent.body["stream"], true);
        assert_eq!(sent.body["stream_options"]["include_usage"], true);
        assert_eq!(sent.body["messages"][0]["role"], "system");
        assert_eq!(sent.body["messages"][1]["content"], "hi");
        assert!(sent.body.get("temperature").is_none());
    }

    #[tokio::test]
    async fn test_auth_failure_uses_vendor_message() {
        let (url, _) = start_mock(vec![Canned::json(
            401,
            serde_json::json!({"error": {"message": "Incorrect API key provided"}}),
        )])
        .await;
        let provider = provider(&url, fast_retry());

        let chunks: Vec<Chunk> = provider.complete_stream(request()).collect().await;
        assert_eq!(
            chunks,
            vec![Chunk::Error(ChatError::auth(
                "HTTP 401: Incorrect API key provided"
            ))]
        );
    }

    #[tokio::test]
    async fn test_rate_limit_retried_before_first_chunk() {
        let (url, captured) = start_mock(vec![
            Canned::json(429, serde_json::json!({"error": {"message": "slow down"}}))
                .header("retry-after", "0"),
            Canned::sse("data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n"),
        ])
        .await;
        let provider = provider(&url, fast_retry());

        let response = provider.complete_stream(request()).collect::<Vec<_>>().await;
        assert_eq!(response.first(), Some(&Chunk::text("ok")));
        assert!(matches!(response.last(), Some(Chunk::Done(_))));
        assert_eq!(captured.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_exhausted_reports_hint() {
        let (url, captured) = start_mock(vec![
            Canned::json(429, serde_json::json!({"error": {"message": "slow down"}}))
                .header("retry-after", "7"),
        ])
        .await;
        let config = OpenAiConfig {
            max_retries: 0,
            ..fast_retry()
        };
        let provider = provider(&url, config);

        let result = provider.complete(request()).await;
        assert_eq!(
            result.err(),
            Some(ChatError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            })
        );
        assert_eq!(captured.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_event_is_unavailable() {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n",
            "data: {not json\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n",
        );
        let (url, _) = start_mock(vec![Canned::sse(sse)]).await;
        let provider = provider(&url, OpenAiConfig::default());

        let chunks: Vec<Chunk> = provider.complete_stream(request()).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], Chunk::text("par"));
        assert!(matches!(&chunks[1], Chunk::Error(e) if e.kind() == ErrorKind::Unavailable));
    }

    #[tokio::test]
    async fn test_error_event_mid_stream() {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"server overloaded\"}}\n\n",
        );
        let (url, _) = start_mock(vec![Canned::sse(sse)]).await;
        let provider = provider(&url, OpenAiConfig::default());

        let chunks: Vec<Chunk> = provider.complete_stream(request()).collect().await;
        assert_eq!(
            chunks,
            vec![
                Chunk::text("a"),
                Chunk::Error(ChatError::unavailable("server overloaded")),
            ]
        );
    }

    #[tokio::test]
    async fn test_close_without_done_marker() {
        // Finish reason seen, no [DONE], no trailing newline.
        let finished = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"},\"finish_reason\":\"stop\"}]}\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":1}}",
        );
        let truncated = "data: {\"choices\":[{\"delta\":{\"content\":\"cut\"}}]}\n\n";
        let (url, _) = start_mock(vec![Canned::sse(finished), Canned::sse(truncated)]).await;
        let provider = provider(&url, OpenAiConfig::default());

        let chunks: Vec<Chunk> = provider.complete_stream(request()).collect().await;
        assert_eq!(
            chunks.last(),
            Some(&Chunk::Done(Completion {
                usage: Some(Usage {
                    input_tokens: 3,
                    output_tokens: 1
                }),
                finish_reason: Some("stop".into()),
            }))
        );

        let chunks: Vec<Chunk> = provider.complete_stream(request()).collect().await;
        assert_eq!(chunks[0], Chunk::text("cut"));
        assert!(matches!(&chunks[1], Chunk::Error(e) if e.kind() == ErrorKind::Unavailable));
    }

    #[tokio::test]
    async fn test_complete_uses_non_streaming_endpoint() {
        let (url, captured) = start_mock(vec![Canned::json(
            200,
            serde_json::json!({
                "id": "chatcmpl-1",
                "model": "gpt-4o-mini-2024-07-18",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "Hello there"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
            }),
        )])
        .await;
        let provider = provider(&url, OpenAiConfig::default());

        let mut req = request();
        req.temperature = Some(0.5);
        let response = provider.complete(req).await.unwrap();
        assert_eq!(response.content, "Hello there");
        assert_eq!(response.provider_used, "oa");
        assert_eq!(response.model_used, "gpt-4o-mini");
        assert_eq!(response.usage.map(|u| u.total()), Some(7));
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));

        let captured = captured.lock().unwrap();
        assert_eq!(captured[0].body["stream"], false);
        assert!(captured[0].body.get("stream_options").is_none());
        assert_eq!(captured[0].body["temperature"], 0.5);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = OpenAiConfig {
            max_retries: 0,
            ..Default::default()
        };
        let provider = provider(&format!("http://{addr}"), config);
        let result = provider.complete(request()).await;
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::Unavailable));
    }

    #[test]
    fn test_spec_defaults() {
        let provider = OpenAiProvider::new(
            ProviderSpec {
                name: "oa".into(),
                ..Default::default()
            },
            OpenAiConfig::default(),
        )
        .unwrap();
        assert_eq!(provider.default_model(), DEFAULT_MODEL);
        assert_eq!(
            provider.endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert!(provider.supports_model("anything"));
    }
}
