//! The Gemini provider.

use aether_core::wire::{LineBuffer, data_field};
use aether_core::{
    BoxError, ChatError, ChatResponse, ChatResult, Chunk, ChunkStream, Completion,
    ConfigurableProvider, Provider, ProviderRequest, ProviderSpec, Usage,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use tracing::{debug, warn};

use crate::config::{DEFAULT_BASE_URL, DEFAULT_MODEL, GeminiConfig};
use crate::error::{event_error, retry_after, transport_error, vendor_error};
use crate::model::{GenerateRequest, GenerateResponse, GenerationConfig};

/// Provider backed by the Gemini `generateContent` API.
pub struct GeminiProvider {
    name: String,
    default_model: String,
    models: Vec<String>,
    api_key: Option<String>,
    base_url: String,
    config: GeminiConfig,
    client: Client,
}

impl GeminiProvider {
    pub fn new(spec: ProviderSpec, config: GeminiConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        let base_url = spec.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: spec.default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            name: spec.name,
            models: spec.models,
            api_key: spec.api_key,
            config,
            client,
        })
    }

    /// URL of `method` on `model`, e.g. `generateContent`.
    pub fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{model}:{method}", self.base_url)
    }

    fn body<'a>(&self, request: &'a ProviderRequest) -> GenerateRequest<'a> {
        GenerateRequest::new(
            &request.messages,
            GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens.or(self.config.max_output_tokens),
            },
        )
    }

    /// Posts `body` to `url`, retrying transient failures until a success
    /// status.
    async fn send(&self, url: &str, body: &GenerateRequest<'_>) -> ChatResult<Response> {
        let policy = self.config.retry_policy();
        let mut retry = 0;
        loop {
            let err = match self.send_once(url, body).await {
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
            warn!(provider = %self.name, retry = retry + 1, ?delay, error = %err, "Retrying Gemini request");
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    async fn send_once(&self, url: &str, body: &GenerateRequest<'_>) -> ChatResult<Response> {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("x-goog-api-key", key);
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

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("name", &self.name)
            .field("default_model", &self.default_model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for GeminiProvider {
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
        let url = self.endpoint(&request.model, "generateContent");
        debug!(provider = %self.name, model = %request.model, "Sending generateContent");

        let response = self.send(&url, &self.body(&request)).await?;
        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ChatError::unavailable(format!("malformed response: {e}")))?;
        if let Some(error) = generated.error {
            return Err(event_error(error));
        }
        if generated.candidates.is_empty() {
            return Err(ChatError::unavailable("response had no candidates"));
        }

        Ok(ChatResponse {
            content: generated.text(),
            provider_used: self.name.clone(),
            model_used: request.model.clone(),
            usage: generated.usage_metadata.map(Usage::from),
            finish_reason: generated.finish_reason().map(str::to_string),
        })
    }

    fn complete_stream(&self, request: ProviderRequest) -> ChunkStream<'_> {
        Box::pin(async_stream::stream! {
            let url = format!("{}?alt=sse", self.endpoint(&request.model, "streamGenerateContent"));
            debug!(
                provider = %self.name,
                model = %request.model,
                messages = request.messages.len(),
                "Streaming generateContent"
            );

            let response = match self.send(&url, &self.body(&request)).await {
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

            if let Some(chunk) = lines.finish().and_then(|line| state.step(&line)) {
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

impl ConfigurableProvider for GeminiProvider {
    const TYPE: &'static str = "gemini";

    type Config = GeminiConfig;

    fn from_config(spec: ProviderSpec, config: Self::Config) -> Result<Self, BoxError> {
        Ok(Self::new(spec, config)?)
    }
}

// ─── Stream parsing ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct StreamState {
    usage: Option<Usage>,
    finish_reason: Option<String>,
}

impl StreamState {
    fn step(&mut self, line: &str) -> Option<Chunk> {
        let data = data_field(line)?.trim();
        if data.is_empty() {
            return None;
        }
        let event: GenerateResponse = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(err) => {
                return Some(Chunk::Error(ChatError::unavailable(format!(
                    "malformed stream event: {err}"
                ))));
            }
        };
        if let Some(error) = event.error {
            return Some(Chunk::Error(event_error(error)));
        }
        // Usage is cumulative; the last report wins.
        if let Some(usage) = event.usage_metadata {
            self.usage = Some(usage.into());
        }
        if let Some(reason) = event.finish_reason() {
            self.finish_reason = Some(reason.to_string());
        }
        let text = event.text();
        (!text.is_empty()).then_some(Chunk::Text(text))
    }

    /// Terminal chunk once the body has closed.
    fn close(&mut self) -> Chunk {
        match self.finish_reason.take() {
            Some(reason) => Chunk::Done(Completion {
                usage: self.usage.take(),
                finish_reason: Some(reason),
            }),
            None => Chunk::Error(ChatError::unavailable("stream closed before completion")),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

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
        content_type: &'static str,
        body: String,
    }

    impl Canned {
        fn sse(body: &str) -> Self {
            Self {
                status: 200,
                content_type: "text/event-stream",
                body: body.to_string(),
            }
        }

        fn json(status: u16, body: serde_json::Value) -> Self {
            Self {
                status,
                content_type: "application/json",
                body: body.to_string(),
            }
        }
    }

    struct Captured {
        uri: String,
        headers: HeaderMap,
        body: serde_json::Value,
    }

    /// Serves `responses` in order on every `models/*` path.
    async fn start_mock(responses: Vec<Canned>) -> (String, Arc<Mutex<Vec<Captured>>>) {
        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));
        let captured: Arc<Mutex<Vec<Captured>>> = Arc::new(Mutex::new(Vec::new()));
        let cap = captured.clone();

        let app = Router::new().route(
            "/models/{call}",
            post(move |req: Request| {
                let queue = queue.clone();
                let cap = cap.clone();
                async move {
                    let uri = req.uri().to_string();
                    let headers = req.headers().clone();
                    let bytes = axum::body::to_bytes(req.into_body(), 1024 * 1024)
                        .await
                        .unwrap_or_default();
                    let body = serde_json::from_slice(&bytes).unwrap_or_default();
                    cap.lock().unwrap().push(Captured { uri, headers, body });

                    let canned = queue
                        .lock()
                        .unwrap()
                        .pop_front()
                        .unwrap_or_else(|| Canned::json(500, serde_json::json!({})));
                    AxumResponse::builder()
                        .status(canned.status)
                        .header("content-type", canned.content_type)
                        .body(Body::from(canned.body))
                        .unwrap()
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

    fn provider(base_url: &str, config: GeminiConfig) -> GeminiProvider {
        let spec = ProviderSpec {
            name: "gm".into(),
            api_key: Some("g-key".into()),
            base_url: Some(base_url.into()),
            ..Default::default()
        };
        GeminiProvider::new(spec, config).unwrap()
    }

    fn request() -> ProviderRequest {
        ProviderRequest::new(
            "gemini-pro",
            vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
        )
    }

    #[tokio::test]
    async fn test_stream_yields_parts_and_usage() {
        let sse = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}],\"role\":\"model\"}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}],\"role\":\"model\"},\"finishReason\":\"STOP\"}],",
            "\"usageMetadata\":{\"promptTokenCount\":4,\"candidatesTokenCount\":2,\"totalTokenCount\":6}}\r\n\r\n",
        );
        let (url, captured) = start_mock(vec![Canned::sse(sse)]).await;
        let provider = provider(&url, GeminiConfig::default());

        let chunks: Vec<Chunk> = provider.complete_stream(request()).collect().await;
        assert_eq!(
            chunks,
            vec![
                Chunk::text("Hel"),
                Chunk::text("lo"),
                Chunk::Done(Completion {
                    usage: Some(Usage {
                        input_tokens: 4,
                        output_tokens: 2
                    }),
                    finish_reason: Some("STOP".into()),
                }),
            ]
        );

        let captured = captured.lock().unwrap();
        let sent = &captured[0];
        assert_eq!(sent.uri, "/models/gemini-pro:streamGenerateContent?alt=sse");
        assert_eq!(sent.headers["x-goog-api-key"], "g-key");
        assert_eq!(sent.body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(sent.body["contents"][0]["role"], "user");
        assert_eq!(sent.body["contents"][0]["parts"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn test_complete_reads_first_candidate() {
        let (url, captured) = start_mock(vec![Canned::json(
            200,
            serde_json::json!({
                "candidates": [{
                    "content": {"parts": [{"text": "Hello "}, {"text": "there"}], "role": "model"},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 2}
            }),
        )])
        .await;
        let config = GeminiConfig {
            max_output_tokens: Some(256),
            ..Default::default()
        };
        let provider = provider(&url, config);

        let response = provider.complete(request()).await.unwrap();
        assert_eq!(response.content, "Hello there");
        assert_eq!(response.provider_used, "gm");
        assert_eq!(response.model_used, "gemini-pro");
        assert_eq!(response.usage.map(|u| u.total()), Some(7));
        assert_eq!(response.finish_reason.as_deref(), Some("STOP"));

        let captured = captured.lock().unwrap();
        assert_eq!(captured[0].uri, "/models/gemini-pro:generateContent");
        assert_eq!(captured[0].body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[tokio::test]
    async fn test_bad_key_is_auth_failure() {
        let (url, _) = start_mock(vec![Canned::json(
            403,
            serde_json::json!({"error": {"code": 403, "message": "Permission denied", "status": "PERMISSION_DENIED"}}),
        )])
        .await;
        let provider = provider(&url, GeminiConfig::default());

        let chunks: Vec<Chunk> = provider.complete_stream(request()).collect().await;
        assert_eq!(
            chunks,
            vec![Chunk::Error(ChatError::auth("HTTP 403: Permission denied"))]
        );
    }

    #[tokio::test]
    async fn test_overload_retried_before_first_chunk() {
        let done = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"ok\"}]},\"finishReason\":\"STOP\"}]}\n\n";
        let (url, captured) = start_mock(vec![
            Canned::json(503, serde_json::json!({"error": {"message": "overloaded", "status": "UNAVAILABLE"}})),
            Canned::sse(done),
        ])
        .await;
        let config = GeminiConfig {
            retry_initial_ms: 1,
            retry_max_ms: 5,
            ..Default::default()
        };
        let provider = provider(&url, config);

        let chunks: Vec<Chunk> = provider.complete_stream(request()).collect().await;
        assert_eq!(chunks.first(), Some(&Chunk::text("ok")));
        assert!(matches!(chunks.last(), Some(Chunk::Done(_))));
        assert_eq!(captured.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_truncated_stream_is_unavailable() {
        let sse = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"cut\"}]}}]}\n\n";
        let (url, _) = start_mock(vec![Canned::sse(sse)]).await;
        let provider = provider(&url, GeminiConfig::default());

        let chunks: Vec<Chunk> = provider.complete_stream(request()).collect().await;
        assert_eq!(chunks[0], Chunk::text("cut"));
        assert!(matches!(&chunks[1], Chunk::Error(e) if e.kind() == ErrorKind::Unavailable));
    }

    #[tokio::test]
    async fn test_error_event_mid_stream() {
        let sse = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"a\"}]}}]}\n\n",
            "data: {\"error\":{\"code\":429,\"message\":\"quota\",\"status\":\"RESOURCE_EXHAUSTED\"}}\n\n",
        );
        let (url, _) = start_mock(vec![Canned::sse(sse)]).await;
        let provider = provider(&url, GeminiConfig::default());

        let chunks: Vec<Chunk> = provider.complete_stream(request()).collect().await;
        assert_eq!(
            chunks,
            vec![
                Chunk::text("a"),
                Chunk::Error(ChatError::RateLimited { retry_after: None }),
            ]
        );
    }

    #[test]
    fn test_spec_defaults() {
        let provider = GeminiProvider::new(
            ProviderSpec {
                name: "gm".into(),
                ..Default::default()
            },
            GeminiConfig::default(),
        )
        .unwrap();
        assert_eq!(provider.default_model(), DEFAULT_MODEL);
        assert_eq!(
            provider.endpoint("gemini-pro", "generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent"
        );
    }
}
