//! The Anthropic provider.

use aether_core::wire::{LineBuffer, data_field};
use aether_core::{
    BoxError, ChatError, ChatResponse, ChatResult, Chunk, ChunkStream, Completion,
    ConfigurableProvider, Provider, ProviderRequest, ProviderSpec, Role, Usage,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use tracing::{debug, warn};

use crate::config::{API_VERSION, AnthropicConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::error::{event_error, retry_after, transport_error, vendor_error};
use crate::model::{BlockDelta, ContentBlock, MessagesRequest, MessagesResponse, StreamEvent, Turn};

/// Provider backed by the Anthropic messages API.
pub struct AnthropicProvider {
    name: String,
    default_model: String,
    models: Vec<String>,
    api_key: Option<String>,
    endpoint: String,
    config: AnthropicConfig,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(spec: ProviderSpec, config: AnthropicConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        let base_url = spec.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);

        Ok(Self {
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
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

    fn body<'a>(
        &self,
        request: &'a ProviderRequest,
        stream: bool,
    ) -> ChatResult<MessagesRequest<'a>> {
        let messages: Vec<Turn<'a>> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Turn {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();
        if messages.is_empty() {
            return Err(ChatError::invalid("request has no conversation turns"));
        }

        Ok(MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            system: request.system_prompt(),
            messages,
            stream,
            temperature: request.temperature,
        })
    }

    async fn send(&self, body: &MessagesRequest<'_>) -> ChatResult<Response> {
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
            warn!(provider = %self.name, retry = retry + 1, ?delay, error = %err, "Retrying messages call");
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    async fn send_once(&self, body: &MessagesRequest<'_>) -> ChatResult<Response> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("anthropic-version", API_VERSION)
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
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

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("name", &self.name)
            .field("default_model", &self.default_model)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
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
        let body = self.body(&request, false)?;
        debug!(provider = %self.name, model = %request.model, "Sending messages call");

        let response = self.send(&body).await?;
        let message: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ChatError::unavailable(format!("malformed response: {e}")))?;
        let content = message
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<String>();

        Ok(ChatResponse {
            content,
            provider_used: self.name.clone(),
            model_used: request.model.clone(),
            usage: message.usage.map(Usage::from),
            finish_reason: message.stop_reason,
        })
    }

    fn complete_stream(&self, request: ProviderRequest) -> ChunkStream<'_> {
        Box::pin(async_stream::stream! {
            let body = match self.body(&request, true) {
                Ok(body) => body,
                Err(err) => {
                    yield Chunk::Error(err);
                    return;
                }
            };
            debug!(provider = %self.name, model = %request.model, "Streaming messages call");

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
            yield Chunk::Error(ChatError::unavailable("stream closed before message_stop"));
        })
    }
}

impl ConfigurableProvider for AnthropicProvider {
    const TYPE: &'static str = "anthropic";

    type Config = AnthropicConfig;

    fn from_config(spec: ProviderSpec, config: Self::Config) -> Result<Self, BoxError> {
        Ok(Self::new(spec, config)?)
    }
}

// ─── Stream parsing ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct StreamState {
    usage: Usage,
    stop_reason: Option<String>,
}

impl StreamState {
    /// Interprets one body line. `event:` lines are redundant with the
    /// payload's `type` and are skipped.
    fn step(&mut self, line: &str) -> Option<Chunk> {
        let data = data_field(line)?.trim();
        if data.is_empty() {
            return None;
        }

        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(err) => {
                return Some(Chunk::Error(ChatError::unavailable(format!(
                    "malformed stream event: {err}"
                ))));
            }
        };

        match event {
            StreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.usage.input_tokens = usage.input_tokens;
                }
                None
            }
            StreamEvent::ContentBlockDelta {
                delta: BlockDelta::TextDelta { text },
            } => (!text.is_empty()).then_some(Chunk::Text(text)),
            StreamEvent::ContentBlockDelta { .. } => None,
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                }
                None
            }
            StreamEvent::MessageStop => Some(Chunk::Done(Completion {
                usage: Some(self.usage),
                finish_reason: self.stop_reason.take(),
            })),
            StreamEvent::Error { error } => Some(Chunk::Error(event_error(error))),
            StreamEvent::Ignored => None,
        }
    }
}
