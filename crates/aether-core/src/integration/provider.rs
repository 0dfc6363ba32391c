//! Provider capability interface.
//!
//! A provider wraps one external LLM service. Implementations translate
//! vendor errors into [`ChatError`] and must tolerate many concurrent calls:
//! all per-request state lives inside the call.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::foundation::chat::{ChatMessage, ChatRequest, ChatResponse, Chunk};
use crate::foundation::error::{BoxError, ChatError, ChatResult};

/// A lazily produced sequence of chunks for one provider call.
pub type ChunkStream<'a> = BoxStream<'a, Chunk>;

/// The normalized request a provider receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderRequest {
    pub model: String,
    /// Conversation turns, system prompt first when present.
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Builds the provider request for a chat turn against `model`.
    pub fn from_chat(request: &ChatRequest, model: impl Into<String>) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(prompt) = request.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            messages.push(ChatMessage::system(prompt));
        }
        messages.push(ChatMessage::user(request.message.clone()));

        Self {
            model: model.into(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }

    /// Joined content of all system messages, if any.
    pub fn system_prompt(&self) -> Option<String> {
        let system: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == crate::foundation::chat::Role::System)
            .map(|m| m.content.as_str())
            .collect();
        (!system.is_empty()).then(|| system.join("\n"))
    }
}

/// An LLM service.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry key of this provider instance.
    fn name(&self) -> &str;

    /// Model used when a request does not name one.
    fn default_model(&self) -> &str;

    /// Models this provider accepts. Empty means any.
    fn supported_models(&self) -> &[String] {
        &[]
    }

    fn supports_model(&self, model: &str) -> bool {
        let models = self.supported_models();
        models.is_empty() || models.iter().any(|m| m == model)
    }

    /// Runs a request to completion.
    ///
    /// The default drains [`complete_stream`](Self::complete_stream), which
    /// keeps both paths consistent for providers without a separate
    /// non-streaming endpoint.
    async fn complete(&self, request: ProviderRequest) -> ChatResult<ChatResponse> {
        let model = request.model.clone();
        collect_response(self.name(), &model, self.complete_stream(request)).await
    }

    /// Starts a streaming call.
    ///
    /// The stream is finite and ends with exactly one `Done` or `Error`.
    /// Polling it again after a terminal chunk yields nothing; a new call
    /// re-executes the request.
    fn complete_stream(&self, request: ProviderRequest) -> ChunkStream<'_>;
}

/// A shared provider trait object.
pub type BoxedProvider = Arc<dyn Provider>;

/// Read access to registered providers, for code that calls them outside
/// the chat pipeline.
pub trait ProviderLookup: Send + Sync {
    /// The provider named `requested`, or the default one when `None`.
    fn resolve(&self, requested: Option<&str>) -> ChatResult<BoxedProvider>;
}

/// Common settings every configured provider receives.
#[derive(Debug, Clone, Default)]
pub struct ProviderSpec {
    pub name: String,
    pub default_model: Option<String>,
    pub models: Vec<String>,
    /// Resolved secret, when the configuration references one.
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

/// Providers that can be built from configuration.
///
/// The runtime looks implementations up by [`TYPE`](Self::TYPE), deserializes
/// the entry's `settings` table into [`Config`](Self::Config), and calls
/// [`from_config`](Self::from_config).
pub trait ConfigurableProvider: Provider + Sized + 'static {
    /// The `type` value in configuration, e.g. `"openai"`.
    const TYPE: &'static str;

    type Config: DeserializeOwned + Default;

    fn from_config(spec: ProviderSpec, config: Self::Config) -> Result<Self, BoxError>;
}

/// Enforces the terminal-chunk contract on a raw provider stream.
///
/// Chunks after the first terminal are discarded, and a stream that ends
/// without one (including an empty stream) gets a trailing `Unavailable`.
pub fn conform(stream: ChunkStream<'_>) -> ChunkStream<'_> {
    futures::stream::unfold(Some(stream), |state| async move {
        let mut stream = state?;
        match stream.next().await {
            Some(chunk) if chunk.is_terminal() => Some((chunk, None)),
            Some(chunk) => Some((chunk, Some(stream))),
            None => Some((
                Chunk::Error(ChatError::unavailable(
                    "stream ended without a terminal chunk",
                )),
                None,
            )),
        }
    })
    .boxed()
}

/// Drains a chunk stream into a single response.
pub async fn collect_response(
    provider: &str,
    model: &str,
    stream: ChunkStream<'_>,
) -> ChatResult<ChatResponse> {
    let mut stream = conform(stream);
    let mut content = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Chunk::Text(text) => content.push_str(&text),
            Chunk::Done(completion) => {
                return Ok(ChatResponse {
                    content,
                    provider_used: provider.to_string(),
                    model_used: model.to_string(),
                    usage: completion.usage,
                    finish_reason: completion.finish_reason,
                });
            }
            Chunk::Error(err) => return Err(err),
        }
    }
    Err(ChatError::unavailable("stream ended without a terminal chunk"))
}
