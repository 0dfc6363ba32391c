//! Chat plugin: talks to a provider from slash commands.
//!
//! - `/chat <text>` (aliases `/ask`, `/ai`) sends `<text>` with the current
//!   system prompt to the configured provider, or the default one
//! - `/setprompt <text>` replaces the system prompt; `/setprompt` alone shows it
//!
//! The provider call runs inside the intercept hook, so it is bounded by the
//! manager's hook timeout.

use std::sync::Arc;

use aether_core::{BoxError, ChatMessage, ChatRequest, ProviderLookup, ProviderRequest};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::plugin::{Plugin, PluginContext, PluginDescriptor, PluginMetadata};

pub const NAME: &str = "chat";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct ChatConfig {
    system_prompt: String,
    /// Provider to use instead of the runtime default.
    provider: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            provider: None,
        }
    }
}

enum Command<'a> {
    Chat(&'a str),
    SetPrompt(&'a str),
}

fn parse(message: &str) -> Option<Command<'_>> {
    let message = message.trim();
    let (command, args) = match message.split_once(char::is_whitespace) {
        Some((command, args)) => (command, args.trim()),
        None => (message, ""),
    };
    match command {
        "/chat" | "/ask" | "/ai" => Some(Command::Chat(args)),
        "/setprompt" => Some(Command::SetPrompt(args)),
        _ => None,
    }
}

#[derive(Default)]
pub struct ChatPlugin {
    config: RwLock<ChatConfig>,
    providers: RwLock<Option<Arc<dyn ProviderLookup>>>,
}

impl ChatPlugin {
    pub fn system_prompt(&self) -> String {
        self.config.read().system_prompt.clone()
    }

    async fn ask(&self, text: &str) -> String {
        if text.is_empty() {
            return "Usage: /chat <your message>".to_string();
        }
        let Some(providers) = self.providers.read().clone() else {
            return "No LLM provider configured".to_string();
        };
        let (prompt, requested) = {
            let config = self.config.read();
            (config.system_prompt.clone(), config.provider.clone())
        };
        let provider = match providers.resolve(requested.as_deref()) {
            Ok(provider) => provider,
            Err(err) => {
                debug!(plugin = NAME, error = %err, "No provider for chat command");
                return "No LLM provider configured".to_string();
            }
        };

        let request = ProviderRequest::new(
            provider.default_model(),
            vec![ChatMessage::system(prompt), ChatMessage::user(text)],
        );
        match provider.complete(request).await {
            Ok(response) => response.content,
            Err(err) => {
                warn!(plugin = NAME, provider = provider.name(), error = %err, "Chat command failed");
                format!("Error: {err}")
            }
        }
    }

    fn set_prompt(&self, text: &str) -> String {
        if text.is_empty() {
            return format!("Current prompt: {}", self.system_prompt());
        }
        self.config.write().system_prompt = text.to_string();
        debug!(plugin = NAME, "System prompt updated");
        "System prompt updated!".to_string()
    }
}

#[async_trait]
impl Plugin for ChatPlugin {
    async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        let config: ChatConfig = ctx.get_config()?;
        if ctx.providers().is_none() {
            warn!(plugin = NAME, "No provider access, /chat will not answer");
        }
        *self.config.write() = config;
        *self.providers.write() = ctx.providers().cloned();
        Ok(())
    }

    async fn intercept(&self, request: &ChatRequest) -> Result<Option<String>, BoxError> {
        let reply = match parse(&request.message) {
            Some(Command::Chat(text)) => self.ask(text).await,
            Some(Command::SetPrompt(text)) => self.set_prompt(text),
            None => return Ok(None),
        };
        Ok(Some(reply))
    }
}

/// Descriptor of the chat plugin.
pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(
        NAME,
        PluginMetadata::new(env!("CARGO_PKG_VERSION"))
            .description("AI-powered chat commands")
            .author("Aether"),
        || Arc::new(ChatPlugin::default()),
    )
}

crate::submit_plugin!(CHAT_PLUGIN = descriptor);
