//! Echo plugin: answers a few slash commands without calling a provider.
//!
//! - `/echo <text>` (alias `/say`) replies with `<text>`
//! - `/ping` replies with `Pong!`

use std::sync::Arc;

use aether_core::{BoxError, ChatRequest};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::plugin::{Plugin, PluginContext, PluginDescriptor, PluginMetadata};

pub const NAME: &str = "echo";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct EchoConfig {
    /// Text prepended to echoed replies.
    prefix: String,
}

#[derive(Default)]
pub struct EchoPlugin {
    config: parking_lot::RwLock<EchoConfig>,
}

impl EchoPlugin {
    fn reply(&self, message: &str) -> Option<String> {
        let message = message.trim();
        let (command, args) = match message.split_once(char::is_whitespace) {
            Some((command, args)) => (command, args.trim()),
            None => (message, ""),
        };

        match command {
            "/ping" => Some("Pong!".to_string()),
            "/echo" | "/say" if args.is_empty() => Some("Usage: /echo <message>".to_string()),
            "/echo" | "/say" => Some(format!("{}{}", self.config.read().prefix, args)),
            _ => None,
        }
    }
}

#[async_trait]
impl Plugin for EchoPlugin {
    async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        let config: EchoConfig = ctx.get_config()?;
        debug!(plugin = NAME, prefix = %config.prefix, "Echo plugin configured");
        *self.config.write() = config;
        Ok(())
    }

    async fn intercept(&self, request: &ChatRequest) -> Result<Option<String>, BoxError> {
        Ok(self.reply(&request.message))
    }
}

/// Descriptor of the echo plugin.
pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(
        NAME,
        PluginMetadata::new(env!("CARGO_PKG_VERSION"))
            .description("Echo messages back to users")
            .author("Aether"),
        || Arc::new(EchoPlugin::default()),
    )
}

crate::submit_plugin!(ECHO_PLUGIN = descriptor);

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_commands() {
        let plugin = EchoPlugin::default();
        assert_eq!(plugin.reply("/ping").as_deref(), Some("Pong!"));
        assert_eq!(plugin.reply("/echo hello world").as_deref(), Some("hello world"));
        assert_eq!(plugin.reply("  /say   hi ").as_deref(), Some("hi"));
        assert_eq!(plugin.reply("/echo").as_deref(), Some("Usage: /echo <message>"));
        assert_eq!(plugin.reply("echo hi"), None);
        assert_eq!(plugin.reply("/echoes"), None);
    }

    #[tokio::test]
    async fn test_prefix_from_config() {
        let plugin = EchoPlugin::default();
        let ctx = PluginContext::new(
            NAME,
            Arc::new(serde_json::json!({ "prefix": "> " })),
            aether_core::EventBus::new(),
        );
        assert_ok!(plugin.on_load(&ctx).await);
        let reply = plugin.intercept(&ChatRequest::new("/echo x")).await;
        assert_eq!(reply.ok().flatten().as_deref(), Some("> x"));
    }
}
