//! The Discord platform adapter.

use aether_core::{
    BoxError, ConfigurablePlatform, OutboundMessage, Platform, PlatformContext, PlatformError,
    PlatformResult, split_text,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::RestApi;
use crate::config::DiscordConfig;
use crate::gateway::{self, Identity, Session};

/// Longest content a single message may carry.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Discord bot connected through the gateway.
pub struct DiscordPlatform {
    name: String,
    identity: Identity,
    rest: RestApi,
    session: Mutex<Option<CancellationToken>>,
}

impl DiscordPlatform {
    pub fn new(name: impl Into<String>, config: DiscordConfig) -> Result<Self, BoxError> {
        let name = name.into();
        let token = config
            .resolve_token()
            .ok_or_else(|| format!("discord platform '{name}' has no token configured"))?;
        let rest = RestApi::new(&config.api_base, &token)?;
        Ok(Self {
            name,
            identity: Identity {
                url: config.gateway_url,
                token,
                intents: config.intents,
                ignore_bots: config.ignore_bots,
            },
            rest,
            session: Mutex::new(None),
        })
    }

    fn ensure_session(&self) -> PlatformResult<()> {
        match &*self.session.lock() {
            Some(token) if !token.is_cancelled() => Ok(()),
            _ => Err(PlatformError::NotConnected(self.name.clone())),
        }
    }
}

#[async_trait]
impl Platform for DiscordPlatform {
    fn kind(&self) -> &str {
        "discord"
    }

    async fn open(&self, ctx: &PlatformContext) -> PlatformResult<()> {
        let session = Session::handshake(&self.identity)
            .await
            .map_err(|e| PlatformError::connect(ctx.name(), e))?;
        info!(platform = ctx.name(), "Discord gateway identified");

        let cancel = ctx.cancellation().child_token();
        if let Some(previous) = self.session.lock().replace(cancel.clone()) {
            previous.cancel();
        }
        tokio::spawn(gateway::run(
            session,
            self.identity.clone(),
            ctx.clone(),
            cancel,
        ));
        Ok(())
    }

    async fn disconnect(&self) -> PlatformResult<()> {
        if let Some(session) = self.session.lock().take() {
            session.cancel();
        }
        Ok(())
    }

    async fn send_outbound(&self, message: OutboundMessage) -> PlatformResult<()> {
        self.ensure_session()?;
        let mut reply_to = message.reply_to.as_deref();
        for part in split_text(&message.text, MAX_MESSAGE_CHARS) {
            self.rest
                .create_message(&message.chat_id, part, reply_to.take())
                .await?;
        }
        debug!(platform = %self.name, channel = %message.chat_id, "Message sent");
        Ok(())
    }

    async fn send_typing(&self, chat_id: &str) -> PlatformResult<()> {
        self.ensure_session()?;
        self.rest.trigger_typing(chat_id).await
    }
}

impl ConfigurablePlatform for DiscordPlatform {
    const TYPE: &'static str = "discord";

    type Config = DiscordConfig;

    fn from_config(name: &str, config: Self::Config) -> Result<Self, BoxError> {
        Self::new(name, config)
    }
}
