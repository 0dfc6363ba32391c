//! The Telegram platform adapter.

use std::time::{Duration, SystemTime};

use aether_core::{
    BoxError, ConfigurablePlatform, ConnectionState, InboundMessage, OutboundMessage, Platform,
    PlatformContext, PlatformError, PlatformResult, split_text,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use teloxide::payloads::{GetUpdatesSetters, SendMessageSetters};
use teloxide::prelude::*;
use teloxide::types::{
    AllowedUpdate, ChatAction, ChatId, Message, MessageId, ParseMode, Recipient, ReplyParameters,
    UpdateKind,
};
use teloxide::{ApiError, RequestError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;

/// Longest text a single `sendMessage` accepts.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Telegram bot connected through long polling.
pub struct TelegramPlatform {
    name: String,
    config: TelegramConfig,
    bot: Bot,
    parse_mode: Option<ParseMode>,
    /// Cancels the polling task of the current session.
    session: Mutex<Option<CancellationToken>>,
}

impl TelegramPlatform {
    pub fn new(name: impl Into<String>, config: TelegramConfig) -> Result<Self, BoxError> {
        let name = name.into();
        let token = config
            .resolve_token()
            .ok_or_else(|| format!("telegram platform '{name}' has no token configured"))?;

        // The client deadline must outlast the server-side long poll.
        let client = teloxide::net::default_reqwest_settings()
            .timeout(config.poll_request_timeout())
            .build()?;
        let bot = Bot::with_client(token, client).set_api_url(config.api_url()?);

        let parse_mode = config.resolve_parse_mode();
        if parse_mode.is_none() && config.parse_mode.is_some() {
            warn!(platform = %name, parse_mode = ?config.parse_mode, "Unknown parse mode, sending plain text");
        }
        Ok(Self {
            name,
            config,
            bot,
            parse_mode,
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
impl Platform for TelegramPlatform {
    fn kind(&self) -> &str {
        "telegram"
    }

    async fn open(&self, ctx: &PlatformContext) -> PlatformResult<()> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| PlatformError::connect(ctx.name(), e))?;
        info!(
            platform = ctx.name(),
            bot = me.username.as_deref().unwrap_or(&me.first_name),
            "Telegram bot authorized"
        );

        let session = ctx.cancellation().child_token();
        if let Some(previous) = self.session.lock().replace(session.clone()) {
            previous.cancel();
        }
        tokio::spawn(poll_updates(
            self.bot.clone(),
            self.config.clone(),
            ctx.clone(),
            session,
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
        let chat = recipient(&message.chat_id);
        let mut reply_to = reply_parameters(message.reply_to.as_deref());

        for part in split_text(&message.text, MAX_MESSAGE_CHARS) {
            let mut request = self.bot.send_message(chat.clone(), part);
            if let Some(params) = reply_to.take() {
                request = request.reply_parameters(params);
            }
            if let Some(mode) = self.parse_mode {
                request = request.parse_mode(mode);
            }
            request.await.map_err(PlatformError::send)?;
        }
        debug!(platform = %self.name, chat = %message.chat_id, "Message sent");
        Ok(())
    }

    async fn send_typing(&self, chat_id: &str) -> PlatformResult<()> {
        self.ensure_session()?;
        self.bot
            .send_chat_action(recipient(chat_id), ChatAction::Typing)
            .await
            .map_err(PlatformError::send)?;
        Ok(())
    }
}

impl ConfigurablePlatform for TelegramPlatform {
    const TYPE: &'static str = "telegram";

    type Config = TelegramConfig;

    fn from_config(name: &str, config: Self::Config) -> Result<Self, BoxError> {
        Self::new(name, config)
    }
}

/// Numeric ids address chats directly; anything else is a public
/// `@username`.
fn recipient(chat_id: &str) -> Recipient {
    match chat_id.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(chat_id.to_string()),
    }
}

/// Telegram message ids are `i32`; anything else is sent without a reply.
fn reply_parameters(reply_to: Option<&str>) -> Option<ReplyParameters> {
    reply_to
        .and_then(|id| id.parse::<i32>().ok())
        .map(|id| ReplyParameters::new(MessageId(id)).allow_sending_without_reply())
}

// ─── Polling ─────────────────────────────────────────────────────────────────

/// Long-polls `getUpdates` until the session is cancelled or the retry
/// budget is spent.
async fn poll_updates(
    bot: Bot,
    config: TelegramConfig,
    ctx: PlatformContext,
    session: CancellationToken,
) {
    let poll_timeout = u32::try_from(config.poll_timeout_secs).unwrap_or(u32::MAX);
    let mut offset: Option<i32> = None;
    let mut failures = 0u32;

    loop {
        let mut request = bot
            .get_updates()
            .timeout(poll_timeout)
            .allowed_updates(vec![AllowedUpdate::Message]);
        if let Some(offset) = offset {
            request = request.offset(offset);
        }
        let result = tokio::select! {
            _ = session.cancelled() => break,
            result = request.send() => result,
        };

        match result {
            Ok(updates) => {
                if failures > 0 {
                    info!(platform = ctx.name(), "Telegram polling recovered");
                    ctx.set_state(ConnectionState::Connected);
                    failures = 0;
                }
                for update in updates {
                    offset = Some(update.id.as_offset());
                    let UpdateKind::Message(message) = update.kind else {
                        continue;
                    };
                    if let Some(inbound) = normalize(ctx.name(), &message, config.ignore_bots) {
                        ctx.publish_inbound(inbound);
                    }
                }
            }
            // Another process polls with this token; retrying only steals
            // updates back and forth.
            Err(RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
                ctx.report_error(&PlatformError::connect(
                    ctx.name(),
                    "another bot instance is polling with this token",
                ));
                break;
            }
            Err(err) => {
                let retry = ctx.retry();
                if failures >= retry.max_retries {
                    ctx.report_error(&PlatformError::connect(
                        ctx.name(),
                        format!("polling failed: {err}"),
                    ));
                    break;
                }
                if failures == 0 {
                    ctx.set_state(ConnectionState::Connecting);
                }
                let delay = match &err {
                    RequestError::RetryAfter(wait) => wait.duration(),
                    _ => retry.delay_for(failures),
                };
                failures += 1;
                warn!(platform = ctx.name(), error = %err, ?delay, "Telegram poll failed");
                tokio::select! {
                    _ = session.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    debug!(platform = ctx.name(), "Telegram polling stopped");
}

/// Converts a Telegram message into the shared inbound shape.
fn normalize(platform: &str, message: &Message, ignore_bots: bool) -> Option<InboundMessage> {
    let text = message.text().or_else(|| message.caption())?;
    let sender = message.from.as_ref();
    if ignore_bots && sender.is_some_and(|u| u.is_bot) {
        return None;
    }

    let chat_id = message.chat.id.0.to_string();
    let sender_id = sender.map_or_else(|| chat_id.clone(), |u| u.id.0.to_string());
    let mut inbound =
        InboundMessage::new(platform, chat_id, sender_id, text).with_id(message.id.0.to_string());
    if let Some(user) = sender {
        let name = user.username.as_ref().unwrap_or(&user.first_name);
        inbound = inbound.with_sender_name(name.clone());
    }
    if let Some(parent) = message.reply_to_message() {
        inbound = inbound.with_reply_to(parent.id.0.to_string());
    }
    if let Some(secs) = u64::try_from(message.date.timestamp()).ok().filter(|s| *s > 0) {
        inbound.timestamp = SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
    }
    Some(inbound)
}
