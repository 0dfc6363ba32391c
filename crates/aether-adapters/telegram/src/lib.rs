//! Telegram platform for the Aether chatbot runtime.
//!
//! Built on [`teloxide`]: receives messages through Bot API long polling
//! (`getUpdates`) and replies with `sendMessage`, split at 4096 characters.
//! No public endpoint or webhook is needed.
//!
//! # Connection
//!
//! Each connect attempt validates the token with `getMe`, then starts a
//! polling task bound to the session. Poll failures are retried with the
//! platform's backoff policy; once the retries are spent the platform
//! moves to `error` and publishes `platform_error`. A conflict with another
//! poller on the same token fails the session at once.
//!
//! # Normalization
//!
//! Text messages (or media captions) become [`InboundMessage`]s with the
//! chat id as `chat_id` and the Telegram message id as `id`. Messages from
//! other bots are ignored unless `ignore_bots` is off.
//!
//! ```toml
//! [[platforms]]
//! name = "telegram"
//! type = "telegram"
//!
//! [platforms.settings]
//! token_env = "TELEGRAM_BOT_TOKEN"
//! ```
//!
//! [`InboundMessage`]: aether_core::InboundMessage

pub mod config;
pub mod platform;

pub use config::TelegramConfig;
pub use platform::TelegramPlatform;
