//! Discord platform for the Aether chatbot runtime.
//!
//! Messages arrive over the gateway websocket; replies go out through the
//! REST API.
//!
//! ## Gateway session
//!
//! ```text
//! connect ──▶ Hello (op 10) ──▶ Identify (op 2) ──▶ Ready (op 0)
//!                                                       │
//!          heartbeat (op 1) every interval ◀────────────┤
//!          MESSAGE_CREATE (op 0) ──▶ inbound_message ◀──┘
//! ```
//!
//! A connect attempt succeeds once `READY` arrives. If the session drops
//! later (close frame, missed heartbeat ack, reconnect request) the adapter
//! runs the handshake again with the platform's backoff policy, and moves
//! to `error` when the retries are spent.
//!
//! Messages written by the bot itself are never published. Messages from
//! other bots are dropped unless `ignore_bots` is off.
//!
//! ```toml
//! [[platforms]]
//! name = "discord"
//! type = "discord"
//!
//! [platforms.settings]
//! token_env = "DISCORD_BOT_TOKEN"
//! ```

mod api;
pub mod config;
mod gateway;
pub mod platform;

pub use config::DiscordConfig;
pub use platform::DiscordPlatform;
