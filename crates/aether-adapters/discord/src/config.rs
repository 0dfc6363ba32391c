//! Configuration for the Discord platform.

use serde::{Deserialize, Serialize};

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Gateway intent bits.
pub mod intents {
    pub const GUILDS: u64 = 1 << 0;
    pub const GUILD_MESSAGES: u64 = 1 << 9;
    pub const DIRECT_MESSAGES: u64 = 1 << 12;
    /// Privileged; must also be enabled in the developer portal.
    pub const MESSAGE_CONTENT: u64 = 1 << 15;
}

/// Discord platform settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token.
    pub token: String,

    /// Environment variable holding the token, used when `token` is empty.
    pub token_env: Option<String>,

    pub gateway_url: String,

    pub api_base: String,

    pub intents: u64,

    pub ignore_bots: bool,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            token_env: None,
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            intents: intents::GUILDS
                | intents::GUILD_MESSAGES
                | intents::DIRECT_MESSAGES
                | intents::MESSAGE_CONTENT,
            ignore_bots: true,
        }
    }
}

impl DiscordConfig {
    /// The token, falling back to `token_env`.
    pub fn resolve_token(&self) -> Option<String> {
        if !self.token.trim().is_empty() {
            return Some(self.token.clone());
        }
        let var = self.token_env.as_deref()?;
        std::env::var(var).ok().filter(|t| !t.trim().is_empty())
    }
}
