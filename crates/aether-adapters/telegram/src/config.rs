//! Configuration for the Telegram platform.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use teloxide::types::ParseMode;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram platform settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub token: String,

    /// Environment variable holding the token, used when `token` is empty.
    pub token_env: Option<String>,

    /// Bot API root; a local Bot API server or a test double.
    pub api_base: String,

    /// Server-side wait of one `getUpdates` call, in seconds.
    pub poll_timeout_secs: u64,

    /// `parse_mode` for outgoing messages (`HTML`, `MarkdownV2`). Plain
    /// text when unset or unrecognized.
    pub parse_mode: Option<String>,

    pub ignore_bots: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            token_env: None,
            api_base: DEFAULT_API_BASE.to_string(),
            poll_timeout_secs: 30,
            parse_mode: None,
            ignore_bots: true,
        }
    }
}

impl TelegramConfig {
    /// The token, falling back to `token_env`.
    pub fn resolve_token(&self) -> Option<String> {
        if !self.token.trim().is_empty() {
            return Some(self.token.clone());
        }
        let var = self.token_env.as_deref()?;
        std::env::var(var).ok().filter(|t| !t.trim().is_empty())
    }

    /// `api_base` as a URL teloxide can join method paths onto.
    pub fn api_url(&self) -> Result<Url, url::ParseError> {
        let base = self.api_base.trim();
        if base.ends_with('/') {
            Url::parse(base)
        } else {
            Url::parse(&format!("{base}/"))
        }
    }

    pub fn resolve_parse_mode(&self) -> Option<ParseMode> {
        match self.parse_mode.as_deref()?.to_ascii_lowercase().as_str() {
            "html" => Some(ParseMode::Html),
            "markdownv2" => Some(ParseMode::MarkdownV2),
            _ => None,
        }
    }

    /// Client-side deadline of one poll: the server wait plus slack.
    pub fn poll_request_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs + 10)
    }
}
