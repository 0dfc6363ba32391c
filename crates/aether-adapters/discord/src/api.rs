//! REST client for the few endpoints the adapter needs.

use std::time::Duration;

use aether_core::PlatformError;
use reqwest::Client;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_reference: Option<MessageReference<'a>>,
}

#[derive(Debug, Serialize)]
struct MessageReference<'a> {
    message_id: &'a str,
    fail_if_not_exists: bool,
}

#[derive(Clone)]
pub(crate) struct RestApi {
    client: Client,
    base: String,
    authorization: String,
}

impl RestApi {
    pub fn new(api_base: &str, token: &str) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(30))
                .build()?,
            base: api_base.trim_end_matches('/').to_string(),
            authorization: format!("Bot {token}"),
        })
    }

    /// `POST /channels/{channel}/messages`.
    pub async fn create_message(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<(), PlatformError> {
        let body = CreateMessage {
            content,
            message_reference: reply_to.map(|message_id| MessageReference {
                message_id,
                fail_if_not_exists: false,
            }),
        };
        let url = format!("{}/channels/{channel_id}/messages", self.base);
        self.post(&url, Some(&body)).await
    }

    /// `POST /channels/{channel}/typing`.
    pub async fn trigger_typing(&self, channel_id: &str) -> Result<(), PlatformError> {
        let url = format!("{}/channels/{channel_id}/typing", self.base);
        self.post::<()>(&url, None).await
    }

    async fn post<T: Serialize>(&self, url: &str, body: Option<&T>) -> Result<(), PlatformError> {
        let mut request = self
            .client
            .post(url)
            .header("Authorization", &self.authorization);
        request = match body {
            Some(body) => request.json(body),
            None => request.header("Content-Length", "0"),
        };

        let response = request.send().await.map_err(PlatformError::send)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(PlatformError::send(format!("HTTP {}: {}", status.as_u16(), text.trim())))
    }
}
