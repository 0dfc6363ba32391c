//! Gateway websocket session.

use std::time::Duration;

use aether_core::{ConnectionState, InboundMessage, PlatformContext, PlatformError};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Gateway opcodes.
mod op {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

#[derive(Debug, Error)]
pub(crate) enum GatewayError {
    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("gateway closed: {0}")]
    Closed(String),

    #[error("unexpected gateway payload: {0}")]
    Protocol(String),

    #[error("session invalidated")]
    InvalidSession,
}

/// A raw gateway payload.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Payload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageCreate {
    id: String,
    channel_id: String,
    #[serde(default)]
    content: String,
    author: Author,
    #[serde(default)]
    message_reference: Option<Reference>,
}

#[derive(Debug, Deserialize)]
struct Author {
    id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct Reference {
    #[serde(default)]
    message_id: Option<String>,
}

/// What the session needs to identify, again on every reconnect.
#[derive(Debug, Clone)]
pub(crate) struct Identity {
    pub url: String,
    pub token: String,
    pub intents: u64,
    pub ignore_bots: bool,
}

/// An identified gateway connection.
pub(crate) struct Session {
    sink: WsSink,
    source: WsSource,
    heartbeat: Duration,
    sequence: Option<u64>,
    /// The bot's own user id, from `READY`.
    user_id: String,
}

impl Session {
    /// Connects and runs Hello → Identify → Ready.
    pub async fn handshake(identity: &Identity) -> Result<Self, GatewayError> {
        let (stream, _response) = connect_async(identity.url.as_str()).await?;
        let (mut sink, mut source) = stream.split();

        let hello = next_payload(&mut source).await?;
        if hello.op != op::HELLO {
            return Err(GatewayError::Protocol(format!("expected hello, got op {}", hello.op)));
        }
        let interval = hello.d["heartbeat_interval"]
            .as_u64()
            .filter(|ms| *ms > 0)
            .ok_or_else(|| GatewayError::Protocol("hello without heartbeat_interval".into()))?;

        let identify = json!({
            "op": op::IDENTIFY,
            "d": {
                "token": identity.token,
                "intents": identity.intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "aether",
                    "device": "aether",
                },
            },
        });
        sink.send(Message::Text(identify.to_string().into())).await?;

        loop {
            let payload = next_payload(&mut source).await?;
            match (payload.op, payload.t.as_deref()) {
                (op::DISPATCH, Some("READY")) => {
                    let user_id = payload.d["user"]["id"].as_str().unwrap_or_default().to_string();
                    debug!(user = %user_id, "Gateway ready");
                    return Ok(Self {
                        sink,
                        source,
                        heartbeat: Duration::from_millis(interval),
                        sequence: payload.s,
                        user_id,
                    });
                }
                (op::INVALID_SESSION, _) => return Err(GatewayError::InvalidSession),
                _ => trace!(op = payload.op, "Ignoring payload before ready"),
            }
        }
    }

    async fn send_heartbeat(&mut self) -> Result<(), GatewayError> {
        let beat = json!({ "op": op::HEARTBEAT, "d": self.sequence });
        self.sink.send(Message::Text(beat.to_string().into())).await?;
        Ok(())
    }

    /// Pumps the session until it is cancelled or lost.
    ///
    /// Returns `None` on cancellation and the loss reason otherwise.
    async fn drive(
        &mut self,
        ctx: &PlatformContext,
        identity: &Identity,
        cancel: &CancellationToken,
    ) -> Option<GatewayError> {
        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        let mut acked = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = self.sink.close().await;
                    return None;
                }

                _ = heartbeat.tick() => {
                    if !acked {
                        return Some(GatewayError::Closed("heartbeat not acknowledged".into()));
                    }
                    acked = false;
                    if let Err(err) = self.send_heartbeat().await {
                        return Some(err);
                    }
                }

                msg = self.source.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map(|f| f.to_string()).unwrap_or_default();
                            return Some(GatewayError::Closed(reason));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => return Some(err.into()),
                        None => return Some(GatewayError::Closed("stream ended".into())),
                    };
                    let payload: Payload = match serde_json::from_str(text.as_str()) {
                        Ok(payload) => payload,
                        Err(err) => {
                            warn!(platform = ctx.name(), error = %err, "Skipping malformed gateway payload");
                            continue;
                        }
                    };
                    if payload.s.is_some() {
                        self.sequence = payload.s;
                    }
                    match payload.op {
                        op::DISPATCH => self.dispatch(ctx, identity, payload),
                        op::HEARTBEAT => {
                            if let Err(err) = self.send_heartbeat().await {
                                return Some(err);
                            }
                        }
                        op::HEARTBEAT_ACK => acked = true,
                        op::RECONNECT => return Some(GatewayError::Closed("reconnect requested".into())),
                        op::INVALID_SESSION => return Some(GatewayError::InvalidSession),
                        other => trace!(op = other, "Ignoring gateway opcode"),
                    }
                }
            }
        }
    }

    fn dispatch(&self, ctx: &PlatformContext, identity: &Identity, payload: Payload) {
        if payload.t.as_deref() != Some("MESSAGE_CREATE") {
            return;
        }
        let message: MessageCreate = match serde_json::from_value(payload.d) {
            Ok(message) => message,
            Err(err) => {
                warn!(platform = ctx.name(), error = %err, "Skipping malformed MESSAGE_CREATE");
                return;
            }
        };
        if message.author.id == self.user_id
            || (identity.ignore_bots && message.author.bot)
            || message.content.trim().is_empty()
        {
            return;
        }

        let mut inbound =
            InboundMessage::new(ctx.name(), message.channel_id, message.author.id, message.content)
                .with_id(message.id);
        if let Some(name) = message.author.global_name.or(message.author.username) {
            inbound = inbound.with_sender_name(name);
        }
        if let Some(parent) = message.message_reference.and_then(|r| r.message_id) {
            inbound = inbound.with_reply_to(parent);
        }
        ctx.publish_inbound(inbound);
    }
}

async fn next_payload(source: &mut WsSource) -> Result<Payload, GatewayError> {
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str())
                    .map_err(|e| GatewayError::Protocol(e.to_string()));
            }
            Some(Ok(Message::Close(frame))) => {
                let reason = frame.map(|f| f.to_string()).unwrap_or_default();
                return Err(GatewayError::Closed(reason));
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err.into()),
            None => return Err(GatewayError::Closed("stream ended".into())),
        }
    }
}

/// Runs a session, re-identifying after losses, until cancelled or the
/// retry budget is spent.
pub(crate) async fn run(
    mut session: Session,
    identity: Identity,
    ctx: PlatformContext,
    cancel: CancellationToken,
) {
    loop {
        let Some(lost) = session.drive(&ctx, &identity, &cancel).await else {
            break;
        };
        warn!(platform = ctx.name(), reason = %lost, "Gateway session lost");
        ctx.set_state(ConnectionState::Connecting);

        match reconnect(&identity, &ctx, &cancel).await {
            Reconnect::Connected(next) => {
                session = next;
                ctx.set_state(ConnectionState::Connected);
                info!(platform = ctx.name(), "Gateway session resumed");
            }
            Reconnect::Cancelled => break,
            Reconnect::Exhausted(err) => {
                ctx.report_error(&PlatformError::connect(
                    ctx.name(),
                    format!("gateway reconnect failed: {err}"),
                ));
                break;
            }
        }
    }
    debug!(platform = ctx.name(), "Gateway task stopped");
}

enum Reconnect {
    Connected(Session),
    Cancelled,
    Exhausted(GatewayError),
}

async fn reconnect(identity: &Identity, ctx: &PlatformContext, cancel: &CancellationToken) -> Reconnect {
    let policy = ctx.retry().clone();
    let mut last = GatewayError::Closed("no attempt made".into());
    for attempt in 0..policy.max_attempts() {
        tokio::select! {
            _ = cancel.cancelled() => return Reconnect::Cancelled,
            _ = tokio::time::sleep(policy.delay_for(attempt)) => {}
        }
        match Session::handshake(identity).await {
            Ok(session) => return Reconnect::Connected(session),
            Err(err) => {
                warn!(platform = ctx.name(), attempt = attempt + 1, error = %err, "Gateway reconnect failed");
                last = err;
            }
        }
    }
    Reconnect::Exhausted(last)
}
