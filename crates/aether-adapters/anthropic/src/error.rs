//! Vendor error normalization.

use std::time::Duration;

use aether_core::ChatError;
use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::model::{ApiError, ErrorBody};

/// Maps a non-success response to the normalized taxonomy.
pub(crate) fn vendor_error(status: u16, body: &str, retry_after: Option<Duration>) -> ChatError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    match ChatError::from_status(status, detail) {
        ChatError::RateLimited { .. } => ChatError::RateLimited { retry_after },
        other => other,
    }
}

/// Maps an in-stream `error` event by its error type.
pub(crate) fn event_error(error: ApiError) -> ChatError {
    let ApiError { kind, message } = error;
    match kind.as_str() {
        "rate_limit_error" => ChatError::RateLimited { retry_after: None },
        "authentication_error" | "permission_error" => ChatError::AuthFailure(message),
        "invalid_request_error" | "not_found_error" | "request_too_large" => {
            ChatError::InvalidRequest(message)
        }
        "timeout_error" => ChatError::Timeout,
        _ if message.is_empty() => ChatError::Unavailable(kind),
        _ => ChatError::Unavailable(format!("{kind}: {message}")),
    }
}

pub(crate) fn transport_error(err: reqwest::Error) -> ChatError {
    if err.is_timeout() {
        ChatError::Timeout
    } else {
        ChatError::unavailable(err.to_string())
    }
}

/// Parses a `Retry-After` header given in seconds.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
