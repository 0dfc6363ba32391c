//! Vendor error normalization.
//!
//! Gemini reports errors as `{"error": {"code", "message", "status"}}`,
//! where `status` is a Google RPC code name.

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

/// Maps an error object that arrived inside a stream by its RPC status.
pub(crate) fn event_error(error: ApiError) -> ChatError {
    let ApiError { message, status } = error;
    match status.as_str() {
        "RESOURCE_EXHAUSTED" => ChatError::RateLimited { retry_after: None },
        "UNAUTHENTICATED" | "PERMISSION_DENIED" => ChatError::AuthFailure(message),
        "INVALID_ARGUMENT" | "NOT_FOUND" | "FAILED_PRECONDITION" => {
            ChatError::InvalidRequest(message)
        }
        "DEADLINE_EXCEEDED" => ChatError::Timeout,
        "" => ChatError::Unavailable(message),
        _ => ChatError::Unavailable(format!("{status}: {message}")),
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

#[cfg(test)]
mod tests {
    use super::*;
    use aether_core::ErrorKind;

    #[test]
    fn test_google_error_body() {
        let body = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(
            vendor_error(400, body, None),
            ChatError::invalid("HTTP 400: API key not valid. Please pass a valid API key.")
        );
        assert_eq!(vendor_error(403, "denied", None).kind(), ErrorKind::AuthFailure);
    }

    #[test]
    fn test_stream_error_by_status() {
        let error = |status: &str| ApiError {
            message: "m".to_string(),
            status: status.to_string(),
        };
        assert_eq!(event_error(error("RESOURCE_EXHAUSTED")).kind(), ErrorKind::RateLimited);
        assert_eq!(event_error(error("UNAUTHENTICATED")).kind(), ErrorKind::AuthFailure);
        assert_eq!(event_error(error("NOT_FOUND")).kind(), ErrorKind::InvalidRequest);
        assert_eq!(event_error(error("DEADLINE_EXCEEDED")), ChatError::Timeout);
        assert_eq!(
            event_error(error("INTERNAL")),
            ChatError::Unavailable("INTERNAL: m".to_string())
        );
    }
}
