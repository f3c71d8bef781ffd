//! Response payload staged on a [`crate::request::ResponseGuard`].

use axum::http::{HeaderValue, StatusCode};
use bytes::Bytes;
use serde::Serialize;

/// Status, optional content type and body of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl Reply {
    /// `200 OK` with no body.
    pub fn empty() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            content_type: None,
            body: Bytes::new(),
        }
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some(HeaderValue::from_static("text/plain; charset=utf-8")),
            body: Bytes::from(body.into()),
        }
    }

    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: Some(HeaderValue::from_static("application/json")),
                body: Bytes::from(body),
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize reply body");
                Self::internal_error()
            }
        }
    }

    /// `{"error": reason, "status": code}`, the shape used for forced termination.
    pub fn error(status: StatusCode, reason: &str) -> Self {
        Self::json(
            status,
            &serde_json::json!({ "error": reason, "status": status.as_u16() }),
        )
    }

    /// Generic failure that leaks no internal detail.
    pub fn internal_error() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            content_type: Some(HeaderValue::from_static("application/json")),
            body: Bytes::from_static(br#"{"error":"Internal Server Error"}"#),
        }
    }

    /// `408` reply for a request that exceeded its deadline.
    pub fn timeout(budget_ms: u128) -> Self {
        Self::json(
            StatusCode::REQUEST_TIMEOUT,
            &serde_json::json!({
                "error": "Request Timeout",
                "message": format!("Request could not be processed within {}ms", budget_ms),
            }),
        )
    }
}

impl Default for Reply {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reply_shape() {
        let reply = Reply::error(StatusCode::INTERNAL_SERVER_ERROR, "X");
        let value: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(value, serde_json::json!({ "error": "X", "status": 500 }));
    }

    #[test]
    fn test_timeout_reply_mentions_budget() {
        let reply = Reply::timeout(50);
        assert_eq!(reply.status, StatusCode::REQUEST_TIMEOUT);
        let value: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(value["message"], "Request could not be processed within 50ms");
    }
}
