//! Response mapping.
//!
//! Handler-facing [`Reply`] values become axum responses here, for the
//! paths that answer without going through a guard (admin API, errors
//! raised before a request is registered).

use axum::body::Body;
use axum::http::{header, HeaderValue, Response};
use axum::response::IntoResponse;
use bytes::Bytes;

use crate::http::request::X_REQUEST_ID;
use crate::request::{Reply, RequestId};

impl IntoResponse for Reply {
    fn into_response(self) -> axum::response::Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        if let Some(content_type) = self.content_type {
            response.headers_mut().insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

/// Convert what a `ChannelSink` delivered into an axum response tagged with
/// the request identity.
pub fn from_sink(response: Response<Bytes>, id: RequestId) -> axum::response::Response {
    let mut response = response.map(Body::from);
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_reply_into_response() {
        let response = Reply::error(StatusCode::CONFLICT, "busy").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_sink_response_carries_request_id() {
        let id = RequestId::generate();
        let response = from_sink(Response::new(Bytes::from_static(b"ok")), id);
        assert_eq!(response.headers()[X_REQUEST_ID], id.to_string().as_str());
    }
}
