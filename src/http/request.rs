//! Inbound request conversion and client-disconnect detection.
//!
//! # Responsibilities
//! - Turn an axum request into an [`InboundRequest`] with a streaming body
//! - Mark the response guard closed when the client goes away first
//!
//! # Design Decisions
//! - The body is not buffered here; steps read it through `RequestContext::read_body`
//! - Disconnect is observed by hyper dropping the handler future

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use futures_util::{StreamExt, TryStreamExt};

use crate::request::ResponseGuard;
use crate::transport::{InboundRequest, TransportError};

/// Header carrying the engine-assigned request identity on every response.
pub const X_REQUEST_ID: &str = "x-request-id";

pub fn inbound_from_axum(request: Request<Body>) -> InboundRequest {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let (parts, body) = request.into_parts();

    let stream = body
        .into_data_stream()
        .map_err(|e| TransportError::Io(io::Error::other(e)))
        .boxed();

    let inbound = InboundRequest::new(parts.method, parts.uri)
        .with_headers(parts.headers)
        .with_body_stream(stream);
    match remote_addr {
        Some(addr) => inbound.with_remote_addr(addr),
        None => inbound,
    }
}

/// Calls [`ResponseGuard::mark_closed`] when dropped.
///
/// Held by the handler future for the lifetime of the exchange. If hyper
/// drops that future before the guard dispatched, the client is gone.
pub struct CloseOnDrop(pub Arc<ResponseGuard>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if self.0.mark_closed() {
            tracing::info!(request_id = %self.0.id(), "Client disconnected before response");
        }
    }
}
