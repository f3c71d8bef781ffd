//! Inbound side of the transport seam.

use std::net::SocketAddr;

use axum::http::{HeaderMap, Method, Uri};
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};

use crate::transport::sink::TransportError;

/// Body chunks as the transport produces them.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// What the transport hands over for one inbound request.
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    pub(crate) body: Option<BodyStream>,
}

impl InboundRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            remote_addr: None,
            body: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_body_stream(mut self, body: BodyStream) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a body delivered as the given chunks, in order.
    pub fn with_chunks<I>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + 'static,
    {
        self.with_body_stream(stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

impl std::fmt::Debug for InboundRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("remote_addr", &self.remote_addr)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}
