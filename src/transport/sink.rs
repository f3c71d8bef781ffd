//! Outbound side of the transport seam.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    Closed,
    #[error("transport write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The transport's outbound response object.
///
/// `end` is the terminating write; [`crate::request::ResponseGuard`] calls it
/// at most once per sink.
pub trait ResponseSink: Send + 'static {
    fn set_status(&mut self, status: StatusCode);
    fn set_header(&mut self, name: HeaderName, value: HeaderValue);
    fn write(&mut self, chunk: Bytes) -> Result<(), TransportError>;
    fn end(&mut self) -> Result<(), TransportError>;
}

/// Buffers a response and hands it over a oneshot channel on `end`.
pub struct ChannelSink {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    tx: Option<oneshot::Sender<Response<Bytes>>>,
}

impl ChannelSink {
    pub fn new() -> (Self, oneshot::Receiver<Response<Bytes>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: BytesMut::new(),
                tx: Some(tx),
            },
            rx,
        )
    }
}

impl ResponseSink for ChannelSink {
    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    fn write(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        match &self.tx {
            Some(tx) if !tx.is_closed() => {
                self.body.extend_from_slice(&chunk);
                Ok(())
            }
            _ => Err(TransportError::Closed),
        }
    }

    fn end(&mut self) -> Result<(), TransportError> {
        let tx = self.tx.take().ok_or(TransportError::Closed)?;
        let mut response = Response::new(std::mem::take(&mut self.body).freeze());
        *response.status_mut() = self.status;
        *response.headers_mut() = std::mem::take(&mut self.headers);
        tx.send(response).map_err(|_| TransportError::Closed)
    }
}
