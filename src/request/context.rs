//! Per-request identity and read-only request data.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime};

use axum::http::{HeaderMap, Method, Uri};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::events::{EventBus, LifecycleEmitter, Side};
use crate::request::RequestId;
use crate::transport::{BodyStream, InboundRequest, TransportError};

/// Authenticated caller, attached by an external auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("request body already consumed")]
    AlreadyConsumed,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

enum BodySlot {
    Pending(BodyStream),
    Empty,
    Consumed,
}

/// Identity plus transport data for one in-flight request.
pub struct RequestContext {
    id: RequestId,
    created_at: SystemTime,
    started: Instant,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    body: Mutex<BodySlot>,
    principal: OnceLock<Principal>,
    emitter: LifecycleEmitter,
}

impl RequestContext {
    pub fn new(id: RequestId, request: InboundRequest, bus: Arc<EventBus>) -> Self {
        let InboundRequest {
            method,
            uri,
            headers,
            remote_addr,
            body,
        } = request;

        Self {
            id,
            created_at: SystemTime::now(),
            started: Instant::now(),
            method,
            uri,
            headers,
            remote_addr,
            body: Mutex::new(body.map(BodySlot::Pending).unwrap_or(BodySlot::Empty)),
            principal: OnceLock::new(),
            emitter: LifecycleEmitter::new(bus, id, Side::Request),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.get()
    }

    /// Attach the authenticated principal. Only the first attachment sticks;
    /// a rejected principal is handed back.
    pub fn attach_principal(&self, principal: Principal) -> Result<(), Principal> {
        self.principal.set(principal)
    }

    /// Read the whole body, publishing `request:data` per chunk and then
    /// `request:end`, or `request:error` if the transport fails or `limit`
    /// is exceeded.
    pub async fn read_body(&self, limit: usize) -> Result<Bytes, BodyError> {
        let slot = std::mem::replace(&mut *self.body.lock(), BodySlot::Consumed);
        let mut stream = match slot {
            BodySlot::Pending(stream) => stream,
            BodySlot::Empty => {
                self.emitter.end();
                return Ok(Bytes::new());
            }
            BodySlot::Consumed => return Err(BodyError::AlreadyConsumed),
        };

        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    if buf.len() + chunk.len() > limit {
                        self.emitter.error(format!("body exceeds {} bytes", limit));
                        return Err(BodyError::TooLarge { limit });
                    }
                    self.emitter.data(chunk.len());
                    buf.extend_from_slice(&chunk);
                }
                Err(e) => {
                    self.emitter.error(e.to_string());
                    return Err(e.into());
                }
            }
        }
        self.emitter.end();
        Ok(buf.freeze())
    }

    pub(crate) fn emitter(&self) -> &LifecycleEmitter {
        &self.emitter
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("principal", &self.principal.get())
            .finish()
    }
}
