//! In-memory transport used to observe exactly what reached the wire.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::transport::sink::{ResponseSink, TransportError};

/// Everything a [`MemorySink`] has been asked to do.
#[derive(Debug, Default, Clone)]
pub struct MemoryRecord {
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub body: BytesMut,
    /// Number of terminating writes.
    pub ends: usize,
    pub fail_writes: bool,
}

impl MemoryRecord {
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn body_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// A [`ResponseSink`] whose record outlives the sink itself.
#[derive(Clone, Default)]
pub struct MemorySink {
    record: Arc<Mutex<MemoryRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every write is rejected, as if the peer went away.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.record.lock().fail_writes = true;
        sink
    }

    pub fn snapshot(&self) -> MemoryRecord {
        self.record.lock().clone()
    }

    pub fn ends(&self) -> usize {
        self.record.lock().ends
    }
}

impl ResponseSink for MemorySink {
    fn set_status(&mut self, status: StatusCode) {
        self.record.lock().status = Some(status);
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.record.lock().headers.insert(name, value);
    }

    fn write(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        let mut record = self.record.lock();
        if record.fail_writes {
            return Err(TransportError::Closed);
        }
        record.body.extend_from_slice(&chunk);
        Ok(())
    }

    fn end(&mut self) -> Result<(), TransportError> {
        let mut record = self.record.lock();
        record.ends += 1;
        if record.fail_writes {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}
