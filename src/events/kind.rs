//! Event kinds and the immutable event value published on the bus.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::request::RequestId;

/// Which half of an exchange an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Request,
    Response,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Request => "request",
            Side::Response => "response",
        }
    }
}

/// Lifecycle moment observed on one side of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Start,
    Data,
    End,
    Error,
    Close,
}

impl Signal {
    pub const ALL: [Signal; 5] = [
        Signal::Start,
        Signal::Data,
        Signal::End,
        Signal::Error,
        Signal::Close,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Start => "start",
            Signal::Data => "data",
            Signal::End => "end",
            Signal::Error => "error",
            Signal::Close => "close",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Signal::ALL.into_iter().find(|signal| signal.as_str() == s)
    }
}

/// Tag identifying what an event means. The bus is keyed by [`EventKind::name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Lifecycle(Side, Signal),
    /// A request was forcibly finalized by the deadline supervisor.
    Interrupt,
    /// Application-defined name, must be declared on the bus before use.
    Custom(Arc<str>),
}

impl EventKind {
    pub const INTERRUPT_NAME: &'static str = "request:interrupt";

    pub const fn request(signal: Signal) -> Self {
        EventKind::Lifecycle(Side::Request, signal)
    }

    pub const fn response(signal: Signal) -> Self {
        EventKind::Lifecycle(Side::Response, signal)
    }

    /// Every kind the bus declares at construction.
    pub fn builtin() -> impl Iterator<Item = EventKind> {
        [Side::Request, Side::Response]
            .into_iter()
            .flat_map(|side| Signal::ALL.into_iter().map(move |s| EventKind::Lifecycle(side, s)))
            .chain(std::iter::once(EventKind::Interrupt))
    }

    /// Parse a namespaced event name (`request:start`, `response:close`, ...).
    /// Anything unrecognised becomes a [`EventKind::Custom`].
    pub fn from_name(name: &str) -> Self {
        if name == Self::INTERRUPT_NAME {
            return EventKind::Interrupt;
        }
        let lifecycle = name.split_once(':').and_then(|(side, signal)| {
            let side = match side {
                "request" => Side::Request,
                "response" => Side::Response,
                _ => return None,
            };
            Signal::parse(signal).map(|signal| EventKind::Lifecycle(side, signal))
        });
        lifecycle.unwrap_or_else(|| EventKind::Custom(Arc::from(name)))
    }

    pub fn name(&self) -> Cow<'static, str> {
        match self {
            EventKind::Lifecycle(side, signal) => {
                Cow::Owned(format!("{}:{}", side.as_str(), signal.as_str()))
            }
            EventKind::Interrupt => Cow::Borrowed(Self::INTERRUPT_NAME),
            EventKind::Custom(name) => Cow::Owned(name.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Data carried alongside an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    None,
    /// Deadline requested for this exchange, if it overrides the configured default.
    Start { deadline: Option<Duration> },
    Chunk { size: usize },
    Elapsed { elapsed: Duration },
    Error { message: String },
    Interrupt {
        reason: String,
        status: u16,
        elapsed: Duration,
    },
    Json(serde_json::Value),
}

/// A published event. Created at the moment of publication and never mutated.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub request_id: RequestId,
    pub side: Side,
    pub timestamp: SystemTime,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(kind: EventKind, request_id: RequestId, side: Side, payload: EventPayload) -> Self {
        Self {
            kind,
            request_id,
            side,
            timestamp: SystemTime::now(),
            payload,
        }
    }

    pub fn name(&self) -> Cow<'static, str> {
        self.kind.name()
    }
}
