//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber from [`LoggingConfig`]
//! - Change the log filter at runtime through a [`LogHandle`]
//! - Optionally log every lifecycle event at trace level
//!
//! # Design Decisions
//! - JSON format for production, pretty format for development
//! - `RUST_LOG` wins over the configured level at startup

use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use crate::config::{LogFormat, LoggingConfig};
use crate::events::{EventBus, EventKind, SubscriptionId};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter `{directive}`: {source}")]
    Filter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to update log filter: {0}")]
    Reload(#[from] reload::Error),
    #[error("failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Runtime control over the installed log filter.
#[derive(Clone)]
pub struct LogHandle {
    inner: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    /// Replace the active filter, e.g. `"debug"` or `"request_lifecycle=trace,info"`.
    pub fn set_level(&self, directive: &str) -> Result<(), LoggingError> {
        let filter = parse_filter(directive)?;
        self.inner.reload(filter)?;
        tracing::info!(level = %directive, "Log level changed");
        Ok(())
    }
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle").finish_non_exhaustive()
    }
}

fn parse_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directive).map_err(|source| LoggingError::Filter {
        directive: directive.to_string(),
        source,
    })
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<LogHandle, LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(&config.level)?,
    };
    let (filter, handle) = reload::Layer::new(filter);

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
        LogFormat::Pretty => registry.with(fmt::layer()).try_init()?,
    }

    Ok(LogHandle { inner: handle })
}

/// Log every declared lifecycle event at trace level.
pub fn trace_events(bus: &Arc<EventBus>) -> Vec<(EventKind, SubscriptionId)> {
    bus.subscribe_all(|event| {
        tracing::trace!(
            event = %event.kind,
            request_id = %event.request_id,
            side = event.side.as_str(),
            payload = ?event.payload,
            "Lifecycle event"
        );
        Ok(())
    })
}
