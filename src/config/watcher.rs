//! Hot reload of the configuration file.
//!
//! Editors tend to emit several notifications for one save, so a reload is
//! only forwarded when the file's text actually differs from the last
//! configuration that was sent.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::loader::parse_config;
use crate::config::schema::EngineConfig;

/// Watches one config file and sends every new, valid revision.
pub struct ConfigWatcher {
    reloader: Arc<Reloader>,
}

struct Reloader {
    path: PathBuf,
    last_applied: Mutex<Option<String>>,
    updates: mpsc::UnboundedSender<EngineConfig>,
}

impl Reloader {
    fn on_event(&self, kind: &EventKind) -> bool {
        if !(kind.is_modify() || kind.is_create()) {
            return false;
        }

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Config file unreadable, keeping current configuration");
                return false;
            }
        };

        let mut last = self.last_applied.lock();
        if last.as_deref() == Some(content.as_str()) {
            return false;
        }

        match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = ?self.path, "Config file changed, applying");
                if self.updates.send(config).is_err() {
                    tracing::debug!("Config receiver dropped, update discarded");
                    return false;
                }
                *last = Some(content);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload config. Keeping current configuration.");
                false
            }
        }
    }
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    ///
    /// The file's current text counts as already applied, so only later
    /// edits are sent.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<EngineConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let reloader = Reloader {
            path: path.to_path_buf(),
            last_applied: Mutex::new(fs::read_to_string(path).ok()),
            updates,
        };
        (
            Self {
                reloader: Arc::new(reloader),
            },
            rx,
        )
    }

    /// Start watching. The file is no longer watched once the returned
    /// handle is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let reloader = self.reloader.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    reloader.on_event(&event.kind);
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.reloader.path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.reloader.path, "Config watcher started");
        Ok(watcher)
    }
}
