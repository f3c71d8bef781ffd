//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EngineConfig (validated, immutable)
//!     → handed to the Engine at startup
//!
//! On change:
//!     watcher.rs detects modification
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Engine::apply_config swaps deadline settings and log level
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A reload that fails validation keeps the running configuration

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, EngineConfig, HttpConfig, ListenerConfig, LogFormat, LoggingConfig,
    ObservabilityConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
