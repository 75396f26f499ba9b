//! Host configuration.
//!
//! Settings are layered with figment: defaults, then one `plughost.*` file,
//! then `PLUGHOST_*` environment variables. See [`loader`] for the order.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ENV_PREFIX, load_config};
pub use schema::{
    HostConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, PlugHostConfig,
    SpanEventConfig,
};
pub use validation::validate_config;
