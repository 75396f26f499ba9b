//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlugHostConfig {
    /// Instance host settings.
    #[serde(default)]
    pub host: HostConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Instance host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Maximum number of instances the host holds at once.
    #[serde(default = "default_max_executing_instances")]
    pub max_executing_instances: usize,

    /// How long a stop request waits for the workload to finish, in milliseconds.
    #[serde(default = "default_task_stop_timeout_ms")]
    pub task_stop_timeout_ms: u64,

    /// Whether stored configuration JSON is passed to plug-ins and
    /// `requires_configuration` is enforced.
    #[serde(default = "default_configuration_support")]
    pub configuration_support: bool,

    /// How many times an unload checks for outstanding references.
    #[serde(default = "default_unload_attempts")]
    pub unload_attempts: u32,

    /// Delay between unload checks, in milliseconds.
    #[serde(default = "default_unload_interval_ms")]
    pub unload_interval_ms: u64,

    /// Capacity of the state-change notification channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Directory of installed packages; relative assembly paths resolve
    /// against `<assembly_root>/<plug_in_id>/`.
    #[serde(default)]
    pub assembly_root: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_executing_instances: default_max_executing_instances(),
            task_stop_timeout_ms: default_task_stop_timeout_ms(),
            configuration_support: default_configuration_support(),
            unload_attempts: default_unload_attempts(),
            unload_interval_ms: default_unload_interval_ms(),
            event_capacity: default_event_capacity(),
            assembly_root: None,
        }
    }
}

impl HostConfig {
    /// Stop timeout as a [`Duration`].
    pub fn task_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.task_stop_timeout_ms)
    }

    /// Unload poll interval as a [`Duration`].
    pub fn unload_interval(&self) -> Duration {
        Duration::from_millis(self.unload_interval_ms)
    }
}

fn default_max_executing_instances() -> usize {
    10
}

fn default_task_stop_timeout_ms() -> u64 {
    5000
}

fn default_configuration_support() -> bool {
    true
}

fn default_unload_attempts() -> u32 {
    10
}

fn default_unload_interval_ms() -> u64 {
    50
}

fn default_event_capacity() -> usize {
    256
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the level as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    Json,
}

/// Destination of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Rotation policy for file output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged. Each instance run is a span, so
/// `new` and `close` bracket a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

impl SpanEventConfig {
    /// Span creation and close only: one line when a run starts, one when it ends.
    pub const RUNS: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Base log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Line format.
    #[serde(default)]
    pub format: LogFormat,

    /// Destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Span lifecycle events.
    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Level for lines plug-ins write through their logger, independent of
    /// the host's own level.
    #[serde(default)]
    pub plug_in_level: LogLevel,

    /// Log file path for `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Rotation for file output.
    #[serde(default)]
    pub rotation: LogRotation,

    /// Per-module level overrides, e.g. `plughost_runtime::host = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}
