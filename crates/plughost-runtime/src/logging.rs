//! Global `tracing` subscriber for a host process.
//!
//! Two streams share one subscriber: the host's own diagnostics, and the lines
//! plug-ins write through their [`PlugInLogger`](plughost_core::PlugInLogger),
//! which arrive under the [`PLUG_IN_LOG_TARGET`] target with a `category`
//! field naming the plug-in type. Each stream has its own level, so a chatty
//! plug-in can be held at `warn` while the host logs at `debug`.
//!
//! `PLUGHOST_LOG`, when set, replaces the configured filter entirely:
//!
//! ```text
//! PLUGHOST_LOG=info,plughost::plug_in=debug,plughost_runtime::load=trace
//! ```
//!
//! ```rust,ignore
//! use plughost_runtime::config::{LogLevel, SpanEventConfig};
//! use plughost_runtime::logging::LoggingBuilder;
//!
//! LoggingBuilder::new()
//!     .with_level(LogLevel::Debug)
//!     .plug_in_level(LogLevel::Warn)
//!     .span_events(SpanEventConfig::RUNS)
//!     .init();
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::builder::PLUG_IN_LOG_TARGET;
use crate::config::{LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, SpanEventConfig};

/// Environment variable holding a complete filter that overrides configuration.
pub const LOG_FILTER_ENV: &str = "PLUGHOST_LOG";

/// Installs the subscriber described by `config`. Does nothing if a global
/// subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

/// Builder for the host's global subscriber.
#[derive(Debug, Clone, Default)]
pub struct LoggingBuilder {
    level: LogLevel,
    plug_in_level: LogLevel,
    directives: Vec<String>,
    span_events: SpanEventConfig,
    format: LogFormat,
    output: LogOutput,
    file: Option<(PathBuf, LogRotation)>,
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut builder = Self {
            level: config.level,
            plug_in_level: config.plug_in_level,
            span_events: config.span_events,
            format: config.format,
            output: config.output,
            file: config
                .file_path
                .clone()
                .map(|path| (path, config.rotation)),
            ..Self::default()
        };
        // sorted so the filter does not depend on map iteration order
        let mut filters: Vec<_> = config.filters.iter().collect();
        filters.sort_by(|a, b| a.0.cmp(b.0));
        for (target, level) in filters {
            builder = builder.directive(format!("{target}={level}"));
        }
        builder
    }

    /// Level of the host's own diagnostics.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Level of plug-in log lines.
    pub fn plug_in_level(mut self, level: LogLevel) -> Self {
        self.plug_in_level = level;
        self
    }

    /// Adds a directive such as `plughost_runtime::host=trace`. Directives
    /// are applied after both levels and win over them.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn span_events(mut self, events: SpanEventConfig) -> Self {
        self.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Log file used when the output is [`LogOutput::File`].
    pub fn file(mut self, path: impl Into<PathBuf>, rotation: LogRotation) -> Self {
        self.file = Some((path.into(), rotation));
        self
    }

    /// Installs the subscriber, ignoring an already-installed one.
    pub fn init(self) {
        let _ = self.try_init();
    }

    pub fn try_init(self) -> Result<(), TryInitError> {
        let filter = self.filter();
        let layer = self.layer();
        tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init()
    }

    fn filter_spec(&self) -> String {
        let mut spec = format!("{},{PLUG_IN_LOG_TARGET}={}", self.level, self.plug_in_level);
        for directive in &self.directives {
            spec.push(',');
            spec.push_str(directive);
        }
        spec
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(self.filter_spec()))
    }

    fn log_file(&self) -> Option<&(PathBuf, LogRotation)> {
        match self.output {
            LogOutput::File => self.file.as_ref(),
            _ => None,
        }
    }

    fn writer(&self) -> BoxMakeWriter {
        match (self.output, self.log_file()) {
            (_, Some((path, rotation))) => BoxMakeWriter::new(file_appender(path, *rotation)),
            (LogOutput::Stderr, None) => BoxMakeWriter::new(std::io::stderr),
            // a file output without a path is rejected by validation
            _ => BoxMakeWriter::new(std::io::stdout),
        }
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let layer = fmt::layer()
            .with_writer(self.writer())
            .with_ansi(self.log_file().is_none())
            .with_span_events(fmt_span(self.span_events));
        match self.format {
            #[cfg(feature = "json-log")]
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            // without `json-log`, JSON falls back to the full format
            _ => layer.boxed(),
        }
    }
}

fn fmt_span(events: SpanEventConfig) -> FmtSpan {
    [
        (events.new, FmtSpan::NEW),
        (events.enter, FmtSpan::ENTER),
        (events.exit, FmtSpan::EXIT),
        (events.close, FmtSpan::CLOSE),
    ]
    .into_iter()
    .filter(|(enabled, _)| *enabled)
    .fold(FmtSpan::NONE, |span, (_, event)| span | event)
}

fn file_appender(path: &Path, rotation: LogRotation) -> RollingFileAppender {
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().unwrap_or_else(|| OsStr::new("plughost.log"));
    match rotation {
        LogRotation::Never => rolling::never(directory, file_name),
        LogRotation::Hourly => rolling::hourly(directory, file_name),
        LogRotation::Daily => rolling::daily(directory, file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plug_in_target_gets_its_own_level() {
        let builder = LoggingBuilder::new()
            .with_level(LogLevel::Debug)
            .plug_in_level(LogLevel::Warn);
        assert_eq!(builder.filter_spec(), "debug,plughost::plug_in=warn");
    }

    #[test]
    fn from_config_appends_sorted_filters() {
        let mut config = LoggingConfig {
            level: LogLevel::Warn,
            ..Default::default()
        };
        config
            .filters
            .insert("plughost_runtime::load".to_string(), LogLevel::Trace);
        config
            .filters
            .insert("plughost_runtime::host".to_string(), LogLevel::Debug);

        let spec = LoggingBuilder::from_config(&config).filter_spec();
        assert_eq!(
            spec,
            "warn,plughost::plug_in=info,plughost_runtime::host=debug,plughost_runtime::load=trace"
        );
        assert!(EnvFilter::try_new(&spec).is_ok());
    }

    #[test]
    fn file_path_only_applies_to_file_output() {
        let config = LoggingConfig {
            file_path: Some("/var/log/plughost/host.log".into()),
            rotation: LogRotation::Daily,
            ..Default::default()
        };
        let builder = LoggingBuilder::from_config(&config);
        assert!(builder.log_file().is_none());

        let builder = builder.output(LogOutput::File);
        let (path, rotation) = builder.log_file().unwrap();
        assert_eq!(path, Path::new("/var/log/plughost/host.log"));
        assert_eq!(*rotation, LogRotation::Daily);
    }

    #[test]
    fn span_events_map_to_fmt_span() {
        assert_eq!(fmt_span(SpanEventConfig::RUNS), FmtSpan::NEW | FmtSpan::CLOSE);
        assert_eq!(fmt_span(SpanEventConfig::default()), FmtSpan::NONE);
    }
}
