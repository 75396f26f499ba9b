//! Turns a loaded code unit into a live plug-in object.

use std::fmt;
use std::sync::Arc;

use plughost_core::{BoxedPlugIn, DevicePublisher, LogSink, PlugIn, PlugInArgs};
use tracing::{Level, debug, error, info, trace, warn};

use crate::error::{HostError, HostResult};
use crate::instance::InstanceConfiguration;
use crate::load::CodeUnit;

/// `tracing` target of records written by plug-ins.
pub const PLUG_IN_LOG_TARGET: &str = "plughost::plug_in";

/// Forwards plug-in log records to the host's `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, level: Level, category: &str, message: &str) {
        match level {
            Level::TRACE => trace!(target: PLUG_IN_LOG_TARGET, category, "{message}"),
            Level::DEBUG => debug!(target: PLUG_IN_LOG_TARGET, category, "{message}"),
            Level::INFO => info!(target: PLUG_IN_LOG_TARGET, category, "{message}"),
            Level::WARN => warn!(target: PLUG_IN_LOG_TARGET, category, "{message}"),
            Level::ERROR => error!(target: PLUG_IN_LOG_TARGET, category, "{message}"),
        }
    }

    fn enabled(&self, level: Level, _category: &str) -> bool {
        match level {
            Level::TRACE => tracing::enabled!(target: PLUG_IN_LOG_TARGET, Level::TRACE),
            Level::DEBUG => tracing::enabled!(target: PLUG_IN_LOG_TARGET, Level::DEBUG),
            Level::INFO => tracing::enabled!(target: PLUG_IN_LOG_TARGET, Level::INFO),
            Level::WARN => tracing::enabled!(target: PLUG_IN_LOG_TARGET, Level::WARN),
            Level::ERROR => tracing::enabled!(target: PLUG_IN_LOG_TARGET, Level::ERROR),
        }
    }
}

/// A plug-in object together with the code it was built from.
///
/// Fields drop in declaration order, so the object is always released
/// before its code unit. The type name is copied out of the unit so it can be
/// logged after the unit is gone.
pub struct BuiltPlugIn {
    plug_in: BoxedPlugIn,
    type_name: String,
    unit: Option<CodeUnit>,
}

impl BuiltPlugIn {
    /// Wraps an object constructed by the caller; no code unit is held.
    pub fn from_plug_in(plug_in: BoxedPlugIn) -> Self {
        Self {
            plug_in,
            type_name: "<linked>".to_string(),
            unit: None,
        }
    }

    pub fn plug_in(&self) -> &dyn PlugIn {
        self.plug_in.as_ref()
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn unit(&self) -> Option<&CodeUnit> {
        self.unit.as_ref()
    }
}

impl fmt::Debug for BuiltPlugIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltPlugIn")
            .field("type_name", &self.type_name)
            .field("unit", &self.unit)
            .finish_non_exhaustive()
    }
}

/// Builds plug-in objects from code units.
#[derive(Clone)]
pub struct PlugInBuilder {
    configuration_support: bool,
    log_sink: Arc<dyn LogSink>,
}

impl PlugInBuilder {
    pub fn new(configuration_support: bool) -> Self {
        Self {
            configuration_support,
            log_sink: Arc::new(TracingLogSink),
        }
    }

    /// Replaces the sink plug-in loggers write to.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = sink;
        self
    }

    pub fn configuration_support(&self) -> bool {
        self.configuration_support
    }

    /// Builds the single plug-in type exported by `unit`.
    pub fn build(
        &self,
        unit: CodeUnit,
        configuration: &InstanceConfiguration,
        publisher: DevicePublisher,
    ) -> HostResult<BuiltPlugIn> {
        let declaration = match unit.declarations() {
            [] => return Err(HostError::PlugInTypeNotFound(unit.path().to_path_buf())),
            [declaration] => *declaration,
            several => {
                return Err(HostError::MultiplePlugInTypes {
                    path: unit.path().to_path_buf(),
                    count: several.len(),
                });
            }
        };

        let raw_json = if self.configuration_support && declaration.has_configuration() {
            configuration.raw_json.clone()
        } else {
            None
        };

        trace!(
            type_name = declaration.type_name,
            configuration_type = declaration.configuration_type.unwrap_or("-"),
            configured = raw_json.is_some(),
            "Building plug-in"
        );

        let plug_in = declaration.instantiate(PlugInArgs {
            log_sink: Arc::clone(&self.log_sink),
            configuration: raw_json,
            publisher,
        })?;

        Ok(BuiltPlugIn {
            plug_in,
            type_name: declaration.type_name.to_string(),
            unit: Some(unit),
        })
    }
}

impl fmt::Debug for PlugInBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlugInBuilder")
            .field("configuration_support", &self.configuration_support)
            .finish_non_exhaustive()
    }
}
