//! Instance model and state-change notifications.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::execution::ExecutionContext;

/// Identifier of a plug-in instance.
pub type InstanceId = i64;

/// Identifier of the package an instance's code belongs to.
pub type PlugInId = i64;

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Created, never started.
    #[default]
    None,
    /// Plug-in built, task not yet running.
    Starting,
    /// Workload executing.
    Running,
    /// Workload finished normally or was cancelled.
    Complete,
    /// Build or workload failed.
    Faulted,
}

impl InstanceState {
    /// Returns `true` for `Starting` and `Running`.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Faulted => "faulted",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored configuration of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstanceConfiguration {
    /// The plug-in refuses to start without stored configuration.
    pub requires_configuration: bool,
    /// Stored configuration JSON.
    pub raw_json: Option<String>,
}

impl InstanceConfiguration {
    pub fn new(raw_json: impl Into<String>) -> Self {
        Self {
            requires_configuration: false,
            raw_json: Some(raw_json.into()),
        }
    }

    pub fn required(mut self) -> Self {
        self.requires_configuration = true;
        self
    }

    /// Returns `true` when non-blank JSON is stored.
    pub fn is_configured(&self) -> bool {
        self.raw_json
            .as_deref()
            .is_some_and(|json| !json.trim().is_empty())
    }
}

/// Everything needed to create an instance.
#[derive(Debug, Clone)]
pub struct InstanceDefinition {
    pub id: InstanceId,
    pub plug_in_id: PlugInId,
    pub name: String,
    pub assembly_path: PathBuf,
    pub configuration: InstanceConfiguration,
}

impl InstanceDefinition {
    pub fn new(
        id: InstanceId,
        plug_in_id: PlugInId,
        name: impl Into<String>,
        assembly_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id,
            plug_in_id,
            name: name.into(),
            assembly_path: assembly_path.into(),
            configuration: InstanceConfiguration::default(),
        }
    }

    pub fn with_configuration(mut self, configuration: InstanceConfiguration) -> Self {
        self.configuration = configuration;
        self
    }
}

/// Where a fault came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultKind {
    /// The plug-in could not be loaded or constructed.
    Build,
    /// `execute` returned an error.
    Runtime,
    /// `execute` panicked.
    Panic,
}

/// Error recorded on a faulted instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    /// Messages of the error's source chain, outermost first.
    pub causes: Vec<String>,
}

impl Fault {
    /// Records `error` and its source chain.
    pub fn from_error(kind: FaultKind, error: &(dyn StdError + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            kind,
            message: error.to_string(),
            causes,
        }
    }

    /// Records a caught panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "plug-in panicked".to_string()
        };
        Self {
            kind: FaultKind::Panic,
            message,
            causes: Vec::new(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for cause in &self.causes {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

/// Snapshot of an instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub plug_in_id: PlugInId,
    pub name: String,
    pub assembly_path: PathBuf,
    pub configuration: InstanceConfiguration,
    pub state: InstanceState,
    pub start_time: Option<SystemTime>,
    pub stop_time: Option<SystemTime>,
    pub fault: Option<Fault>,
}

impl InstanceInfo {
    /// Time between start and stop, or since start while still running.
    pub fn running_time(&self) -> Duration {
        running_time(self.start_time, self.stop_time)
    }
}

/// Notification sent on every state change.
///
/// Serializes to the JSON shape observers forward to their clients.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStateChanged {
    pub instance_id: InstanceId,
    pub plug_in_id: PlugInId,
    pub state: InstanceState,
    pub fault: Option<Fault>,
}

fn running_time(start: Option<SystemTime>, stop: Option<SystemTime>) -> Duration {
    match (start, stop) {
        (Some(start), Some(stop)) => stop.duration_since(start).unwrap_or_default(),
        (Some(start), None) => start.elapsed().unwrap_or_default(),
        _ => Duration::ZERO,
    }
}

/// Host-side record of one instance.
pub(crate) struct Instance {
    pub(crate) id: InstanceId,
    pub(crate) plug_in_id: PlugInId,
    pub(crate) name: String,
    pub(crate) assembly_path: PathBuf,
    pub(crate) configuration: InstanceConfiguration,
    pub(crate) state: InstanceState,
    pub(crate) start_time: Option<SystemTime>,
    pub(crate) stop_time: Option<SystemTime>,
    pub(crate) fault: Option<Fault>,
    pub(crate) execution: Option<ExecutionContext>,
    /// Bumped on every start so a late completion cannot touch a newer run.
    pub(crate) run: u64,
}

impl Instance {
    pub(crate) fn new(definition: InstanceDefinition) -> Self {
        Self {
            id: definition.id,
            plug_in_id: definition.plug_in_id,
            name: definition.name,
            assembly_path: definition.assembly_path,
            configuration: definition.configuration,
            state: InstanceState::None,
            start_time: None,
            stop_time: None,
            fault: None,
            execution: None,
            run: 0,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub(crate) fn info(&self) -> InstanceInfo {
        InstanceInfo {
            id: self.id,
            plug_in_id: self.plug_in_id,
            name: self.name.clone(),
            assembly_path: self.assembly_path.clone(),
            configuration: self.configuration.clone(),
            state: self.state,
            start_time: self.start_time,
            stop_time: self.stop_time,
            fault: self.fault.clone(),
        }
    }

    pub(crate) fn changed(&self) -> InstanceStateChanged {
        InstanceStateChanged {
            instance_id: self.id,
            plug_in_id: self.plug_in_id,
            state: self.state,
            fault: self.fault.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_json_is_not_configured() {
        assert!(!InstanceConfiguration::default().is_configured());
        assert!(!InstanceConfiguration::new("  \n").is_configured());
        assert!(InstanceConfiguration::new("{}").is_configured());
    }

    #[test]
    fn test_active_states() {
        assert!(InstanceState::Starting.is_active());
        assert!(InstanceState::Running.is_active());
        assert!(!InstanceState::None.is_active());
        assert!(!InstanceState::Complete.is_active());
        assert!(!InstanceState::Faulted.is_active());
    }

    #[test]
    fn test_running_time() {
        let start = SystemTime::UNIX_EPOCH;
        let stop = start + Duration::from_secs(3);
        assert_eq!(running_time(Some(start), Some(stop)), Duration::from_secs(3));
        assert_eq!(running_time(None, None), Duration::ZERO);
    }

    #[test]
    fn test_fault_collects_causes() {
        let inner = std::io::Error::other("disk gone");
        let error = plughost_core::PlugInError::with_source("poll failed", inner);
        let fault = Fault::from_error(FaultKind::Runtime, &error);
        assert_eq!(fault.kind, FaultKind::Runtime);
        assert_eq!(fault.causes, vec!["disk gone".to_string()]);
        assert!(fault.to_string().contains("disk gone"));
    }

    #[test]
    fn test_fault_from_panic_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(Fault::from_panic(payload.as_ref()).message, "boom");
    }

    #[test]
    fn test_state_change_serializes_for_observers() {
        let change = InstanceStateChanged {
            instance_id: 4,
            plug_in_id: 2,
            state: InstanceState::Faulted,
            fault: Some(Fault {
                kind: FaultKind::Build,
                message: "bad config".to_string(),
                causes: Vec::new(),
            }),
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["instance_id"], 4);
        assert_eq!(json["state"], "faulted");
        assert_eq!(json["fault"]["kind"], "build");
        assert_eq!(json["fault"]["message"], "bad config");
    }
}
