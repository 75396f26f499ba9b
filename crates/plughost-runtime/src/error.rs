//! Host error types.

use std::path::PathBuf;

use plughost_core::BuildError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::instance::InstanceId;

/// Errors returned by the instance host and its load contexts.
#[derive(Error, Debug)]
pub enum HostError {
    /// An argument failed validation before any state was touched.
    #[error("Invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// An instance with this id is already held.
    #[error("Instance already exists: {0}")]
    InstanceExists(InstanceId),

    /// The host already holds the configured maximum of instances.
    #[error("Maximum number of instances reached ({max})")]
    MaxInstancesRunning { max: usize },

    /// No instance with this id is held.
    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// The instance is starting or running.
    #[error("Instance is running: {0}")]
    InstanceRunning(InstanceId),

    /// The plug-in requires configuration and none is stored.
    #[error("Instance requires configuration: {0}")]
    InstanceNotConfigured(InstanceId),

    /// The code unit does not exist on disk.
    #[error("Plug-in assembly not found: {}", .0.display())]
    AssetNotFound(PathBuf),

    /// The code unit exports no plug-in type.
    #[error("No plug-in type found in {}", .0.display())]
    PlugInTypeNotFound(PathBuf),

    /// The code unit exports more than one plug-in type.
    #[error("{count} plug-in types found in {}, expected exactly one", .path.display())]
    MultiplePlugInTypes { path: PathBuf, count: usize },

    /// The plug-in rejected its configuration or failed to construct.
    #[error("Invalid plug-in configuration: {0}")]
    InvalidConfiguration(#[from] BuildError),

    /// The plug-in factory panicked.
    #[error("Plug-in panicked while being built: {0}")]
    BuildPanicked(String),

    /// The plug-in was built against an incompatible API version.
    #[error("Plug-in `{type_name}` uses API {found}, host provides {expected}")]
    IncompatiblePlugIn {
        type_name: String,
        found: String,
        expected: String,
    },

    /// The dynamic loader could not open a library or resolve a symbol.
    #[error("Failed to load {}: {source}", .path.display())]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    /// The dependency manifest beside a code unit is unreadable.
    #[error("Invalid dependency manifest {}: {source}", .path.display())]
    DependencyManifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The handle's load context has already been released.
    #[error("Load context `{0}` has been collected")]
    LoadContextCollected(String),

    /// The load context is unloading and accepts no further units.
    #[error("Load context `{0}` is unloading")]
    LoadContextUnloading(String),

    /// Host configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HostError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors caused by the addressed instance's state
    /// rather than by the request itself.
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            Self::InstanceRunning(_) | Self::InstanceNotConfigured(_)
        )
    }
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;
