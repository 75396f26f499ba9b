//! plughost runtime - the host side of plughost.
//!
//! This crate provides:
//! - The instance host (`InstanceHost`): creation, start, stop and removal of
//!   plug-in instances, admission control and state-change notifications
//! - Per-package load contexts that close their libraries once no active
//!   instance uses them (`LoadContext`, `LoadContextHandle`)
//! - Code unit loaders for shared libraries and for statically linked plug-ins
//! - Device update routing to a persistence queue (`DeviceUpdateHandler`)
//! - Configuration loading and logging setup
//!
//! # Example
//!
//! ```ignore
//! use plughost_runtime::{HostConfig, InstanceDefinition, InstanceHost};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let host = InstanceHost::new(HostConfig::default());
//!     let mut changes = host.subscribe();
//!
//!     host.create_instance(InstanceDefinition::new(1, 1, "sensor", "/opt/plug-ins/libsensor.so"))?;
//!     host.start_instance(1)?;
//!
//!     while let Ok(change) = changes.recv().await {
//!         println!("{} -> {}", change.instance_id, change.state);
//!     }
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod execution;
pub mod host;
pub mod instance;
pub mod load;
pub mod logging;
pub mod runtime;
pub mod store;
pub mod updates;

// Re-exports
pub use builder::{BuiltPlugIn, PLUG_IN_LOG_TARGET, PlugInBuilder, TracingLogSink};
pub use config::{
    ConfigError, ConfigLoader, ConfigResult, HostConfig, LoggingConfig, PlugHostConfig,
};
pub use error::{HostError, HostResult};
pub use execution::ExecutionContext;
pub use host::{InstanceHost, InstanceHostBuilder};
pub use instance::{
    Fault, FaultKind, InstanceConfiguration, InstanceDefinition, InstanceId, InstanceInfo,
    InstanceState, InstanceStateChanged, PlugInId,
};
pub use load::{CodeUnit, LinkedUnitLoader, LoadContext, LoadContextHandle, NativeUnitLoader, UnitLoader};
pub use logging::{LOG_FILTER_ENV, LoggingBuilder};
pub use runtime::{PlugInRuntime, RuntimeBuilder};
pub use store::{DirectoryFileStore, FileStore};
pub use updates::{
    ChannelUpdateQueue, DeviceUpdate, DeviceUpdateHandler, DeviceUpdateSender, UpdateCommand,
    UpdateQueue, update_channel,
};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for embedding applications.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
