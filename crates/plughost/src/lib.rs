//! # plughost
//!
//! Host dynamically loaded plug-ins inside a single long-running process.
//! Every plug-in instance runs as its own cancellable task, and the code of
//! each package lives in a load context that is closed once none of its
//! instances is active.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ create/start/stop ┌──────────────┐ per package ┌──────────────┐
//! │  embedding   │──────────────────▶│ InstanceHost │────────────▶│ LoadContext  │──▶ lib*.so
//! │ application  │◀──────────────────│              │             └──────────────┘
//! └──────────────┘ state changes     └──────┬───────┘
//!                                           │ one task per instance
//!                                           ▼
//!                                 PlugIn::execute(cancellation)
//!                                           │ device events
//!                                           ▼
//!                               DeviceUpdateHandler ──▶ UpdateQueue
//! ```
//!
//! - **plughost-core**: what a plug-in package implements and exports
//! - **plughost-runtime**: the host, load contexts, configuration and logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use plughost::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = PlugInRuntime::new();
//!     runtime.start();
//!
//!     let host = runtime.host();
//!     host.create_instance(InstanceDefinition::new(1, 1, "meter", "libmeter.so"))?;
//!     host.start_instance(1)?;
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: read `plughost.toml` (default)
//! - `yaml-config`: read `plughost.yaml`
//! - `json-log`: JSON log lines

pub use plughost_core as core;
pub use plughost_runtime as runtime;

/// Commonly used types for hosts and plug-in packages.
///
/// ```rust,ignore
/// use plughost::prelude::*;
/// ```
pub mod prelude {
    // Host side
    pub use plughost_runtime::{
        Fault, FaultKind, HostConfig, HostError, HostResult, InstanceConfiguration,
        InstanceDefinition, InstanceHost, InstanceId, InstanceInfo, InstanceState,
        InstanceStateChanged, PlugHostConfig, PlugInId, PlugInRuntime, UpdateCommand,
        UpdateQueue,
    };

    // Plug-in side
    pub use plughost_core::prelude::*;
}
