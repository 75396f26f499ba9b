//! # plughost core
//!
//! The capability contract shared between the plughost instance host and the
//! plug-in packages it loads.
//!
//! A plug-in package depends on this crate only. It implements [`PlugIn`]
//! (the asynchronous, cancellable workload) and [`PlugInFactory`] (how the
//! host constructs it), optionally declares a configuration type with
//! `#[derive(PlugInConfiguration)]`, and exports itself with
//! [`export_plug_in!`].
//!
//! ```text
//! ┌────────────────┐  plughost_register   ┌──────────────────┐
//! │ plug-in package│ ───────────────────▶ │ PlugInDeclaration│
//! │   (cdylib)     │                      │   create(args)   │──▶ Box<dyn PlugIn>
//! └────────────────┘                      └──────────────────┘
//!        ▲                                         │
//!        │ PlugInLogger / DevicePublisher          │ execute(CancellationToken)
//!        └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use plughost_core::prelude::*;
//!
//! #[derive(Default, Serialize, Deserialize, PlugInConfiguration)]
//! pub struct TickerConfig {
//!     pub interval_ms: u64,
//! }
//!
//! pub struct Ticker {
//!     logger: PlugInLogger,
//!     config: TickerConfig,
//! }
//!
//! #[async_trait]
//! impl PlugIn for Ticker {
//!     async fn execute(&self, cancellation: CancellationToken) -> Result<(), PlugInError> {
//!         self.logger.info(format_args!("ticking every {} ms", self.config.interval_ms));
//!         cancellation.cancelled().await;
//!         Ok(())
//!     }
//! }
//!
//! impl PlugInFactory for Ticker {
//!     type Configuration = TickerConfig;
//!
//!     fn create(ctx: PlugInContext<TickerConfig>) -> BuildResult<Self> {
//!         Ok(Self { logger: ctx.logger, config: ctx.configuration })
//!     }
//! }
//!
//! export_plug_in!(Ticker);
//! ```

pub mod configuration;
pub mod declaration;
pub mod device;
pub mod error;
pub mod logger;
pub mod plug_in;

pub use configuration::{NoConfiguration, PlugInConfiguration, overlay};
pub use declaration::{
    PLUG_IN_REGISTER_SYMBOL, PLUGHOST_API_VERSION, PLUGHOST_CORE_VERSION, PlugInArgs,
    PlugInDeclaration, PlugInRegistrar, RegisterFn, declare,
};
pub use device::{DeviceEvent, DeviceEventSink, DevicePublisher, DeviceRecord, ParameterRecord};
pub use error::{BoxError, BuildError, BuildResult, PlugInError};
pub use logger::{LogSink, NullSink, PlugInLogger};
pub use plug_in::{BoxedPlugIn, PlugIn, PlugInContext, PlugInFactory};

pub use plughost_macros::PlugInConfiguration;

// Re-exported so plug-in packages build against the same versions as the host.
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

/// Everything a plug-in package usually needs.
pub mod prelude {
    pub use crate::{
        BuildError, BuildResult, CancellationToken, DeviceEvent, DevicePublisher, DeviceRecord,
        NoConfiguration, ParameterRecord, PlugIn, PlugInConfiguration, PlugInContext,
        PlugInError, PlugInFactory, PlugInLogger, async_trait, export_plug_in,
    };
    pub use serde::{Deserialize, Serialize};
}
