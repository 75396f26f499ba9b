//! The plug-in capability contract.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::configuration::PlugInConfiguration;
use crate::device::DevicePublisher;
use crate::error::{BuildResult, PlugInError};
use crate::logger::PlugInLogger;

/// A unit of business logic hosted by an instance host.
///
/// The host calls [`execute`](Self::execute) exactly once per run on a
/// background task. Cancellation is cooperative: the workload must watch
/// `cancellation` and return (either `Ok(())` or [`PlugInError::Cancelled`])
/// once it fires.
///
/// [`dispose`](Self::dispose) runs after `execute` has returned, whatever the
/// outcome, and before the object is dropped.
#[async_trait]
pub trait PlugIn: Send + Sync {
    /// Runs the workload until it finishes or `cancellation` fires.
    async fn execute(&self, cancellation: CancellationToken) -> Result<(), PlugInError>;

    /// Releases resources held by the plug-in.
    fn dispose(&self) {}
}

/// Type-erased plug-in object.
pub type BoxedPlugIn = Box<dyn PlugIn>;

/// Everything the host injects into a plug-in at construction time.
pub struct PlugInContext<C> {
    /// Logger bound to the plug-in's type name.
    pub logger: PlugInLogger,
    /// Materialised configuration (default, or default overlaid with the
    /// stored JSON).
    pub configuration: C,
    /// Publisher for device domain events.
    pub publisher: DevicePublisher,
}

/// Constructor convention every exported plug-in type implements.
///
/// `Configuration` names the type the host must materialise before calling
/// [`create`](Self::create). Plug-ins without configuration use
/// [`NoConfiguration`](crate::NoConfiguration).
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Default, Serialize, Deserialize, PlugInConfiguration)]
/// struct PollerConfig { interval_ms: u64 }
///
/// struct Poller { logger: PlugInLogger, config: PollerConfig }
///
/// impl PlugInFactory for Poller {
///     type Configuration = PollerConfig;
///
///     fn create(ctx: PlugInContext<PollerConfig>) -> BuildResult<Self> {
///         Ok(Self { logger: ctx.logger, config: ctx.configuration })
///     }
/// }
/// ```
pub trait PlugInFactory: PlugIn + Sized + 'static {
    /// The configuration type for this plug-in.
    type Configuration: PlugInConfiguration;

    /// Builds the plug-in object.
    fn create(context: PlugInContext<Self::Configuration>) -> BuildResult<Self>;
}
