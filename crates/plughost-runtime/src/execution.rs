//! Resources of one instance run.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::builder::BuiltPlugIn;

/// Tokens of one run, plus the live plug-in and its task once built.
///
/// Exists only while its instance is starting or running. The tokens are
/// created when the start is accepted, so a stop issued while the plug-in is
/// still being built is seen by the workload when it begins.
#[derive(Default)]
pub struct ExecutionContext {
    plug_in: Option<Arc<BuiltPlugIn>>,
    task: Option<JoinHandle<()>>,
    cancellation: CancellationToken,
    completed: CancellationToken,
}

impl ExecutionContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&mut self, plug_in: Arc<BuiltPlugIn>, task: JoinHandle<()>) {
        self.plug_in = Some(plug_in);
        self.task = Some(task);
    }

    /// Token passed to `execute`.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Cancelled once the run has finished and been cleaned up.
    pub fn completed(&self) -> &CancellationToken {
        &self.completed
    }

    /// The plug-in, once built.
    pub fn plug_in(&self) -> Option<&Arc<BuiltPlugIn>> {
        self.plug_in.as_ref()
    }

    /// Disposes the plug-in, then drops it and its code unit.
    pub(crate) fn dispose(self) {
        let Self { plug_in, task, .. } = self;
        // the task is the caller; dropping its handle only detaches it
        drop(task);
        let Some(plug_in) = plug_in else {
            return;
        };
        plug_in.plug_in().dispose();
        let type_name = plug_in.type_name().to_string();
        drop(plug_in);
        trace!(type_name, "Execution context disposed");
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("plug_in", &self.plug_in.as_ref().map(|p| p.type_name()))
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("completed", &self.completed.is_cancelled())
            .finish()
    }
}
