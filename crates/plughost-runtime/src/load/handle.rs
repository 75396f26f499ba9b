use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use super::LoadContext;
use crate::error::{HostError, HostResult};

/// The host's owning reference to a package's load context.
#[derive(Debug)]
pub struct LoadContextHandle {
    context: Option<Arc<LoadContext>>,
    weak: Weak<LoadContext>,
    name: String,
}

impl LoadContextHandle {
    pub fn new(context: LoadContext) -> Self {
        let name = context.name().to_string();
        let context = Arc::new(context);
        let weak = Arc::downgrade(&context);
        Self {
            context: Some(context),
            weak,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` once [`unload`](Self::unload) has run.
    pub fn is_unloaded(&self) -> bool {
        self.context.is_none()
    }

    /// Returns the context, unless it has been released.
    pub fn target(&self) -> HostResult<Arc<LoadContext>> {
        self.weak
            .upgrade()
            .ok_or_else(|| HostError::LoadContextCollected(self.name.clone()))
    }

    /// Starts unloading, drops the host's reference and waits for all other
    /// references to go away.
    ///
    /// Blocks the calling thread between checks. Returns whether the context
    /// was released within `attempts` checks.
    pub fn unload(&mut self, attempts: u32, interval: Duration) -> bool {
        let name = &self.name;
        let weak = &self.weak;
        if let Some(context) = self.context.take() {
            context.unload();
        }

        for attempt in 0..attempts {
            if weak.strong_count() == 0 {
                debug!(context = %name, attempts = attempt, "Load context released");
                return true;
            }
            std::thread::sleep(interval);
        }

        if weak.strong_count() == 0 {
            debug!(context = %name, attempts, "Load context released");
            return true;
        }

        warn!(
            context = %name,
            references = weak.strong_count(),
            attempts,
            "Load context still referenced after unload"
        );
        false
    }
}
