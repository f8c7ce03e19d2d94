//! Lifecycle hooks.

use crate::config::Configuration;

/// Observes store lifecycle events.
///
/// Layers such as a sync client install a hook to tear down per-store
/// resources once nothing in the process uses the store anymore.
pub trait LifecycleHook: Send + Sync {
    /// Called once the last handle on `config`'s path closes, on any thread.
    fn store_closed(&self, config: &Configuration);
}

impl<F> LifecycleHook for F
where
    F: Fn(&Configuration) + Send + Sync,
{
    fn store_closed(&self, config: &Configuration) {
        self(config);
    }
}
