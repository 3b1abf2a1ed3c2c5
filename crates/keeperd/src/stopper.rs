//! Cooperative cancellation flag for the bootstrap sequence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared one-way flag: starts clear and, once set, stays set.
///
/// Signal handlers set it through [`Stopper::flag`]; the bootstrap sequence
/// reads it between steps.
#[derive(Debug, Clone, Default)]
pub struct Stopper {
    flag: Arc<AtomicBool>,
}

impl Stopper {
    /// Creates a clear stopper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Reports whether cancellation has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Shared flag suitable for `signal_hook::flag::register`.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}
