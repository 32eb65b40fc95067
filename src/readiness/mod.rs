//! Readiness gate - the process-wide "ready to serve" flag.
//!
//! Starts closed and opens at most once. There is no way to close it again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Clonable handle to a shared readiness flag.
#[derive(Debug, Clone, Default)]
pub struct ReadinessGate {
    ready: Arc<AtomicBool>,
}

impl ReadinessGate {
    /// A closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Open the gate. Returns `true` only for the call that opened it.
    pub fn mark_ready(&self) -> bool {
        self.ready
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
