use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-flight gate for the enrollment dialog. The speaker and microphone
/// are only touched by whoever holds the permit.
#[derive(Debug, Clone, Default)]
pub struct InteractionGuard {
    busy: Arc<AtomicBool>,
}

/// Proof of holding the guard. Dropping it releases the guard, so a dialog
/// that errors or panics still frees it.
#[derive(Debug)]
pub struct InteractionPermit {
    busy: Arc<AtomicBool>,
}

impl InteractionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a permit iff the guard was free.
    pub fn try_acquire(&self) -> Option<InteractionPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InteractionPermit { busy: Arc::clone(&self.busy) })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Clears the flag without a permit. Only for shutdown, after the grace
    /// period for a stuck dialog has run out.
    pub fn force_release(&self) {
        if self.busy.swap(false, Ordering::AcqRel) {
            tracing::warn!("Interaction guard force-released");
        }
    }
}

impl InteractionPermit {
    /// Explicit release; equivalent to dropping the permit.
    pub fn release(self) {}
}

impl Drop for InteractionPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
