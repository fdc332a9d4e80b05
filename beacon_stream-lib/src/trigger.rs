use std::sync::atomic::{AtomicBool, Ordering};

/// One-shot gate: the first caller of [`fire`](Self::fire) runs its start
/// closure, every later caller is a no-op. Never reset.
#[derive(Debug, Default)]
pub struct BroadcastTrigger {
    fired: AtomicBool,
}

impl BroadcastTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start` if the gate has not fired yet. Returns whether it ran.
    pub fn fire<F: FnOnce()>(&self, start: F) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            start();
            true
        } else {
            false
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}
