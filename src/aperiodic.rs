//! Aperiodic request channel (spec §3, §4.3): a latching boolean guarded by
//! a mutex. `request()` is the only externally callable operation; it never
//! blocks on dispatcher state and never transitions the aperiodic task's
//! state itself — only the dispatcher does that, once per frame, by
//! sampling and clearing the latch.

use parking_lot::Mutex;

/// Coalescing request latch: multiple calls to [`RequestLatch::request`]
/// within one frame collapse into a single pending request (spec P7), by
/// design — "the aperiodic request latch may lose a second signal arriving
/// while already set; this is the intended coalescing semantics" (spec §5).
#[derive(Default)]
pub struct RequestLatch {
    pending: Mutex<bool>,
}

impl RequestLatch {
    pub fn new() -> Self {
        RequestLatch {
            pending: Mutex::new(false),
        }
    }

    /// Latch a release request for the next frame. Cheap, non-blocking,
    /// callable from any context (spec §4.3).
    pub fn request(&self) {
        *self.pending.lock() = true;
    }

    /// Atomically sample and clear the latch (spec §4.2 Step C). Only the
    /// dispatcher calls this.
    pub fn sample_and_clear(&self) -> bool {
        let mut guard = self.pending.lock();
        std::mem::take(&mut *guard)
    }
}
