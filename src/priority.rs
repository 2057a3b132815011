//! Priority primitive.
//!
//! Spec treats the OS-level priority facility as an external collaborator:
//! "a process-level capability that sets an OS-level priority on a worker
//! thread, with a totally ordered range `[P_MIN, P_MAX]`". This module
//! provides that primitive as a narrow trait so the dispatcher never talks
//! to an OS scheduler directly, plus a default in-process implementation
//! that records the priority each task handle was last assigned (enough to
//! make [`Priority`] strictness independently observable and testable,
//! without requiring elevated privileges to run the test suite).

use std::sync::atomic::{AtomicI32, Ordering};

/// An OS-level scheduling priority, clamped to `[P_MIN, P_MAX]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(i32);

impl Priority {
    pub const P_MIN: Priority = Priority(0);
    pub const P_MAX: Priority = Priority(99);

    pub fn new(value: i32) -> Self {
        Priority(value.clamp(Self::P_MIN.0, Self::P_MAX.0))
    }

    pub fn value(self) -> i32 {
        self.0
    }

    /// `self - offset`, clamped to `[P_MIN, P_MAX]`.
    pub fn minus(self, offset: i32) -> Priority {
        Priority::new(self.0 - offset)
    }

    /// `self + offset`, clamped to `[P_MIN, P_MAX]`.
    pub fn plus(self, offset: i32) -> Priority {
        Priority::new(self.0 + offset)
    }

    pub fn clamp_between(self, low: Priority, high: Priority) -> Priority {
        Priority(self.0.clamp(low.0, high.0))
    }
}

/// A thread-priority handle. Tasks own one and hand it to the
/// [`PriorityController`] whenever the dispatcher wants to change their OS
/// priority.
pub struct PriorityHandle {
    current: AtomicI32,
}

impl PriorityHandle {
    pub fn new(initial: Priority) -> Self {
        PriorityHandle {
            current: AtomicI32::new(initial.value()),
        }
    }

    pub fn get(&self) -> Priority {
        Priority(self.current.load(Ordering::Acquire))
    }
}

/// External collaborator: applies a [`Priority`] to a [`PriorityHandle`].
///
/// A real deployment would back this with the platform's scheduling API
/// (e.g. `sched_setscheduler`/`pthread_setschedparam` on Linux); the core
/// only needs the effect to be observable through [`PriorityHandle::get`],
/// so the default [`RecordingController`] applies the priority in-process
/// without touching OS thread attributes. Swap it for a real backend at the
/// call site that constructs the [`crate::executive::Executive`] if OS-level
/// enforcement is required.
pub trait PriorityController: Send + Sync {
    fn set_priority(&self, handle: &PriorityHandle, priority: Priority);
}

/// Default [`PriorityController`]: records the assigned priority on the
/// handle and nothing else.
#[derive(Default)]
pub struct RecordingController;

impl PriorityController for RecordingController {
    fn set_priority(&self, handle: &PriorityHandle, priority: Priority) {
        handle.current.store(priority.value(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_to_range() {
        assert_eq!(Priority::new(1000), Priority::P_MAX);
        assert_eq!(Priority::new(-1000), Priority::P_MIN);
    }

    #[test]
    fn minus_clamps_at_floor() {
        let p = Priority::P_MIN.minus(5);
        assert_eq!(p, Priority::P_MIN);
    }

    #[test]
    fn recording_controller_is_observable() {
        let handle = PriorityHandle::new(Priority::P_MIN);
        let controller = RecordingController;
        controller.set_priority(&handle, Priority::P_MAX);
        assert_eq!(handle.get(), Priority::P_MAX);
    }
}
