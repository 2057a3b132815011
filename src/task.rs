//! Per-task worker state machine (spec §3 Task record, §4.1 Task worker).
//!
//! Each [`Task`] owns one worker thread running an unbounded
//! wait-run-idle loop, synchronized with the dispatcher through a
//! [`parking_lot::Mutex`]-guarded [`TaskShared`] tuple and a
//! [`parking_lot::Condvar`]. The dispatcher never touches the task's body;
//! it only flips `state` and reads it back at frame boundaries.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::priority::{Priority, PriorityHandle};
use crate::time::Quanta;

/// One of {Idle, Pending, Running}; initial Idle (spec I2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Pending,
    Running,
}

struct TaskShared {
    state: TaskState,
    release_time: Option<Instant>,
    deadline_time: Option<Instant>,
    skip_count: u32,
}

impl TaskShared {
    fn idle() -> Self {
        TaskShared {
            state: TaskState::Idle,
            release_time: None,
            deadline_time: None,
            skip_count: 0,
        }
    }
}

/// Point-in-time view of a task, returned by [`Task::snapshot`] and
/// [`crate::executive::Executive::snapshot`]. Not transactionally
/// consistent across tasks (see SPEC_FULL.md §4.2.1 supplement).
#[derive(Clone, Copy, Debug)]
pub struct TaskSnapshot {
    pub state: TaskState,
    pub skip_count: u32,
    pub release_time: Option<Instant>,
    pub deadline_time: Option<Instant>,
}

/// Outcome of a deadline audit (spec §4.2 Step G) for a single task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeadlineAudit {
    /// Task was Idle at the frame boundary: no miss.
    Met,
    /// Task was still Pending (never started): the release is abandoned,
    /// state forced back to Idle.
    MissedPending,
    /// Task was still Running: left running, carries over into the next
    /// frame at demoted priority.
    MissedRunning,
}

struct TaskCore {
    shared: Mutex<TaskShared>,
    cv: Condvar,
}

/// A declared task (periodic or aperiodic) together with its worker
/// thread. Owned by the dispatcher/[`crate::executive::Executive`]; reached
/// by index, never shared across tasks (spec §9 design note: "the
/// dispatcher owns the table and reaches each record by index").
pub struct Task {
    id: usize,
    wcet: Quanta,
    core: Arc<TaskCore>,
    priority: Arc<PriorityHandle>,
    worker: JoinHandle<()>,
}

impl Task {
    /// Spawn the worker thread in Idle at `initial_priority` (spec §6:
    /// `set_periodic_task`/`set_aperiodic_task` "spawns the worker in
    /// Idle at P_MIN"). Fails only if the OS refuses to create the thread
    /// (resource exhaustion); the caller surfaces that as
    /// [`crate::error::ConfigError::Other`].
    pub fn spawn<F>(id: usize, wcet: Quanta, initial_priority: Priority, body: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let core = Arc::new(TaskCore {
            shared: Mutex::new(TaskShared::idle()),
            cv: Condvar::new(),
        });
        let priority = Arc::new(PriorityHandle::new(initial_priority));

        let worker_core = core.clone();
        let worker = thread::Builder::new()
            .name(format!("task-{id}"))
            .spawn(move || worker_loop(id, worker_core, body))?;

        Ok(Task {
            id,
            wcet,
            core,
            priority,
            worker,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn wcet(&self) -> Quanta {
        self.wcet
    }

    pub fn priority_handle(&self) -> &PriorityHandle {
        &self.priority
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.worker.thread().name()
    }

    /// Idle -> Pending transition, publishing `release_time`/`deadline_time`
    /// under one lock acquisition (spec P2: release atomicity).
    pub fn release(&self, release_time: Instant, deadline_time: Instant) {
        let mut guard = self.core.shared.lock();
        guard.state = TaskState::Pending;
        guard.release_time = Some(release_time);
        guard.deadline_time = Some(deadline_time);
        self.core.cv.notify_one();
    }

    pub fn state(&self) -> TaskState {
        self.core.shared.lock().state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state(), TaskState::Idle)
    }

    pub fn skip_count(&self) -> u32 {
        self.core.shared.lock().skip_count
    }

    /// If `skip_count > 0`, decrement it and report the release was
    /// suppressed (spec §3 `skip_count`, §4.2 Step D).
    pub fn consume_skip(&self) -> bool {
        let mut guard = self.core.shared.lock();
        if guard.skip_count > 0 {
            guard.skip_count -= 1;
            true
        } else {
            false
        }
    }

    pub fn set_skip_count(&self, skip_count: u32) {
        self.core.shared.lock().skip_count = skip_count;
    }

    pub fn clear_skip_count(&self) {
        self.core.shared.lock().skip_count = 0;
    }

    pub fn bump_skip_count(&self) {
        self.core.shared.lock().skip_count += 1;
    }

    /// Step G deadline audit: inspects and, if a miss occurred, mutates
    /// state/skip_count under the same lock acquisition the observation
    /// was made with.
    pub fn audit_deadline(&self) -> DeadlineAudit {
        let mut guard = self.core.shared.lock();
        match guard.state {
            TaskState::Idle => DeadlineAudit::Met,
            TaskState::Running => {
                guard.skip_count += 1;
                DeadlineAudit::MissedRunning
            }
            TaskState::Pending => {
                guard.state = TaskState::Idle;
                guard.skip_count += 1;
                DeadlineAudit::MissedPending
            }
        }
    }

    /// Force the task back to Idle regardless of its current state. Used
    /// when an aperiodic overrun drops a stale release (spec §4.2 Step C).
    pub fn force_idle(&self) {
        self.core.shared.lock().state = TaskState::Idle;
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let guard = self.core.shared.lock();
        TaskSnapshot {
            state: guard.state,
            skip_count: guard.skip_count,
            release_time: guard.release_time,
            deadline_time: guard.deadline_time,
        }
    }
}

/// Spec §4.1: wait on the release signal until Pending, run once, return to
/// Idle. Re-checks the predicate on every wakeup (spurious-wakeup safe).
fn worker_loop<F>(id: usize, core: Arc<TaskCore>, mut body: F)
where
    F: FnMut() + Send + 'static,
{
    loop {
        let mut guard = core.shared.lock();
        while guard.state != TaskState::Pending {
            core.cv.wait(&mut guard);
        }
        guard.state = TaskState::Running;
        drop(guard);

        if catch_unwind(AssertUnwindSafe(|| body())).is_err() {
            log::error!("task {id} body panicked; trapped at the worker boundary");
        }

        core.shared.lock().state = TaskState::Idle;
    }
}
