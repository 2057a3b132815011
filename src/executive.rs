//! Public entry point: [`Executive`], wiring the schedule table, the task
//! workers, the aperiodic request channel, and the dispatcher thread
//! together per spec §6 (External Interfaces).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::aperiodic::RequestLatch;
use crate::error::ConfigError;
use crate::priority::{Priority, PriorityController, PriorityHandle, RecordingController};
use crate::schedule::{Frame, Schedule};
use crate::task::{Task, TaskSnapshot};
use crate::time::{Quanta, TimeBase};
use crate::dispatcher;

/// Everything the dispatcher thread needs, handed to it as a single `Arc`
/// once [`Executive::start`] has validated and frozen the configuration.
pub(crate) struct ExecutiveCore {
    pub base: TimeBase,
    pub schedule: Schedule,
    pub periodic: Vec<Task>,
    pub aperiodic: Option<Task>,
    pub latch: Arc<RequestLatch>,
    pub controller: Arc<dyn PriorityController>,
    pub dispatcher_priority: PriorityHandle,
}

/// The cyclic-executive scheduler. Construct with [`Executive::new`],
/// configure with `set_periodic_task`/`set_aperiodic_task`/`add_frame`,
/// then call [`Executive::start`].
pub struct Executive {
    num_tasks: usize,
    base: TimeBase,
    periodic_slots: Mutex<Vec<Option<Task>>>,
    aperiodic: Mutex<Option<Task>>,
    schedule: Mutex<Schedule>,
    latch: Arc<RequestLatch>,
    controller: Arc<dyn PriorityController>,
    started: AtomicBool,
    core: Mutex<Option<Arc<ExecutiveCore>>>,
    dispatcher_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Executive {
    /// Reserve `num_tasks` periodic slots and fix the time base (spec §6
    /// `new`).
    pub fn new(num_tasks: usize, frame_length: u64, unit_duration_ms: u64) -> Self {
        let mut slots = Vec::with_capacity(num_tasks);
        slots.resize_with(num_tasks, || None);

        Executive {
            num_tasks,
            base: TimeBase::from_millis(unit_duration_ms),
            periodic_slots: Mutex::new(slots),
            aperiodic: Mutex::new(None),
            schedule: Mutex::new(Schedule::new(frame_length)),
            latch: Arc::new(RequestLatch::new()),
            controller: Arc::new(RecordingController),
            started: AtomicBool::new(false),
            core: Mutex::new(None),
            dispatcher_thread: Mutex::new(None),
        }
    }

    /// As [`Executive::new`], with the default 10ms unit duration (spec §6).
    pub fn with_default_unit(num_tasks: usize, frame_length: u64) -> Self {
        Self::new(num_tasks, frame_length, TimeBase::DEFAULT_UNIT_MS)
    }

    /// Replace the default in-process [`PriorityController`] with a
    /// caller-supplied one (e.g. one backed by a real OS scheduling API).
    /// Must be called before [`Executive::start`].
    pub fn with_priority_controller(mut self, controller: impl PriorityController + 'static) -> Self {
        self.controller = Arc::new(controller);
        self
    }

    pub fn task_count(&self) -> usize {
        self.num_tasks
    }

    pub fn frame_count(&self) -> usize {
        self.schedule.lock().len()
    }

    /// Spawn the worker for periodic task `task_id` in Idle at `P_MIN`
    /// (spec §6 `set_periodic_task`).
    pub fn set_periodic_task(
        &self,
        task_id: usize,
        wcet: Quanta,
        body: impl FnMut() + Send + 'static,
    ) -> Result<(), ConfigError> {
        if task_id >= self.num_tasks {
            return Err(ConfigError::TaskIdOutOfRange {
                id: task_id,
                num_tasks: self.num_tasks,
            });
        }
        let task = Task::spawn(task_id, wcet, Priority::P_MIN, body)
            .map_err(|error| ConfigError::Other(anyhow::Error::new(error)))?;
        self.periodic_slots.lock()[task_id] = Some(task);
        Ok(())
    }

    /// Spawn the aperiodic worker in Idle at `P_MIN` (spec §6
    /// `set_aperiodic_task`). May be called at most once.
    pub fn set_aperiodic_task(
        &self,
        wcet: Quanta,
        body: impl FnMut() + Send + 'static,
    ) -> Result<(), ConfigError> {
        let mut slot = self.aperiodic.lock();
        if slot.is_some() {
            return Err(ConfigError::AperiodicAlreadyRegistered);
        }
        // the aperiodic task's identity for logging is num_tasks (one past
        // the last periodic id).
        let task = Task::spawn(self.num_tasks, wcet, Priority::P_MIN, body)
            .map_err(|error| ConfigError::Other(anyhow::Error::new(error)))?;
        *slot = Some(task);
        Ok(())
    }

    /// Append a frame to the schedule (spec §6 `add_frame`). Every id in
    /// `frame` must be `< num_tasks`.
    pub fn add_frame(&self, frame: impl Into<Frame>) -> Result<(), ConfigError> {
        let frame = frame.into();
        for &id in &frame.tasks {
            if id >= self.num_tasks {
                return Err(ConfigError::TaskIdOutOfRange {
                    id,
                    num_tasks: self.num_tasks,
                });
            }
        }

        let slots = self.periodic_slots.lock();
        let wcet_of = |id: usize| slots[id].as_ref().map(Task::wcet).unwrap_or(Quanta::ZERO);
        self.schedule.lock().push(frame, wcet_of);
        Ok(())
    }

    /// Spawn the dispatcher at `P_MAX` (spec §6 `start`). Irreversible: a
    /// second call returns [`ConfigError::AlreadyStarted`].
    pub fn start(&self) -> Result<(), ConfigError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConfigError::AlreadyStarted);
        }

        let schedule = self.schedule.lock().clone();
        if schedule.is_empty() {
            self.started.store(false, Ordering::Release);
            return Err(ConfigError::NoFramesDeclared);
        }

        let mut slots = self.periodic_slots.lock();
        let mut periodic = Vec::with_capacity(self.num_tasks);
        for (id, slot) in slots.iter_mut().enumerate() {
            match slot.take() {
                Some(task) => periodic.push(task),
                None => {
                    self.started.store(false, Ordering::Release);
                    return Err(ConfigError::PeriodicTaskUnset { id });
                }
            }
        }
        drop(slots);

        let aperiodic = self.aperiodic.lock().take();

        let core = Arc::new(ExecutiveCore {
            base: self.base,
            schedule,
            periodic,
            aperiodic,
            latch: self.latch.clone(),
            controller: self.controller.clone(),
            dispatcher_priority: PriorityHandle::new(Priority::P_MIN),
        });
        *self.core.lock() = Some(core.clone());

        let handle = thread::Builder::new()
            .name("executive-dispatcher".to_owned())
            .spawn(move || dispatcher::run(&core))
            .map_err(|error| {
                self.started.store(false, Ordering::Release);
                ConfigError::Other(anyhow::Error::new(error))
            })?;
        *self.dispatcher_thread.lock() = Some(handle);

        Ok(())
    }

    /// Block until the dispatcher terminates (spec §6 `wait`). Under the
    /// specified core the dispatcher never terminates, so this is an
    /// infinite join once `start()` has run.
    pub fn wait(&self) {
        let handle = self.dispatcher_thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Latch an aperiodic release request for the next frame (spec §6/§4.3
    /// `ap_task_request`). Never blocks.
    pub fn ap_task_request(&self) {
        self.latch.request();
    }

    /// Read-only snapshot of every task's state, taken one task at a time
    /// (not transactionally consistent across tasks; see SPEC_FULL.md §4).
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        match &*self.core.lock() {
            Some(core) => core
                .periodic
                .iter()
                .chain(core.aperiodic.as_ref())
                .map(Task::snapshot)
                .collect(),
            None => Vec::new(),
        }
    }
}
