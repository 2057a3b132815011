//! Core of a cyclic-executive real-time scheduler.
//!
//! A single-processor runtime that dispatches a fixed set of periodic tasks
//! against a statically defined, cyclically repeating schedule of frames,
//! and opportunistically services a single aperiodic task using
//! slack-stealing.
//!
//! See [`Executive`] for the entry point: construct with
//! [`Executive::new`], configure with
//! [`Executive::set_periodic_task`]/[`Executive::set_aperiodic_task`]/
//! [`Executive::add_frame`], then call [`Executive::start`].
//!
//! Out of scope: the application code inside each task body, schedule-table
//! construction UX, admission control / schedulability analysis (WCETs are
//! declared, not validated), multi-core dispatch, dynamic task creation
//! after `start()`.

pub mod prelude {
    pub use super::aperiodic::RequestLatch;
    pub use super::error::ConfigError;
    pub use super::executive::Executive;
    pub use super::priority::{Priority, PriorityController, PriorityHandle, RecordingController};
    pub use super::schedule::{Frame, Schedule};
    pub use super::task::{DeadlineAudit, Task, TaskSnapshot, TaskState};
    pub use super::time::{Quanta, TimeBase};
}

pub mod aperiodic;
pub mod error;
pub mod executive;
pub mod priority;
pub mod schedule;
pub mod task;
pub mod time;

mod dispatcher;
