//! Configuration-time errors.
//!
//! The error is [`ConfigError::TaskIdOutOfRange`] when a frame or a
//! periodic-task registration references an id outside `[0, num_tasks)`,
//! [`ConfigError::AperiodicAlreadyRegistered`] on a second
//! `set_aperiodic_task` call, [`ConfigError::PeriodicTaskUnset`] when
//! `start()` is called before every declared task id has a body, or
//! [`ConfigError::NoFramesDeclared`] when `start()` is called before any
//! frame was added.
#[derive(Debug)]
pub enum ConfigError {
    TaskIdOutOfRange { id: usize, num_tasks: usize },
    AperiodicAlreadyRegistered,
    PeriodicTaskUnset { id: usize },
    NoFramesDeclared,
    AlreadyStarted,
    Other(anyhow::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ConfigError::*;

        match self {
            TaskIdOutOfRange { id, num_tasks } => write!(
                f,
                "task id {id} is out of range, expected an id in [0, {num_tasks})"
            ),
            AperiodicAlreadyRegistered => {
                write!(f, "the aperiodic task was already registered")
            }
            PeriodicTaskUnset { id } => {
                write!(f, "task {id} was never assigned a body via set_periodic_task")
            }
            NoFramesDeclared => {
                write!(f, "start() called before any frame was declared with add_frame")
            }
            AlreadyStarted => write!(f, "start() was already called; the executive is irreversible"),
            Other(error) => write!(f, "configuration error: {error}"),
        }
    }
}

impl std::error::Error for ConfigError {}
