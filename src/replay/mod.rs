//! Paced dataset replay.

pub mod cursor;
pub mod scheduler;
pub mod timer;

pub use cursor::ReplayCursor;
pub use scheduler::{
    ReplayScheduler, ReplayStats, RunState, StartOutcome, TickOutcome, DEFAULT_INTERVAL,
};
pub use timer::PacingTimer;
