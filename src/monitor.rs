//! Duty refresh decisions and the loop that drives them.

pub mod merge;
pub mod poll_loop;
pub mod report;
pub mod staleness;
pub mod terminator;

pub use merge::merge_duties;
pub use poll_loop::{DutySnapshot, LoopState, PollLoop, RunOutcome};
pub use report::{format_remaining, DutyReporter, LogReporter};
pub use staleness::is_stale;
pub use terminator::{spawn_signal_listener, GracefulTerminator, Termination};
