//! The check run and the loop that repeats it.

mod check;
mod scheduler;

pub use check::{CheckError, CheckSummary, Pipeline, RunOutcome, RunReport, SkipReason};
pub use scheduler::watch;
