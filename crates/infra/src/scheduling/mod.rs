//! Background account verification
//!
//! One long-lived task re-checks every stored account's credentials on a
//! fixed interval and commits the results as a single store transaction.
//!
//! Lifecycle rules:
//! - Explicit start/stop with a held join handle
//! - Cancellation token support; stop waits for the task to unwind
//! - A failed pass backs off and the loop keeps running

pub mod error;
pub mod verify_scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use verify_scheduler::{
    AccountVerifier, AccountVerifyScheduler, PassSummary, VerifySchedulerConfig,
    DEFAULT_VERIFY_INTERVAL,
};
