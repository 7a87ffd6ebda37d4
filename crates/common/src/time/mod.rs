//! Time abstraction for testability
//!
//! Provides a trait-based approach to time operations so that expiry logic
//! can be tested deterministically without real time passing.

pub mod clock;

pub use clock::{Clock, MockClock, SystemClock};
