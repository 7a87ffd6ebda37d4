//! Application configuration
//!
//! Settings come from environment variables with sensible defaults; the
//! bootstrap code reads them once and passes them down.

pub mod settings;

pub use settings::Settings;
