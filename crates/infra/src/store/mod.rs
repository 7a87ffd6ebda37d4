//! Durable document storage
//!
//! One JSON file holds the entire dataset. Every operation takes a
//! process-local re-entrant lock plus a cross-process advisory file lock,
//! and every write goes through the atomic temp-file-and-rename protocol,
//! so readers observe either the complete previous document or the complete
//! new one, never a torn write.

pub mod document_store;
mod file_lock;

pub use document_store::DocumentStore;
