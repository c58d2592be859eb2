//! Scheduler subsystem
//!
//! Multi-class real-time scheduler: each CPU picks the thread with the
//! highest weighted priority among the registered classes, idle last.

pub mod classes;
pub mod core;
pub mod realtime;
pub mod thread;

// Re-exports
pub use self::core::{ClassId, Nucleus, SchedParam};
pub use thread::{Thread, ThreadId, ThreadState};
