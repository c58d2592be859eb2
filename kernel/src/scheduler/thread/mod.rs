//! Thread module

pub mod state;
pub mod thread;

pub use state::{validate_transition, Lifecycle, ThreadInfo, ThreadState};
pub use thread::{Thread, ThreadAttr, ThreadId, ThreadStats, ThreadTable};
