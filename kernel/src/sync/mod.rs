//! Synchronization support
//!
//! Wait queues with optional ownership and priority boosting, built on the
//! nucleus blocking primitives.

pub mod synch;

pub use synch::{Synch, SynchFlags, SynchId, SynchTable};
