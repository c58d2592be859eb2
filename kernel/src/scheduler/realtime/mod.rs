//! Real-time scheduling support

pub mod latency;
pub mod priorities;

pub use latency::LatencyTracker;
pub use priorities::{class_weight, CLASS_WEIGHT_FACTOR, IDLE_PRIO, RT_MAX_PRIO, RT_MIN_PRIO};
