//! Scheduler core module
//!
//! The scheduling domain and its per-CPU schedulers, the class interface,
//! run-queues, the rescheduling procedure, thread lifecycle and priority
//! boosting. [`Nucleus`] is the locked front end over all of it.

pub mod affinity;
pub mod boost;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod nucleus;
pub mod policy;
pub mod resched;
pub mod runqueue;
pub mod sched;
pub mod statistics;

pub use affinity::{CpuMask, MAX_CPUS};
pub use error::{SchedulerError, SchedulerResult};
pub use nucleus::{Nucleus, TimerInfo};
pub use policy::{ClassId, SchedClass, SchedParam, SporadicParam};
pub use runqueue::MultiLevelQueue;
pub use sched::{Sched, SchedLocal, SchedStatus};
pub use statistics::{SchedStats, SchedStatsSnapshot};
