// src/lib.rs
// Point d'entrée de la bibliothèque du noyau temps réel
#![cfg_attr(not(test), no_std)] // Pas de bibliothèque standard hors tests

//! Cobalt nucleus
//!
//! Real-time co-kernel core: a multi-class priority scheduler (rt, sporadic,
//! quota, weak, idle) with per-CPU run-queues and lazy rescheduling, the
//! nucleus clock and timers, and synchronization objects implementing
//! priority inheritance and priority ceiling.
//!
//! The platform side (clock source, timer hardware, IPIs, the context
//! switch itself) is supplied by the integrator through [`Pipeline`].

// Import de alloc pour les allocations dynamiques
extern crate alloc;

// Modules du noyau
pub mod config;
pub mod logger;
pub mod pipeline;
pub mod scheduler;
pub mod sync;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ClassSet, NucleusConfig};
pub use pipeline::Pipeline;
pub use scheduler::core::{
    ClassId, CpuMask, Nucleus, SchedParam, SchedStatsSnapshot, SchedulerError, SchedulerResult, SporadicParam,
    TimerInfo,
};
pub use scheduler::classes::QuotaGroupInfo;
pub use scheduler::thread::{Thread, ThreadAttr, ThreadId, ThreadInfo, ThreadState, ThreadStats};
pub use sync::{SynchFlags, SynchId};
pub use time::{ClockId, ExternalClock, STicks, Ticks, Timeout, TimerEvent, TimerHandler, TimerId, TimerMode};
