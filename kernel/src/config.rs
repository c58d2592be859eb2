//! Nucleus configuration
//!
//! Everything fixed when the nucleus boots: CPU count, clock frequency,
//! optional scheduling classes and the tunables of the watchdog, the quota
//! class and the external clock table.

use crate::scheduler::core::affinity::MAX_CPUS;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::time::{Ticks, MAX_EXTERNAL_CLOCKS};
use bitflags::bitflags;

bitflags! {
    /// Optional scheduling classes. The fixed-priority and idle classes
    /// are always present.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClassSet: u32 {
        const WEAK     = 1 << 0;
        const SPORADIC = 1 << 1;
        const QUOTA    = 1 << 2;
    }
}

/// Boot-time configuration
#[derive(Debug, Clone)]
pub struct NucleusConfig {
    pub nr_cpus: usize,
    /// Clock ticks per second
    pub clock_freq: u64,
    pub classes: ClassSet,
    /// Default round-robin slice
    pub rr_quantum: Ticks,
    /// Real-time domain watchdog, disabled when `None`
    pub watchdog_timeout: Option<Ticks>,
    /// Quota accounting period
    pub quota_period: Ticks,
    pub max_quota_groups: usize,
    pub max_external_clocks: usize,
}

impl NucleusConfig {
    /// Defaults for `nr_cpus` CPUs on a 1 GHz clock
    pub fn new(nr_cpus: usize) -> Self {
        Self {
            nr_cpus,
            clock_freq: 1_000_000_000,
            classes: ClassSet::all(),
            rr_quantum: 1_000_000,
            watchdog_timeout: Some(4_000_000_000),
            quota_period: 1_000_000_000,
            max_quota_groups: 32,
            max_external_clocks: MAX_EXTERNAL_CLOCKS,
        }
    }

    pub fn with_classes(mut self, classes: ClassSet) -> Self {
        self.classes = classes;
        self
    }

    pub fn with_clock_freq(mut self, freq: u64) -> Self {
        self.clock_freq = freq;
        self
    }

    pub fn with_watchdog(mut self, timeout: Option<Ticks>) -> Self {
        self.watchdog_timeout = timeout;
        self
    }

    pub fn with_quota_period(mut self, period: Ticks) -> Self {
        self.quota_period = period;
        self
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.nr_cpus == 0 {
            return Err(SchedulerError::InvalidParam { reason: "no CPU configured" });
        }
        if self.nr_cpus > MAX_CPUS {
            return Err(SchedulerError::InvalidParam { reason: "too many CPUs" });
        }
        if self.clock_freq == 0 {
            return Err(SchedulerError::InvalidParam { reason: "zero clock frequency" });
        }
        if self.quota_period == 0 {
            return Err(SchedulerError::InvalidParam { reason: "zero quota period" });
        }
        if self.rr_quantum == 0 {
            return Err(SchedulerError::InvalidParam { reason: "zero round-robin quantum" });
        }
        if self.watchdog_timeout == Some(0) {
            return Err(SchedulerError::InvalidParam { reason: "zero watchdog timeout" });
        }
        if self.max_external_clocks > MAX_EXTERNAL_CLOCKS {
            return Err(SchedulerError::InvalidParam { reason: "too many external clocks" });
        }
        Ok(())
    }
}

impl Default for NucleusConfig {
    fn default() -> Self {
        Self::new(1)
    }
}
