//! Statistics - Per-CPU scheduler counters
//!
//! Counters are updated under the nucleus lock but stored as atomics so that
//! diagnostics can read them without taking it.

use core::sync::atomic::{AtomicU64, Ordering};

/// Per-CPU scheduler statistics
pub struct SchedStats {
    /// Context switches performed by `run()`
    pub switches: AtomicU64,

    /// Scheduling decisions (calls to pick_next)
    pub picks: AtomicU64,

    /// Rescheduling IPIs sent from this CPU
    pub resched_ipis: AtomicU64,

    /// Clock ticks handled
    pub ticks: AtomicU64,

    /// Timers fired
    pub timers_fired: AtomicU64,

    /// Watchdog expiries
    pub watchdog_hits: AtomicU64,

    /// Host ticks relayed to the in-band kernel
    pub host_ticks: AtomicU64,

    /// Switches to the root thread
    pub root_entries: AtomicU64,
}

impl SchedStats {
    pub const fn new() -> Self {
        Self {
            switches: AtomicU64::new(0),
            picks: AtomicU64::new(0),
            resched_ipis: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            timers_fired: AtomicU64::new(0),
            watchdog_hits: AtomicU64::new(0),
            host_ticks: AtomicU64::new(0),
            root_entries: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy counters out
    pub fn snapshot(&self) -> SchedStatsSnapshot {
        SchedStatsSnapshot {
            switches: self.switches.load(Ordering::Relaxed),
            picks: self.picks.load(Ordering::Relaxed),
            resched_ipis: self.resched_ipis.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            timers_fired: self.timers_fired.load(Ordering::Relaxed),
            watchdog_hits: self.watchdog_hits.load(Ordering::Relaxed),
            host_ticks: self.host_ticks.load(Ordering::Relaxed),
            root_entries: self.root_entries.load(Ordering::Relaxed),
        }
    }
}

impl Default for SchedStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain copy of [`SchedStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedStatsSnapshot {
    pub switches: u64,
    pub picks: u64,
    pub resched_ipis: u64,
    pub ticks: u64,
    pub timers_fired: u64,
    pub watchdog_hits: u64,
    pub host_ticks: u64,
    pub root_entries: u64,
}
