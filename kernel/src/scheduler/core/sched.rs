//! Per-CPU scheduler state
//!
//! One [`Sched`] per CPU: the current and root threads, the class
//! run-queues, the rescheduling flags and the per-CPU timers. Every field
//! is protected by the nucleus lock.

use super::affinity::CpuMask;
use super::runqueue::MultiLevelQueue;
use super::statistics::SchedStats;
use crate::scheduler::classes::quota::QuotaSched;
use crate::scheduler::realtime::latency::LatencyTracker;
use crate::scheduler::thread::ThreadId;
use crate::time::{Ticks, TimerId};
use alloc::boxed::Box;
use bitflags::bitflags;

bitflags! {
    /// Scheduler status, visible to remote CPUs under the lock
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SchedStatus: u32 {
        /// Rescheduling pending
        const RESCHED = 1 << 0;
    }
}

bitflags! {
    /// Local-only flags, never touched by another CPU
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SchedLocal: u32 {
        /// Running the clock interrupt handler
        const IN_IRQ = 1 << 0;
        /// Host tick due, relay at the next root entry
        const HTICK  = 1 << 1;
        /// Host tick timer shot deferred while real-time runs
        const HDEFER = 1 << 2;
    }
}

/// Per-CPU scheduler
pub struct Sched {
    pub(crate) cpu: usize,
    pub(crate) status: SchedStatus,
    pub(crate) lflags: SchedLocal,

    pub(crate) curr: ThreadId,
    pub(crate) root: ThreadId,

    /// Remote CPUs awaiting a rescheduling IPI from this one
    pub(crate) resched: CpuMask,

    /// Fixed-priority run-queue, shared by the sporadic class
    pub(crate) rt: Box<MultiLevelQueue>,
    pub(crate) weak: Box<MultiLevelQueue>,
    pub(crate) quota: Option<Box<QuotaSched>>,

    /// Round-robin slice timer
    pub(crate) rrbtimer: TimerId,
    /// Host tick relay
    pub(crate) htimer: TimerId,
    pub(crate) wdtimer: TimerId,

    /// Date last programmed into the hardware timer
    pub(crate) shot: Option<Ticks>,
    /// Date the current thread was switched in
    pub(crate) last_switch: Ticks,

    pub(crate) stats: SchedStats,
    pub(crate) latency: LatencyTracker,
}

impl Sched {
    pub(crate) fn new(
        cpu: usize,
        root: ThreadId,
        rrbtimer: TimerId,
        htimer: TimerId,
        wdtimer: TimerId,
    ) -> Self {
        Self {
            cpu,
            status: SchedStatus::empty(),
            lflags: SchedLocal::empty(),
            curr: root,
            root,
            resched: CpuMask::empty(),
            rt: Box::new(MultiLevelQueue::new()),
            weak: Box::new(MultiLevelQueue::new()),
            quota: None,
            rrbtimer,
            htimer,
            wdtimer,
            shot: None,
            last_switch: 0,
            stats: SchedStats::new(),
            latency: LatencyTracker::new(),
        }
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }

    pub fn current(&self) -> ThreadId {
        self.curr
    }

    pub fn root(&self) -> ThreadId {
        self.root
    }

    pub fn resched_pending(&self) -> bool {
        self.status.contains(SchedStatus::RESCHED)
    }

    pub fn in_irq(&self) -> bool {
        self.lflags.contains(SchedLocal::IN_IRQ)
    }

    pub fn local_flags(&self) -> SchedLocal {
        self.lflags
    }

    pub fn stats(&self) -> &SchedStats {
        &self.stats
    }

    pub fn latency(&self) -> &LatencyTracker {
        &self.latency
    }
}
