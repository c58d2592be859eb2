//! Scheduling domain
//!
//! All state guarded by the nucleus lock: threads, per-CPU schedulers,
//! timers, clock, synchronization objects and the class registry. The
//! [`Nucleus`](super::nucleus::Nucleus) front end locks it, stamps the
//! entry with the calling CPU and the clock reading, and calls in.
//!
//! Operations on the domain never talk to the pipeline directly except in
//! `run()`. Timer queue changes only mark CPUs dirty; the front end
//! reprograms the hardware shots once, on the way out.

use super::affinity::CpuMask;
use super::policy::{class_of, weighted, ClassId, ClassTable};
use super::sched::{Sched, SchedLocal, SchedStatus};
use super::statistics::SchedStats;
use crate::config::{ClassSet, NucleusConfig};
use crate::pipeline::Pipeline;
use crate::scheduler::classes::quota::{self, QuotaSched};
use crate::scheduler::classes::sporadic;
use crate::scheduler::realtime::priorities::IDLE_PRIO;
use crate::scheduler::thread::{Thread, ThreadAttr, ThreadId, ThreadInfo, ThreadState, ThreadTable};
use crate::sync::SynchTable;
use crate::time::timer::{Expiry, TimerKind, TimerTable};
use crate::time::{Clock, Ticks, TimerId, TimerMode, TimerPrio};
use alloc::boxed::Box;
use alloc::vec::Vec;

/// State protected by the nucleus lock
pub struct Domain {
    pub(crate) threads: ThreadTable,
    pub(crate) scheds: Vec<Sched>,
    pub(crate) timers: TimerTable,
    pub(crate) clock: Clock,
    pub(crate) synchs: SynchTable,
    pub(crate) classes: ClassTable,
    pub(crate) config: NucleusConfig,
    pub(crate) online: CpuMask,
    /// Monotonic date sampled when the lock was taken
    pub(crate) now: Ticks,
    /// CPU the current entry runs on
    pub(crate) this_cpu: usize,
}

impl Domain {
    pub(crate) fn new(config: NucleusConfig, online: CpuMask) -> Self {
        let nr_cpus = config.nr_cpus;
        let mut threads = ThreadTable::new();
        let mut timers = TimerTable::new(nr_cpus);
        let mut scheds = Vec::with_capacity(nr_cpus);

        for cpu in 0..nr_cpus {
            let id = threads.next_id();
            let rtimer = timers.create(TimerKind::ThreadTimeout(id), cpu, TimerPrio::Standard);
            let ptimer = timers.create(TimerKind::ThreadPeriod(id), cpu, TimerPrio::Standard);
            let attr = ThreadAttr::new(&alloc::format!("ROOT/{}", cpu)).affinity(CpuMask::single(cpu));
            let mut root = Thread::new(id, &attr, cpu, ClassId::Idle, rtimer, ptimer);
            root.state = ThreadState::ROOT;
            root.bprio = IDLE_PRIO;
            root.cprio = IDLE_PRIO;
            root.wprio = weighted(ClassId::Idle, IDLE_PRIO);
            threads.insert(root);

            let rrbtimer = timers.create(TimerKind::RoundRobin, cpu, TimerPrio::Standard);
            let htimer = timers.create(TimerKind::HostTick, cpu, TimerPrio::Low);
            let wdtimer = timers.create(TimerKind::Watchdog, cpu, TimerPrio::Standard);
            let mut sched = Sched::new(cpu, id, rrbtimer, htimer, wdtimer);
            if config.classes.contains(ClassSet::QUOTA) {
                let refill = timers.create(TimerKind::QuotaRefill, cpu, TimerPrio::Standard);
                let limit = timers.create(TimerKind::QuotaLimit, cpu, TimerPrio::Standard);
                sched.quota = Some(Box::new(QuotaSched::new(config.quota_period, refill, limit)));
            }
            scheds.push(sched);
        }

        Self {
            threads,
            scheds,
            timers,
            clock: Clock::new(config.clock_freq, config.max_external_clocks),
            synchs: SynchTable::new(),
            classes: ClassTable::new(config.classes),
            config,
            online,
            now: 0,
            this_cpu: 0,
        }
    }

    /// Stamp a new entry under the lock
    pub(crate) fn enter(&mut self, cpu: usize, raw_clock: Ticks) {
        self.this_cpu = cpu;
        self.now = self.clock.sample(raw_clock);
    }

    pub(crate) fn curr(&self, cpu: usize) -> ThreadId {
        self.scheds[cpu].curr
    }

    /// Whether `tid` is the current thread of its CPU
    pub(crate) fn is_current(&self, tid: ThreadId) -> bool {
        let cpu = self.threads[tid].cpu;
        self.scheds[cpu].curr == tid
    }

    // ───────────────────────────────────────────────────────────────
    // Run-queue dispatch, through the thread's effective class
    // ───────────────────────────────────────────────────────────────

    pub(crate) fn enqueue(&mut self, tid: ThreadId) {
        let class = class_of(self.threads[tid].sched_class);
        class.enqueue(self, tid);
    }

    pub(crate) fn dequeue(&mut self, tid: ThreadId) {
        let class = class_of(self.threads[tid].sched_class);
        class.dequeue(self, tid);
    }

    pub(crate) fn requeue(&mut self, tid: ThreadId) {
        let class = class_of(self.threads[tid].sched_class);
        class.requeue(self, tid);
    }

    /// Link a preempted thread back at the tail of its level
    pub(crate) fn putback(&mut self, tid: ThreadId) {
        if self.threads[tid].state.contains(ThreadState::READY) {
            self.dequeue(tid);
        } else {
            self.threads[tid].state.insert(ThreadState::READY);
        }
        self.enqueue(tid);
        let cpu = self.threads[tid].cpu;
        self.set_resched(cpu);
    }

    /// Flag `cpu` for rescheduling. A remote CPU is also recorded in the
    /// local IPI mask, sent by the next `run()` here.
    pub(crate) fn set_resched(&mut self, cpu: usize) {
        let this = self.this_cpu;
        if cpu == this {
            self.scheds[this].status.insert(SchedStatus::RESCHED);
        } else if !self.scheds[cpu].status.contains(SchedStatus::RESCHED) {
            self.scheds[cpu].status.insert(SchedStatus::RESCHED);
            self.scheds[this].resched.set(cpu);
            self.scheds[this].status.insert(SchedStatus::RESCHED);
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Timers
    // ───────────────────────────────────────────────────────────────

    /// Absolute monotonic date of `value` read in `mode`
    pub(crate) fn resolve_date(&self, value: Ticks, mode: TimerMode) -> Ticks {
        match mode {
            TimerMode::Relative => self.now.saturating_add(value),
            TimerMode::Absolute => value,
            TimerMode::Realtime => self.clock.monotonic_of(value),
        }
    }

    /// Whether an absolute one-shot request at `value` is already late
    pub(crate) fn is_past(&self, value: Ticks, mode: TimerMode) -> bool {
        mode != TimerMode::Relative && self.resolve_date(value, mode) <= self.now
    }

    pub(crate) fn start_timer(
        &mut self,
        id: TimerId,
        value: Ticks,
        interval: Option<Ticks>,
        mode: TimerMode,
    ) -> crate::SchedulerResult<()> {
        let date = self.resolve_date(value, mode);
        self.timers.start(id, date, interval, mode)
    }

    /// Fire every timer of `cpu` due at the entry date
    pub(crate) fn expire_timers(&mut self, cpu: usize) {
        let now = self.now;
        SchedStats::bump(&self.scheds[cpu].stats.ticks);
        while let Some(id) = self.timers.pop_expired(cpu, now) {
            let (due, expiry) = self.timers.fire(id, now);
            let sched = &self.scheds[cpu];
            sched.latency.record(now.saturating_sub(due));
            SchedStats::bump(&sched.stats.timers_fired);
            self.dispatch(cpu, id, expiry);
            self.timers.reload(id, now);
        }
        // The hardware shot was consumed.
        self.scheds[cpu].shot = None;
        self.timers.mark_dirty(cpu);
    }

    fn dispatch(&mut self, cpu: usize, id: TimerId, expiry: Expiry) {
        match expiry {
            Expiry::RoundRobin => self.sched_tick(cpu),
            Expiry::HostTick => self.scheds[cpu].lflags.insert(SchedLocal::HTICK),
            Expiry::Watchdog => self.watchdog_expired(cpu),
            Expiry::ThreadTimeout(tid) => {
                if self.threads.contains(tid) {
                    self.threads[tid].info.insert(ThreadInfo::TIMED_OUT);
                    self.resume(tid, ThreadState::DELAYED);
                }
            }
            Expiry::ThreadPeriod(tid, overruns) => {
                if self.threads.contains(tid) {
                    self.period_release(tid, overruns);
                }
            }
            Expiry::SporadicDrop(tid) => sporadic::drop_expired(self, tid),
            Expiry::SporadicReplenish(tid) => sporadic::replenish_expired(self, tid),
            Expiry::QuotaRefill => quota::refill_expired(self, cpu),
            Expiry::QuotaLimit => quota::limit_expired(self, cpu),
            Expiry::Handled => log::trace!("[TIMER] {} handled on CPU {}", id, cpu),
        }
    }

    /// Reprogram the hardware timer of every CPU whose queue head moved.
    ///
    /// While a real-time thread runs, a host tick heading the queue is not
    /// programmed: the next real-time timer is, and the tick is marked
    /// deferred until the root thread resumes.
    pub(crate) fn flush_shots(&mut self, pl: &dyn Pipeline) {
        let dirty = self.timers.take_dirty();
        for cpu in dirty.iter() {
            if cpu >= self.scheds.len() {
                continue;
            }
            let Some(mut target) = self.timers.head(cpu) else {
                continue;
            };
            let root_running = self.threads[self.scheds[cpu].curr].is_root();
            if self.timers.is_host_tick(target) && !root_running {
                self.scheds[cpu].lflags.insert(SchedLocal::HDEFER);
                match self.timers.head_excluding_host(cpu) {
                    Some(other) => target = other,
                    None => continue,
                }
            }
            let Some(date) = self.timers.get(target).map(|t| t.date()) else {
                continue;
            };
            if self.scheds[cpu].shot != Some(date) {
                pl.program_shot(cpu, date);
                self.scheds[cpu].shot = Some(date);
            }
        }
    }

    /// Relay a pending host tick and lift a deferred shot; root only
    pub(crate) fn service_host(&mut self, cpu: usize, pl: &dyn Pipeline) {
        let sched = &mut self.scheds[cpu];
        if sched.lflags.contains(SchedLocal::HTICK) {
            sched.lflags.remove(SchedLocal::HTICK);
            SchedStats::bump(&sched.stats.host_ticks);
            pl.relay_host_tick(cpu);
        }
        if sched.lflags.contains(SchedLocal::HDEFER) {
            sched.lflags.remove(SchedLocal::HDEFER);
            sched.shot = None;
            self.timers.mark_dirty(cpu);
        }
    }
}
