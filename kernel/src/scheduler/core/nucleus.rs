//! Nucleus front end
//!
//! [`Nucleus`] owns the scheduling domain behind the nucleus lock and the
//! pipeline serving it. Every operation follows the same protocol:
//!
//! 1. take the lock and stamp the entry with the calling CPU and the clock
//! 2. apply the change to the domain
//! 3. run the rescheduling procedure of the calling CPU, which also sends
//!    the IPIs owed to the remote CPUs marked along the way
//! 4. reprogram the hardware shot of every CPU whose timer queue moved
//!
//! Blocking operations return as soon as the caller is blocked. The outcome
//! of the wait is collected with [`Nucleus::wait_status`] once the thread
//! runs again.

use super::affinity::CpuMask;
use super::domain::Domain;
use super::error::{SchedulerError, SchedulerResult};
use super::policy::{ClassId, SchedParam};
use super::sched::Sched;
use super::statistics::SchedStatsSnapshot;
use crate::config::NucleusConfig;
use crate::pipeline::Pipeline;
use crate::scheduler::classes::QuotaGroupInfo;
use crate::scheduler::thread::{Thread, ThreadAttr, ThreadId, ThreadInfo, ThreadState};
use crate::sync::{SynchFlags, SynchId};
use crate::time::timer::TimerKind;
use crate::time::{
    ClockId, ExternalClock, HostRealtime, STicks, Ticks, Timeout, TimerHandler, TimerId, TimerMode, TimerPrio,
};
use alloc::boxed::Box;
use spin::Mutex;

/// Snapshot of an external timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerInfo {
    pub cpu: usize,
    pub running: bool,
    /// Next due date, meaningful while running
    pub date: Ticks,
    /// Zero for one-shot timers
    pub interval: Ticks,
    pub fired: u64,
}

/// Real-time nucleus
pub struct Nucleus<P: Pipeline> {
    /// The nucleus lock
    domain: Mutex<Domain>,
    pipeline: P,
    host_realtime: HostRealtime,
    freq: u64,
}

impl<P: Pipeline> Nucleus<P> {
    /// Bring the nucleus up on the CPUs both configured and online
    pub fn new(config: NucleusConfig, pipeline: P) -> SchedulerResult<Self> {
        config.validate()?;
        let online = pipeline.online_cpus().intersect(&CpuMask::first_n(config.nr_cpus));
        if online.is_empty() {
            return Err(SchedulerError::InvalidCpuMask);
        }
        log::info!(
            "[NUCLEUS] {} CPU(s) online of {}, clock at {} Hz, classes {:?}",
            online.count(),
            config.nr_cpus,
            config.clock_freq,
            config.classes
        );
        let freq = config.clock_freq;
        Ok(Self {
            domain: Mutex::new(Domain::new(config, online)),
            pipeline,
            host_realtime: HostRealtime::new(),
            freq,
        })
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    /// Enter the nucleus from the calling CPU, apply `f`, then reschedule
    fn with<R>(&self, f: impl FnOnce(&mut Domain, usize) -> SchedulerResult<R>) -> SchedulerResult<R> {
        let cpu = self.pipeline.this_cpu();
        let mut d = self.domain.lock();
        if !d.online.is_set(cpu) {
            return Err(SchedulerError::CpuNotAvailable { cpu_id: cpu });
        }
        d.enter(cpu, self.pipeline.read_clock());
        let ret = f(&mut *d, cpu);
        d.run(cpu, &self.pipeline);
        d.flush_shots(&self.pipeline);
        ret
    }

    /// Look at the domain under the lock, without rescheduling
    fn peek<R>(&self, f: impl FnOnce(&mut Domain) -> R) -> R {
        let cpu = self.pipeline.this_cpu();
        let mut d = self.domain.lock();
        d.enter(cpu, self.pipeline.read_clock());
        f(&mut *d)
    }

    /// Real-time thread running on the calling CPU
    fn running(d: &Domain, cpu: usize) -> SchedulerResult<ThreadId> {
        let curr = d.curr(cpu);
        if d.threads[curr].is_root() {
            return Err(SchedulerError::InvalidParam { reason: "no real-time thread running" });
        }
        Ok(curr)
    }

    fn check_cpu(d: &Domain, cpu: usize) -> SchedulerResult<()> {
        if cpu < d.scheds.len() && d.online.is_set(cpu) {
            Ok(())
        } else {
            Err(SchedulerError::CpuNotAvailable { cpu_id: cpu })
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Pipeline entries
    // ───────────────────────────────────────────────────────────────

    /// Hardware timer interrupt of the calling CPU
    pub fn clock_tick(&self) {
        let _ = self.with(|d, cpu| {
            d.clock_tick(cpu, &self.pipeline);
            Ok(())
        });
    }

    /// Rescheduling IPI received by the calling CPU
    pub fn resched_ipi(&self) {
        let _ = self.with(|_, _| Ok(()));
    }

    /// Program the relayed host tick of the calling CPU at `date`
    pub fn program_host_tick(&self, date: Ticks) -> SchedulerResult<()> {
        self.with(|d, cpu| {
            let htimer = d.scheds[cpu].htimer;
            d.start_timer(htimer, date, None, TimerMode::Absolute)
        })
    }

    // ───────────────────────────────────────────────────────────────
    // Clock
    // ───────────────────────────────────────────────────────────────

    /// Read `clock`, in ticks
    pub fn read_clock(&self, clock: ClockId) -> SchedulerResult<Ticks> {
        match clock {
            ClockId::MonotonicRaw => Ok(self.pipeline.read_clock()),
            ClockId::HostRealtime => self
                .host_realtime
                .read(self.pipeline.read_clock())
                .map(|ns| self.ns_to_ticks(ns))
                .ok_or(SchedulerError::InvalidClock { raw: clock.raw() }),
            ClockId::Monotonic => Ok(self.peek(|d| d.now)),
            ClockId::Realtime => Ok(self.peek(|d| d.clock.realtime_at(d.now))),
            ClockId::External(_) => self.peek(|d| d.clock.external(clock).map(|c| c.read())),
        }
    }

    /// Set `clock` to `date`. Stepping the realtime clock moves the timers
    /// armed on realtime dates so that they keep their wall-clock date.
    pub fn set_clock(&self, clock: ClockId, date: Ticks) -> SchedulerResult<()> {
        self.with(|d, _| match clock {
            ClockId::Realtime => {
                let delta = d.clock.set_realtime(date);
                d.timers.shift_realtime(delta);
                log::info!("[CLOCK] realtime stepped by {} ticks", delta);
                Ok(())
            }
            ClockId::External(_) => d.clock.external(clock)?.set(date),
            _ => Err(SchedulerError::InvalidParam { reason: "clock cannot be set" }),
        })
    }

    /// Slew the realtime clock by `delta` ticks
    pub fn adjust_realtime(&self, delta: STicks) {
        let _ = self.with(|d, _| {
            d.clock.adjust(delta);
            d.timers.shift_realtime(delta);
            Ok(())
        });
    }

    pub fn clock_resolution(&self, clock: ClockId) -> SchedulerResult<Ticks> {
        match clock {
            ClockId::External(_) => self.peek(|d| d.clock.external(clock).map(|c| c.resolution())),
            _ => Ok(1),
        }
    }

    pub fn register_clock(&self, clock: Box<dyn ExternalClock>) -> SchedulerResult<ClockId> {
        self.peek(|d| d.clock.register(clock))
    }

    pub fn deregister_clock(&self, clock: ClockId) -> SchedulerResult<()> {
        self.peek(|d| d.clock.deregister(clock))
    }

    /// Wall-clock snapshot the host kernel publishes to
    pub fn host_realtime(&self) -> &HostRealtime {
        &self.host_realtime
    }

    pub fn ns_to_ticks(&self, ns: u64) -> Ticks {
        ((ns as u128 * self.freq as u128) / crate::time::NSEC_PER_SEC as u128) as Ticks
    }

    pub fn ticks_to_ns(&self, ticks: Ticks) -> u64 {
        ((ticks as u128 * crate::time::NSEC_PER_SEC as u128) / self.freq as u128) as u64
    }

    // ───────────────────────────────────────────────────────────────
    // External timers
    // ───────────────────────────────────────────────────────────────

    /// Create a stopped timer on `cpu`, calling `handler` on each firing
    pub fn timer_create(&self, cpu: usize, handler: TimerHandler) -> SchedulerResult<TimerId> {
        self.peek(|d| {
            Self::check_cpu(d, cpu)?;
            Ok(d.timers.create(TimerKind::External(handler), cpu, TimerPrio::Standard))
        })
    }

    /// Arm `id` at `value` read in `mode`, periodic when `interval` is set.
    /// A one-shot date already elapsed is refused with `TimedOut`.
    pub fn timer_start(
        &self,
        id: TimerId,
        value: Ticks,
        interval: Option<Ticks>,
        mode: TimerMode,
    ) -> SchedulerResult<()> {
        self.with(|d, _| {
            d.timers.check_external(id)?;
            if interval.is_none() && d.is_past(value, mode) {
                return Err(SchedulerError::TimedOut);
            }
            d.start_timer(id, value, interval, mode)
        })
    }

    pub fn timer_stop(&self, id: TimerId) -> SchedulerResult<()> {
        self.with(|d, _| {
            let cpu = d.timers.check_external(id)?.cpu();
            d.timers.stop(id);
            d.timers.mark_dirty(cpu);
            Ok(())
        })
    }

    pub fn timer_destroy(&self, id: TimerId) -> SchedulerResult<()> {
        self.with(|d, _| {
            let cpu = d.timers.check_external(id)?.cpu();
            d.timers.destroy(id);
            d.timers.mark_dirty(cpu);
            Ok(())
        })
    }

    pub fn timer_info(&self, id: TimerId) -> SchedulerResult<TimerInfo> {
        self.peek(|d| {
            let t = d.timers.check_external(id)?;
            Ok(TimerInfo {
                cpu: t.cpu(),
                running: t.is_running(),
                date: t.date(),
                interval: t.interval(),
                fired: t.fired(),
            })
        })
    }

    /// Periods skipped by `id` since the last call
    pub fn timer_overruns(&self, id: TimerId) -> SchedulerResult<u64> {
        self.peek(|d| {
            d.timers.check_external(id)?;
            Ok(d.timers.take_overruns(id))
        })
    }

    // ───────────────────────────────────────────────────────────────
    // Threads
    // ───────────────────────────────────────────────────────────────

    /// Create a dormant thread
    pub fn thread_create(&self, attr: &ThreadAttr, param: SchedParam) -> SchedulerResult<ThreadId> {
        self.with(|d, _| d.thread_init(attr, param))
    }

    pub fn thread_start(&self, tid: ThreadId) -> SchedulerResult<()> {
        self.with(|d, _| d.start(tid))
    }

    /// Forcibly suspend `tid` until [`Nucleus::thread_resume`]
    pub fn thread_suspend(&self, tid: ThreadId) -> SchedulerResult<()> {
        self.with(|d, _| {
            d.check_user_thread(tid)?;
            d.suspend(tid, ThreadState::SUSPENDED, Timeout::Infinite, None);
            Ok(())
        })
    }

    pub fn thread_resume(&self, tid: ThreadId) -> SchedulerResult<()> {
        self.with(|d, _| {
            d.check_user_thread(tid)?;
            d.resume(tid, ThreadState::SUSPENDED);
            Ok(())
        })
    }

    /// Break the delay or resource wait of `tid`. Returns whether it was
    /// waiting.
    pub fn unblock(&self, tid: ThreadId) -> SchedulerResult<bool> {
        self.with(|d, _| {
            d.check_user_thread(tid)?;
            Ok(d.unblock(tid))
        })
    }

    pub fn cancel(&self, tid: ThreadId) -> SchedulerResult<()> {
        self.with(|d, _| {
            d.check_user_thread(tid)?;
            d.cancel(tid);
            Ok(())
        })
    }

    /// Outcome of the last wait of `tid`
    pub fn wait_status(&self, tid: ThreadId) -> SchedulerResult<()> {
        self.peek(|d| {
            d.check_thread(tid)?;
            d.wait_status(tid)
        })
    }

    /// Put the running thread to sleep until `timeout`
    pub fn sleep(&self, timeout: Timeout) -> SchedulerResult<()> {
        self.with(|d, cpu| {
            let curr = Self::running(d, cpu)?;
            d.suspend(curr, ThreadState::DELAYED, timeout, None);
            Ok(())
        })
    }

    pub fn yield_now(&self) {
        let _ = self.with(|d, cpu| {
            d.yield_now(cpu);
            Ok(())
        });
    }

    /// Rotate the priority level `prio` of `class` on the calling CPU, or
    /// the level of the running thread when `prio` is `None`
    pub fn rotate(&self, class: ClassId, prio: Option<i32>) -> SchedulerResult<()> {
        self.with(|d, cpu| d.rotate(cpu, class, prio))
    }

    pub fn set_policy(&self, tid: ThreadId, param: SchedParam) -> SchedulerResult<()> {
        self.with(|d, _| d.set_policy(tid, param))
    }

    pub fn get_policy(&self, tid: ThreadId) -> SchedulerResult<SchedParam> {
        self.peek(|d| d.get_policy(tid))
    }

    /// Enable round-robin with `quantum`, or disable it with `None`
    pub fn set_slice(&self, tid: ThreadId, quantum: Option<Ticks>) -> SchedulerResult<()> {
        self.with(|d, _| d.set_slice(tid, quantum))
    }

    /// Round-robin with the configured default quantum
    pub fn set_default_slice(&self, tid: ThreadId) -> SchedulerResult<()> {
        self.with(|d, _| {
            let quantum = d.config.rr_quantum;
            d.set_slice(tid, Some(quantum))
        })
    }

    pub fn set_affinity(&self, tid: ThreadId, mask: CpuMask) -> SchedulerResult<()> {
        self.with(|d, _| d.set_affinity(tid, mask))
    }

    /// Move the running thread to `to`
    pub fn migrate(&self, to: usize) -> SchedulerResult<()> {
        self.with(|d, cpu| {
            let curr = Self::running(d, cpu)?;
            d.migrate(curr, to)
        })
    }

    /// Move a thread that is not running to `to`
    pub fn migrate_passive(&self, tid: ThreadId, to: usize) -> SchedulerResult<()> {
        self.with(|d, _| d.migrate_passive(tid, to))
    }

    /// Give `tid` a periodic timeline, see [`Nucleus::wait_period`]
    pub fn set_periodic(&self, tid: ThreadId, idate: Timeout, period: Option<Ticks>) -> SchedulerResult<()> {
        self.with(|d, _| d.set_periodic(tid, idate, period))
    }

    /// Wait for the next release point of the running thread
    pub fn wait_period(&self) -> SchedulerResult<()> {
        self.with(|d, cpu| {
            let curr = Self::running(d, cpu)?;
            d.wait_period(curr)
        })
    }

    /// Lock the scheduler on behalf of the thread running here
    pub fn lock(&self) {
        let _ = self.with(|d, cpu| {
            d.lock_sched(cpu);
            Ok(())
        });
    }

    pub fn unlock(&self) {
        let _ = self.with(|d, cpu| {
            d.unlock_sched(cpu);
            Ok(())
        });
    }

    // ───────────────────────────────────────────────────────────────
    // Synchronization objects
    // ───────────────────────────────────────────────────────────────

    pub fn synch_create(&self, flags: SynchFlags, ceiling: Option<i32>) -> SchedulerResult<SynchId> {
        self.peek(|d| d.synch_create(flags, ceiling))
    }

    /// Delete `sid`; its waiters observe `ObjectRemoved`. Returns whether
    /// anybody was waiting.
    pub fn synch_destroy(&self, sid: SynchId) -> SchedulerResult<bool> {
        self.with(|d, _| d.synch_destroy(sid))
    }

    /// Acquire `sid` for the running thread. Returns true when granted at
    /// once; otherwise the thread pends until handed ownership.
    pub fn synch_acquire(&self, sid: SynchId, timeout: Timeout) -> SchedulerResult<bool> {
        self.with(|d, cpu| {
            let curr = Self::running(d, cpu)?;
            d.synch_acquire(curr, sid, timeout)
        })
    }

    /// Release `sid` held by the running thread. Returns the new owner.
    pub fn synch_release(&self, sid: SynchId) -> SchedulerResult<Option<ThreadId>> {
        self.with(|d, cpu| {
            let curr = Self::running(d, cpu)?;
            d.synch_release(curr, sid)
        })
    }

    pub fn synch_sleep_on(&self, sid: SynchId, timeout: Timeout) -> SchedulerResult<()> {
        self.with(|d, cpu| {
            let curr = Self::running(d, cpu)?;
            d.synch_sleep_on(curr, sid, timeout)
        })
    }

    pub fn synch_wakeup_one(&self, sid: SynchId) -> SchedulerResult<Option<ThreadId>> {
        self.with(|d, _| d.synch_wakeup_one(sid))
    }

    pub fn synch_wakeup_this(&self, sid: SynchId, tid: ThreadId) -> SchedulerResult<()> {
        self.with(|d, _| d.synch_wakeup_this(sid, tid))
    }

    /// Wake every waiter of `sid`, their wait broken
    pub fn synch_flush(&self, sid: SynchId) -> SchedulerResult<bool> {
        self.with(|d, _| d.synch_flush(sid, ThreadInfo::BROKEN))
    }

    pub fn synch_set_ceiling(&self, sid: SynchId, prio: i32) -> SchedulerResult<()> {
        self.with(|d, _| d.synch_set_ceiling(sid, prio))
    }

    pub fn synch_owner(&self, sid: SynchId) -> SchedulerResult<Option<ThreadId>> {
        self.peek(|d| d.synchs.check(sid).map(|s| s.owner()))
    }

    // ───────────────────────────────────────────────────────────────
    // Quota groups
    // ───────────────────────────────────────────────────────────────

    pub fn quota_create_group(&self, cpu: usize) -> SchedulerResult<u32> {
        self.with(|d, _| {
            Self::check_cpu(d, cpu)?;
            d.quota_create_group(cpu)
        })
    }

    /// Share `quota` percent of each period with group `tgid`, letting it
    /// run up to `peak` percent out of accumulated credit
    pub fn quota_set_limit(&self, cpu: usize, tgid: u32, quota: u32, peak: u32) -> SchedulerResult<()> {
        self.with(|d, _| {
            Self::check_cpu(d, cpu)?;
            d.quota_set_limit(cpu, tgid, quota, peak)
        })
    }

    /// Remove group `tgid`. A group with members is kept unless `force`
    /// is set, in which case its members move to the rt class.
    pub fn quota_destroy_group(&self, cpu: usize, tgid: u32, force: bool) -> SchedulerResult<()> {
        self.with(|d, _| {
            Self::check_cpu(d, cpu)?;
            d.quota_destroy_group(cpu, tgid, force)
        })
    }

    pub fn quota_group_info(&self, cpu: usize, tgid: u32) -> SchedulerResult<QuotaGroupInfo> {
        self.peek(|d| {
            Self::check_cpu(d, cpu)?;
            d.quota_group_info(cpu, tgid)
        })
    }

    // ───────────────────────────────────────────────────────────────
    // Introspection
    // ───────────────────────────────────────────────────────────────

    /// Thread running on `cpu`
    pub fn current(&self, cpu: usize) -> SchedulerResult<ThreadId> {
        self.peek(|d| {
            Self::check_cpu(d, cpu)?;
            Ok(d.curr(cpu))
        })
    }

    /// Look at `tid` under the lock
    pub fn with_thread<R>(&self, tid: ThreadId, f: impl FnOnce(&Thread) -> R) -> SchedulerResult<R> {
        self.peek(|d| d.check_thread(tid).map(f))
    }

    /// Look at the scheduler of `cpu` under the lock
    pub fn with_sched<R>(&self, cpu: usize, f: impl FnOnce(&Sched) -> R) -> SchedulerResult<R> {
        self.peek(|d| {
            Self::check_cpu(d, cpu)?;
            Ok(f(&d.scheds[cpu]))
        })
    }

    pub fn sched_stats(&self, cpu: usize) -> SchedulerResult<SchedStatsSnapshot> {
        self.with_sched(cpu, |s| s.stats().snapshot())
    }

    /// Live threads, root threads included
    pub fn thread_count(&self) -> usize {
        self.peek(|d| d.threads.len())
    }

    pub fn online_cpus(&self) -> CpuMask {
        self.peek(|d| d.online)
    }

    pub fn config(&self) -> NucleusConfig {
        self.peek(|d| d.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPipeline;

    fn nucleus(nr_cpus: usize) -> Nucleus<MockPipeline> {
        Nucleus::new(NucleusConfig::new(nr_cpus), MockPipeline::new(nr_cpus)).unwrap()
    }

    #[test]
    fn bring_up_rejects_offline_configs() {
        let pl = MockPipeline::new(2).with_online(CpuMask::single(3));
        assert_eq!(
            Nucleus::new(NucleusConfig::new(2), pl).err(),
            Some(SchedulerError::InvalidCpuMask)
        );
        assert!(Nucleus::new(NucleusConfig::new(0), MockPipeline::new(1)).is_err());
    }

    #[test]
    fn starting_a_thread_preempts_root() {
        let n = nucleus(1);
        let root = n.current(0).unwrap();
        let t = n.thread_create(&ThreadAttr::new("t"), SchedParam::Rt { prio: 10 }).unwrap();
        assert_eq!(n.current(0).unwrap(), root);
        n.thread_start(t).unwrap();
        assert_eq!(n.current(0).unwrap(), t);
        assert_eq!(n.pipeline().switches(), [(root, t)]);
    }

    #[test]
    fn sleep_and_timeout() {
        let n = nucleus(1);
        let root = n.current(0).unwrap();
        let t = n.thread_create(&ThreadAttr::new("t"), SchedParam::Rt { prio: 10 }).unwrap();
        n.thread_start(t).unwrap();

        n.sleep(Timeout::Relative(500)).unwrap();
        assert_eq!(n.current(0).unwrap(), root);
        assert_eq!(n.pipeline().last_shot(0), Some(500));

        n.pipeline().set_clock(500);
        n.clock_tick();
        assert_eq!(n.current(0).unwrap(), t);
        assert_eq!(n.wait_status(t), Err(SchedulerError::TimedOut));
    }

    #[test]
    fn root_cannot_block() {
        let n = nucleus(1);
        assert!(n.sleep(Timeout::Relative(10)).is_err());
        assert!(n.wait_period().is_err());
    }

    #[test]
    fn external_timer_one_shot_in_the_past() {
        let n = nucleus(1);
        n.pipeline().set_clock(1_000);
        let id = n.timer_create(0, Box::new(|_| {})).unwrap();
        assert_eq!(n.timer_start(id, 10, None, TimerMode::Absolute), Err(SchedulerError::TimedOut));
        n.timer_start(id, 100, Some(100), TimerMode::Relative).unwrap();
        let info = n.timer_info(id).unwrap();
        assert!(info.running);
        assert_eq!(info.date, 1_100);
        n.timer_destroy(id).unwrap();
        assert!(n.timer_info(id).is_err());
    }

    #[test]
    fn internal_timers_are_hidden() {
        let n = nucleus(1);
        let rrb = n.with_sched(0, |s| s.rrbtimer).unwrap();
        assert!(n.timer_stop(rrb).is_err());
    }

    #[test]
    fn realtime_step_moves_realtime_timers() {
        let n = nucleus(1);
        let id = n.timer_create(0, Box::new(|_| {})).unwrap();
        n.timer_start(id, 5_000, None, TimerMode::Realtime).unwrap();
        n.set_clock(ClockId::Realtime, 3_000).unwrap();
        assert_eq!(n.read_clock(ClockId::Realtime).unwrap(), 3_000);
        // Realtime 5000 is now 2000 ticks away.
        assert_eq!(n.timer_info(id).unwrap().date, 2_000);
    }
}
