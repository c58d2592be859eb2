//! Thread lifecycle
//!
//! Creation, start, blocking and wakeup, cancellation and exit, policy
//! changes, CPU migration and periodic timelines. These are the only paths
//! that move a thread between run-queues and wait states; every one of them
//! runs under the nucleus lock and leaves rescheduling to `run()`.

use super::domain::Domain;
use super::error::{SchedulerError, SchedulerResult};
use super::policy::{class_of, weighted, ClassId, SchedParam};
use crate::scheduler::core::affinity::CpuMask;
use crate::scheduler::thread::{Thread, ThreadAttr, ThreadId, ThreadInfo, ThreadState};
use crate::sync::SynchId;
use crate::time::timer::TimerKind;
use crate::time::{Ticks, Timeout, TimerMode, TimerPrio};

impl Domain {
    pub(crate) fn check_thread(&self, tid: ThreadId) -> SchedulerResult<&Thread> {
        self.threads
            .get(tid)
            .filter(|t| !t.state.contains(ThreadState::ZOMBIE))
            .ok_or(SchedulerError::ThreadNotFound { thread_id: tid.index() })
    }

    /// Same as `check_thread`, rejecting the root threads
    pub(crate) fn check_user_thread(&self, tid: ThreadId) -> SchedulerResult<&Thread> {
        let t = self.check_thread(tid)?;
        if t.is_root() {
            return Err(SchedulerError::InvalidParam { reason: "root thread" });
        }
        Ok(t)
    }

    // ───────────────────────────────────────────────────────────────
    // Creation
    // ───────────────────────────────────────────────────────────────

    /// Create a dormant thread under `param`
    pub(crate) fn thread_init(&mut self, attr: &ThreadAttr, param: SchedParam) -> SchedulerResult<ThreadId> {
        let allowed = attr.affinity.intersect(&self.online);
        if allowed.is_empty() {
            return Err(SchedulerError::InvalidCpuMask);
        }
        if param == SchedParam::Idle {
            return Err(SchedulerError::InvalidParam { reason: "idle class is reserved to root threads" });
        }
        let class = self.classes.check(param.class())?;
        let cpu = if allowed.is_set(self.this_cpu) {
            self.this_cpu
        } else {
            allowed.first().ok_or(SchedulerError::InvalidCpuMask)?
        };
        class.chkparam(self, cpu, &param)?;

        let id = self.threads.next_id();
        let rtimer = self.timers.create(TimerKind::ThreadTimeout(id), cpu, TimerPrio::Standard);
        let ptimer = self.timers.create(TimerKind::ThreadPeriod(id), cpu, TimerPrio::Standard);
        let mut thread = Thread::new(id, attr, cpu, class.id(), rtimer, ptimer);
        thread.affinity = allowed;
        thread.wprio = i32::MIN;
        self.threads.insert(thread);

        class.declare(self, id, &param);
        class.setparam(self, id, &param);
        let t = &mut self.threads[id];
        t.sched_class = class.id();
        t.wprio = weighted(t.sched_class, t.cprio);

        log::debug!(
            "[THREAD] {} '{}' created on CPU {}, class {}, prio {}",
            id,
            attr.name,
            cpu,
            class.name(),
            t.cprio
        );
        Ok(id)
    }

    /// Make a dormant thread runnable
    pub(crate) fn start(&mut self, tid: ThreadId) -> SchedulerResult<()> {
        let t = self.check_user_thread(tid)?;
        if !t.state.contains(ThreadState::DORMANT) {
            return Err(SchedulerError::ThreadBusy { thread_id: tid.index() });
        }
        self.resume(tid, ThreadState::DORMANT);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────
    // Blocking and wakeup
    // ───────────────────────────────────────────────────────────────

    /// Add the block bits of `mask` to `tid`, arming its timeout if any.
    ///
    /// A runnable thread with a pending kick is not blocked: its wait is
    /// broken on the spot. A timeout already elapsed leaves the thread
    /// runnable with TIMED_OUT raised.
    pub(crate) fn suspend(&mut self, tid: ThreadId, mask: ThreadState, timeout: Timeout, wchan: Option<SynchId>) {
        let is_current = self.is_current(tid);
        let t = &mut self.threads[tid];
        let oldstate = t.state;

        if !oldstate.intersects(ThreadState::BLOCK_BITS) {
            if !mask.contains(ThreadState::RELAXED) && t.info.contains(ThreadInfo::KICKED) {
                // A kick breaks one wait and is consumed by it.
                t.info.remove(ThreadInfo::KICKED | ThreadInfo::REMOVED | ThreadInfo::TIMED_OUT);
                t.info.insert(ThreadInfo::BROKEN);
                if let Some(sid) = wchan {
                    t.wchan = Some(sid);
                    self.forget_sleeper(tid);
                }
                return;
            }
            if is_current {
                t.info.remove(ThreadInfo::WAIT_OUTCOME | ThreadInfo::WOKEN | ThreadInfo::KICKED);
            }
        }

        if let Some((value, mode)) = timeout.as_timer() {
            let date = self.resolve_date(value, mode);
            if date <= self.now {
                let t = &mut self.threads[tid];
                t.info.insert(ThreadInfo::TIMED_OUT);
                if let Some(sid) = wchan {
                    t.wchan = Some(sid);
                    self.forget_sleeper(tid);
                }
                return;
            }
            let (rtimer, cpu) = {
                let t = &self.threads[tid];
                (t.rtimer, t.cpu)
            };
            self.timers.set_cpu(rtimer, cpu);
            let _ = self.timers.start(rtimer, date, None, mode);
            self.threads[tid].state.insert(ThreadState::DELAYED);
        }

        if oldstate.contains(ThreadState::READY) {
            self.dequeue(tid);
            self.threads[tid].state.remove(ThreadState::READY);
        }
        let t = &mut self.threads[tid];
        t.state.insert(mask);
        if wchan.is_some() {
            t.wchan = wchan;
        }
        let cpu = t.cpu;
        if is_current || oldstate.contains(ThreadState::READY) {
            self.set_resched(cpu);
        }
    }

    /// Clear the block bits of `mask`; the thread becomes runnable once no
    /// block bit is left. Resuming a runnable thread moves it to the tail
    /// of its priority level.
    pub(crate) fn resume(&mut self, tid: ThreadId, mask: ThreadState) {
        let oldstate = self.threads[tid].state;
        if oldstate.contains(ThreadState::ZOMBIE) {
            return;
        }

        if oldstate.intersects(ThreadState::BLOCK_BITS) {
            self.threads[tid].state.remove(mask);
            if mask.contains(ThreadState::DELAYED) {
                // No-op when the timeout itself is resuming the thread.
                let rtimer = self.threads[tid].rtimer;
                self.timers.stop(rtimer);
            }

            let state = self.threads[tid].state;
            if state.intersects(ThreadState::BLOCK_BITS) {
                if mask.contains(ThreadState::DELAYED) {
                    // Timed out or unblocked while pending on a resource.
                    if state.contains(ThreadState::PENDING) && self.threads[tid].wchan.is_some() {
                        self.forget_sleeper(tid);
                    }
                } else if state.contains(ThreadState::DELAYED) {
                    if mask.contains(ThreadState::PENDING) {
                        // Resource granted: cancel the timeout.
                        let rtimer = self.threads[tid].rtimer;
                        self.timers.stop(rtimer);
                        self.threads[tid].state.remove(ThreadState::DELAYED);
                    }
                } else if mask.contains(ThreadState::PENDING) && self.threads[tid].wchan.is_some() {
                    // Still suspended, but no longer waiting for the resource.
                    self.forget_sleeper(tid);
                }
                if self.threads[tid].state.intersects(ThreadState::BLOCK_BITS) {
                    return;
                }
            }
            if !(mask - ThreadState::DELAYED).is_empty() && self.threads[tid].wchan.is_some() {
                self.forget_sleeper(tid);
            }
        } else if oldstate.contains(ThreadState::READY) {
            self.dequeue(tid);
        }

        self.threads[tid].state.insert(ThreadState::READY);
        self.enqueue(tid);
        let cpu = self.threads[tid].cpu;
        self.set_resched(cpu);
    }

    /// Break the delay or resource wait of `tid`. Returns whether it was
    /// waiting.
    pub(crate) fn unblock(&mut self, tid: ThreadId) -> bool {
        let state = self.threads[tid].state;
        if state.contains(ThreadState::DELAYED) {
            self.resume(tid, ThreadState::DELAYED);
        } else if state.contains(ThreadState::PENDING) {
            self.resume(tid, ThreadState::PENDING);
        } else {
            return false;
        }
        // Never cleared here: an earlier break must not be lost.
        self.threads[tid].info.insert(ThreadInfo::BROKEN);
        true
    }

    /// Outcome of the last wait of `tid`
    pub(crate) fn wait_status(&mut self, tid: ThreadId) -> SchedulerResult<()> {
        let t = &mut self.threads[tid];
        if t.info.contains(ThreadInfo::REMOVED) {
            Err(SchedulerError::ObjectRemoved)
        } else if t.info.contains(ThreadInfo::TIMED_OUT) {
            Err(SchedulerError::TimedOut)
        } else if t.info.contains(ThreadInfo::BROKEN) {
            Err(SchedulerError::Interrupted)
        } else if t.period.missed > 0 {
            let count = core::mem::take(&mut t.period.missed);
            Err(SchedulerError::Overrun { count })
        } else {
            Ok(())
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Cancellation and exit
    // ───────────────────────────────────────────────────────────────

    /// Request the cancellation of `tid`. A current thread not holding the
    /// scheduler lock exits at once; a locked one exits when it unlocks;
    /// any other thread has its wait broken and exits when it next runs.
    pub(crate) fn cancel(&mut self, tid: ThreadId) {
        let t = &mut self.threads[tid];
        if t.state.contains(ThreadState::ZOMBIE) || t.is_root() {
            return;
        }
        let already = t.info.contains(ThreadInfo::CANCELLED);
        t.info.insert(ThreadInfo::CANCELLED);

        if !already && t.state.contains(ThreadState::DORMANT) {
            // Fake a start so that the thread reaches its exit path.
            t.info.insert(ThreadInfo::KICKED);
            self.resume(tid, ThreadState::DORMANT);
            return;
        }

        if self.is_current(tid) {
            if self.threads[tid].lock_count == 0 {
                self.do_exit(tid);
            }
            return;
        }

        self.threads[tid].info.insert(ThreadInfo::KICKED);
        self.unblock(tid);
        let state = self.threads[tid].state;
        if state.intersects(ThreadState::SUSPENDED | ThreadState::HELD) {
            self.resume(tid, ThreadState::SUSPENDED | ThreadState::HELD);
        }
    }

    /// Tear `tid` down to a zombie: drop its resources, unlink it from any
    /// queue and stop its timers. A thread that is not current is
    /// finalized immediately; a current one when the CPU switches away.
    pub(crate) fn do_exit(&mut self, tid: ThreadId) {
        log::debug!("[THREAD] {} exiting", tid);
        self.release_all_ownerships(tid);
        if self.threads[tid].wchan.is_some() {
            self.forget_sleeper(tid);
        }

        let t = &self.threads[tid];
        if t.state.contains(ThreadState::READY) {
            self.dequeue(tid);
            self.threads[tid].state.remove(ThreadState::READY);
        }
        let t = &self.threads[tid];
        let (rtimer, ptimer, cpu) = (t.rtimer, t.ptimer, t.cpu);
        self.timers.stop(rtimer);
        self.timers.stop(ptimer);

        let class = class_of(self.threads[tid].base_class);
        class.forget(self, tid);

        let t = &mut self.threads[tid];
        t.state.insert(ThreadState::ZOMBIE);
        t.boosters.clear();
        self.set_resched(cpu);

        if !self.scheds.iter().any(|s| s.curr == tid) {
            self.finalize(tid);
        }
    }

    /// Drop the TCB of a zombie
    pub(crate) fn finalize(&mut self, tid: ThreadId) {
        let Some(t) = self.threads.remove(tid) else {
            return;
        };
        self.timers.destroy(t.rtimer);
        self.timers.destroy(t.ptimer);
        log::trace!("[THREAD] {} finalized", tid);
    }

    // ───────────────────────────────────────────────────────────────
    // Scheduling policy
    // ───────────────────────────────────────────────────────────────

    /// Move `tid` to the class and parameters of `param`. While a boost is
    /// active a lower priority only reaches the base settings, restored
    /// when the boost ends.
    pub(crate) fn set_policy(&mut self, tid: ThreadId, param: SchedParam) -> SchedulerResult<()> {
        let t = self.check_user_thread(tid)?;
        if param == SchedParam::Idle {
            return Err(SchedulerError::InvalidParam { reason: "idle class is reserved to root threads" });
        }
        let cpu = t.cpu;
        let old_base = t.base_class;
        let class = self.classes.check(param.class())?;
        class.chkparam(self, cpu, &param)?;

        // Declared while still a member of the old class.
        if class.id() != old_base {
            class.declare(self, tid, &param);
        }
        let ready = self.threads[tid].state.contains(ThreadState::READY);
        if ready {
            self.dequeue(tid);
        }
        if class.id() != old_base {
            class_of(old_base).forget(self, tid);
        }

        self.threads[tid].base_class = class.id();
        if class.setparam(self, tid, &param) {
            let t = &mut self.threads[tid];
            t.sched_class = class.id();
            t.wprio = weighted(t.sched_class, t.cprio);
        }
        if ready {
            self.enqueue(tid);
        }

        // No round-robin outside the classes that slice.
        if !class.supports_round_robin() {
            let t = &mut self.threads[tid];
            t.state.remove(ThreadState::ROUND_ROBIN);
            t.rrperiod = None;
        }

        if !self.threads[tid].state.contains(ThreadState::DORMANT) {
            self.set_resched(cpu);
        }
        log::debug!("[THREAD] {} policy set to {:?}", tid, param);
        Ok(())
    }

    /// Current scheduling parameters of `tid`, from its base class
    pub(crate) fn get_policy(&self, tid: ThreadId) -> SchedulerResult<SchedParam> {
        let t = self.check_thread(tid)?;
        Ok(class_of(t.base_class).getparam(self, tid))
    }

    /// Change the priority of `tid` within its base class
    pub(crate) fn apply_priority(&mut self, tid: ThreadId, prio: i32) {
        let ready = self.threads[tid].state.contains(ThreadState::READY);
        if ready {
            self.dequeue(tid);
        }
        if super::policy::set_effective_priority(self, tid, prio) {
            let t = &mut self.threads[tid];
            t.sched_class = t.base_class;
            t.wprio = weighted(t.sched_class, t.cprio);
        }
        if ready {
            self.enqueue(tid);
        }
        let cpu = self.threads[tid].cpu;
        self.set_resched(cpu);
    }

    /// Enable round-robin slicing with `quantum`, or disable it on `None`
    pub(crate) fn set_slice(&mut self, tid: ThreadId, quantum: Option<Ticks>) -> SchedulerResult<()> {
        let t = self.check_user_thread(tid)?;
        let (cpu, base) = (t.cpu, t.base_class);
        let current = self.is_current(tid);
        let rrb = self.scheds[cpu].rrbtimer;

        match quantum {
            Some(0) => Err(SchedulerError::InvalidInterval),
            Some(q) => {
                if !class_of(base).supports_round_robin() {
                    return Err(SchedulerError::InvalidParam { reason: "class does not support round-robin" });
                }
                let t = &mut self.threads[tid];
                t.rrperiod = Some(q);
                t.state.insert(ThreadState::ROUND_ROBIN);
                if current {
                    self.start_timer(rrb, q, None, TimerMode::Relative)?;
                }
                Ok(())
            }
            None => {
                let t = &mut self.threads[tid];
                t.rrperiod = None;
                t.state.remove(ThreadState::ROUND_ROBIN);
                if current {
                    self.timers.stop(rrb);
                }
                Ok(())
            }
        }
    }

    /// Rotate the level `prio` (current thread's level on `None`) of
    /// `class` on `cpu`
    pub(crate) fn rotate(&mut self, cpu: usize, class: ClassId, prio: Option<i32>) -> SchedulerResult<()> {
        if cpu >= self.scheds.len() {
            return Err(SchedulerError::CpuNotAvailable { cpu_id: cpu });
        }
        let class = self.classes.check(class)?;
        class.rotate(self, cpu, prio);
        Ok(())
    }

    /// Current thread of `cpu` goes to the tail of its priority level
    pub(crate) fn yield_now(&mut self, cpu: usize) {
        let curr = self.scheds[cpu].curr;
        if !self.threads[curr].is_root() {
            self.resume(curr, ThreadState::empty());
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Migration
    // ───────────────────────────────────────────────────────────────

    fn check_target_cpu(&self, tid: ThreadId, to: usize) -> SchedulerResult<()> {
        if !self.online.is_set(to) || to >= self.scheds.len() {
            return Err(SchedulerError::CpuNotAvailable { cpu_id: to });
        }
        if !self.threads[tid].affinity.is_set(to) {
            return Err(SchedulerError::InvalidCpuMask);
        }
        Ok(())
    }

    /// Rebind `tid` to `to`, leaving it unlinked
    fn move_thread(&mut self, tid: ThreadId, to: usize) {
        if self.threads[tid].state.contains(ThreadState::READY) {
            self.dequeue(tid);
            self.threads[tid].state.remove(ThreadState::READY);
        }
        // The class may change its mind about the thread here.
        let class = class_of(self.threads[tid].sched_class);
        class.migrate(self, tid, to);

        let t = &mut self.threads[tid];
        t.cpu = to;
        t.info.insert(ThreadInfo::MOVED);
        let (rtimer, ptimer) = (t.rtimer, t.ptimer);
        self.timers.set_cpu(rtimer, to);
        self.timers.set_cpu(ptimer, to);
    }

    /// Move a running thread to the run-queue of `to`
    pub(crate) fn migrate_thread(&mut self, tid: ThreadId, to: usize) {
        let from = self.threads[tid].cpu;
        self.set_resched(from);
        self.move_thread(tid, to);
        self.putback(tid);
        log::debug!("[SCHED] {} migrated CPU {} -> {}", tid, from, to);
    }

    /// Move the current thread of its CPU to `to`
    pub(crate) fn migrate(&mut self, tid: ThreadId, to: usize) -> SchedulerResult<()> {
        let t = self.check_user_thread(tid)?;
        let from = t.cpu;
        if !self.is_current(tid) {
            return Err(SchedulerError::NotCurrent { thread_id: tid.index() });
        }
        if t.lock_count > 0 {
            return Err(SchedulerError::ThreadBusy { thread_id: tid.index() });
        }
        self.check_target_cpu(tid, to)?;
        if to != from {
            self.migrate_thread(tid, to);
        }
        Ok(())
    }

    /// Move a thread that is not running to `to`
    pub(crate) fn migrate_passive(&mut self, tid: ThreadId, to: usize) -> SchedulerResult<()> {
        let from = self.check_user_thread(tid)?.cpu;
        if self.is_current(tid) {
            return Err(SchedulerError::ThreadBusy { thread_id: tid.index() });
        }
        self.check_target_cpu(tid, to)?;
        if to == from {
            return Ok(());
        }
        self.move_thread(tid, to);
        if !self.threads[tid].state.intersects(ThreadState::BLOCK_BITS) {
            self.requeue(tid);
            self.threads[tid].state.insert(ThreadState::READY);
            self.set_resched(to);
        }
        log::debug!("[SCHED] {} moved CPU {} -> {}", tid, from, to);
        Ok(())
    }

    /// Restrict `tid` to `mask`, moving it off a CPU it may no longer use.
    /// A thread running on another CPU moves itself at its next
    /// rescheduling point.
    pub(crate) fn set_affinity(&mut self, tid: ThreadId, mask: CpuMask) -> SchedulerResult<()> {
        let cpu = self.check_user_thread(tid)?.cpu;
        let allowed = mask.intersect(&self.online);
        let Some(target) = allowed.first() else {
            return Err(SchedulerError::InvalidCpuMask);
        };
        self.threads[tid].affinity = allowed;
        if allowed.is_set(cpu) {
            return Ok(());
        }

        if !self.is_current(tid) {
            return self.migrate_passive(tid, target);
        }
        if cpu == self.this_cpu && self.threads[tid].lock_count == 0 {
            self.migrate_thread(tid, target);
        } else {
            self.threads[tid].state.insert(ThreadState::MIGRATING);
            self.set_resched(cpu);
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────
    // Periodic timeline
    // ───────────────────────────────────────────────────────────────

    /// Give `tid` a periodic timeline starting at `idate` (one period from
    /// now when infinite), or remove it when `period` is `None`.
    pub(crate) fn set_periodic(&mut self, tid: ThreadId, idate: Timeout, period: Option<Ticks>) -> SchedulerResult<()> {
        let t = self.check_user_thread(tid)?;
        let (ptimer, cpu) = (t.ptimer, t.cpu);
        let Some(period) = period else {
            self.timers.stop(ptimer);
            self.threads[tid].period = Default::default();
            return Ok(());
        };
        if period == 0 {
            return Err(SchedulerError::InvalidInterval);
        }
        let (value, mode) = idate.as_timer().unwrap_or((period, TimerMode::Relative));
        self.threads[tid].period = Default::default();
        self.timers.set_cpu(ptimer, cpu);
        self.start_timer(ptimer, value, Some(period), mode)
    }

    /// Release point of the periodic timeline of `tid`
    pub(crate) fn period_release(&mut self, tid: ThreadId, overruns: u64) {
        let t = &mut self.threads[tid];
        if t.period.waiting {
            t.period.waiting = false;
            t.period.missed = overruns;
            self.resume(tid, ThreadState::DELAYED);
        } else {
            t.period.releases += 1 + overruns;
        }
    }

    /// Wait for the next release point of `tid`. Returns immediately when
    /// release points passed since the last call, reporting the extra ones
    /// as an overrun.
    pub(crate) fn wait_period(&mut self, tid: ThreadId) -> SchedulerResult<()> {
        let ptimer = self.check_user_thread(tid)?.ptimer;
        if !self.timers.is_running(ptimer) {
            return Err(SchedulerError::NotPeriodic { thread_id: tid.index() });
        }
        if !self.is_current(tid) {
            return Err(SchedulerError::NotCurrent { thread_id: tid.index() });
        }
        // Release points skipped since the last firing count as well.
        let skipped = self.timers.take_overruns(ptimer);
        let t = &mut self.threads[tid];
        t.period.releases += skipped;
        if t.period.releases == 0 {
            t.period.waiting = true;
            t.period.missed = 0;
            self.suspend(tid, ThreadState::DELAYED, Timeout::Infinite, None);
            let t = &mut self.threads[tid];
            if t.info.contains(ThreadInfo::BROKEN) {
                t.period.waiting = false;
                return Err(SchedulerError::Interrupted);
            }
            return Ok(());
        }
        let overruns = core::mem::take(&mut t.period.releases) - 1;
        if overruns > 0 {
            Err(SchedulerError::Overrun { count: overruns })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NucleusConfig;
    use crate::testing::MockPipeline;

    fn domain() -> (Domain, MockPipeline) {
        let mut d = Domain::new(NucleusConfig::new(1), CpuMask::first_n(1));
        d.enter(0, 0);
        (d, MockPipeline::new(1))
    }

    fn running(d: &mut Domain, pl: &MockPipeline, prio: i32) -> ThreadId {
        let tid = d.thread_init(&ThreadAttr::new("t"), SchedParam::Rt { prio }).unwrap();
        d.start(tid).unwrap();
        d.run(0, pl);
        assert_eq!(d.curr(0), tid);
        tid
    }

    #[test]
    fn elapsed_timeout_does_not_block() {
        let (mut d, pl) = domain();
        let t = running(&mut d, &pl, 10);
        d.enter(0, 100);
        d.suspend(t, ThreadState::DELAYED, Timeout::Absolute(50), None);
        assert!(!d.threads[t].is_blocked());
        assert_eq!(d.wait_status(t), Err(SchedulerError::TimedOut));
    }

    #[test]
    fn kick_breaks_a_single_wait() {
        let (mut d, pl) = domain();
        let t = running(&mut d, &pl, 10);
        d.threads[t].info.insert(ThreadInfo::KICKED);

        d.suspend(t, ThreadState::DELAYED, Timeout::Infinite, None);
        assert!(!d.threads[t].is_blocked());
        assert_eq!(d.wait_status(t), Err(SchedulerError::Interrupted));

        d.suspend(t, ThreadState::DELAYED, Timeout::Infinite, None);
        assert!(d.threads[t].is_blocked());
    }

    #[test]
    fn suspend_bits_stack() {
        let (mut d, pl) = domain();
        let t = running(&mut d, &pl, 10);
        d.suspend(t, ThreadState::SUSPENDED, Timeout::Infinite, None);
        d.suspend(t, ThreadState::DELAYED, Timeout::Relative(1_000), None);

        d.resume(t, ThreadState::DELAYED);
        assert!(d.threads[t].is_blocked());
        d.resume(t, ThreadState::SUSPENDED);
        assert!(d.threads[t].state.contains(ThreadState::READY));
    }

    #[test]
    fn cancelled_dormant_thread_exits_on_first_run() {
        let (mut d, pl) = domain();
        let root = d.curr(0);
        let t = d.thread_init(&ThreadAttr::new("t"), SchedParam::Rt { prio: 10 }).unwrap();
        d.cancel(t);
        assert!(d.threads[t].state.contains(ThreadState::READY));

        d.run(0, &pl);
        assert_eq!(d.curr(0), root);
        assert!(d.check_thread(t).is_err());
        assert_eq!(pl.switches(), [(root, t), (t, root)]);
    }

    #[test]
    fn idle_policy_is_reserved() {
        let (mut d, pl) = domain();
        let t = running(&mut d, &pl, 10);
        assert!(d.set_policy(t, SchedParam::Idle).is_err());
        assert!(d.thread_init(&ThreadAttr::new("i"), SchedParam::Idle).is_err());
    }
}
