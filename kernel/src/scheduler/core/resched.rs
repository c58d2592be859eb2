//! Rescheduling procedure
//!
//! `run()` is the only place a CPU changes its current thread. Everything
//! else only marks CPUs for rescheduling; the front end calls `run()` for
//! the local CPU on its way out of the nucleus.
//!
//! A thread holding the scheduler lock is never preempted, and nothing is
//! switched while the clock interrupt is being handled: the switch happens
//! when the handler returns.

use super::domain::Domain;
use super::policy::class_of;
use super::sched::{SchedLocal, SchedStatus};
use super::statistics::SchedStats;
use crate::pipeline::Pipeline;
use crate::scheduler::core::policy::{ClassId, SchedParam};
use crate::scheduler::thread::{ThreadId, ThreadInfo, ThreadState};
use crate::time::TimerMode;

impl Domain {
    /// Choose the next thread of `cpu`, leaving it unlinked and not READY.
    pub(crate) fn pick_next(&mut self, cpu: usize) -> ThreadId {
        SchedStats::bump(&self.scheds[cpu].stats.picks);
        let curr = self.scheds[cpu].curr;

        let t = &self.threads[curr];
        if !t.state.intersects(ThreadState::BLOCK_BITS | ThreadState::ZOMBIE) && !t.is_root() {
            // Lock holders keep the CPU; retry when they drop it.
            if t.lock_count > 0 {
                self.scheds[cpu].status.insert(SchedStatus::RESCHED);
                return curr;
            }
            // Preempted, not yielding: back at the head of its level.
            if !t.state.contains(ThreadState::READY) && t.cpu == cpu {
                self.requeue(curr);
                self.threads[curr].state.insert(ThreadState::READY);
            }
        }

        let mut next = self.scheds[cpu].root;
        for n in 0..self.classes.len() {
            let Some(id) = self.classes.get(n) else {
                break;
            };
            if let Some(tid) = class_of(id).pick(self, cpu) {
                next = tid;
                break;
            }
        }
        self.set_thread_running(cpu, next);
        next
    }

    fn set_thread_running(&mut self, cpu: usize, tid: ThreadId) {
        let t = &mut self.threads[tid];
        t.state.remove(ThreadState::READY);
        let slice = match t.rrperiod {
            Some(quantum) if t.state.contains(ThreadState::ROUND_ROBIN) => Some(quantum),
            _ => None,
        };
        let rrb = self.scheds[cpu].rrbtimer;
        match slice {
            Some(quantum) => {
                let _ = self.start_timer(rrb, quantum, None, TimerMode::Relative);
            }
            None => self.timers.stop(rrb),
        }
    }

    /// Consume the rescheduling request of `cpu`, kicking the remote CPUs
    /// it marked. Returns false when nothing was requested.
    fn test_resched(&mut self, cpu: usize, pl: &dyn Pipeline) -> bool {
        let sched = &mut self.scheds[cpu];
        if !sched.status.contains(SchedStatus::RESCHED) {
            return false;
        }
        sched.status.remove(SchedStatus::RESCHED);
        let remote = core::mem::take(&mut sched.resched);
        if !remote.is_empty() {
            SchedStats::bump(&sched.stats.resched_ipis);
            pl.send_resched_ipi(remote);
        }
        true
    }

    /// Work the current thread left to be done from its own context
    fn commit_lazy_work(&mut self, cpu: usize) {
        let curr = self.scheds[cpu].curr;
        let t = &self.threads[curr];
        if t.state.contains(ThreadState::USER) && t.info.contains(ThreadInfo::CEILING_PENDING) {
            self.commit_ceiling(curr);
        }

        let t = &mut self.threads[curr];
        if t.state.contains(ThreadState::MIGRATING) {
            t.state.remove(ThreadState::MIGRATING);
            let target = t.affinity.intersect(&self.online).first();
            if let Some(to) = target.filter(|&to| to != cpu) {
                self.migrate_thread(curr, to);
            }
        }
    }

    /// Run the rescheduling procedure of `cpu`. Returns whether the current
    /// thread changed.
    pub(crate) fn run(&mut self, cpu: usize, pl: &dyn Pipeline) -> bool {
        let curr = self.scheds[cpu].curr;
        if self.threads[curr].lock_count > 0 || self.scheds[cpu].lflags.contains(SchedLocal::IN_IRQ) {
            return false;
        }
        self.commit_lazy_work(cpu);

        let mut switched = false;
        while self.test_resched(cpu, pl) {
            let prev = self.scheds[cpu].curr;
            let next = self.pick_next(cpu);
            if next == prev {
                if self.threads[next].is_root() {
                    self.service_host(cpu, pl);
                }
                break;
            }
            switched = true;
            if self.switch_context(cpu, prev, next, pl) {
                return true;
            }

            // A cancelled thread exits as soon as it gets the CPU back.
            let t = &self.threads[next];
            if t.info.contains(ThreadInfo::CANCELLED) && t.lock_count == 0 && !t.is_root() {
                self.do_exit(next);
            }
        }
        switched
    }

    fn switch_context(&mut self, cpu: usize, prev: ThreadId, next: ThreadId, pl: &dyn Pipeline) -> bool {
        let now = self.now;

        let prev_class = class_of(self.threads[prev].base_class);
        prev_class.suspend_activity(self, prev);
        let next_class = class_of(self.threads[next].base_class);
        next_class.resume_activity(self, next);

        self.scheds[cpu].curr = next;
        let leaving_inband = self.threads[prev].is_root();
        if leaving_inband {
            self.leave_root(cpu);
        } else if self.threads[next].is_root() {
            self.service_host(cpu, pl);
            self.enter_root(cpu);
        }

        let last = core::mem::replace(&mut self.scheds[cpu].last_switch, now);
        self.threads[prev].stats.exec_time += now.saturating_sub(last);
        let stats = &mut self.threads[next].stats;
        stats.csw += 1;
        stats.last_switch_in = now;
        SchedStats::bump(&self.scheds[cpu].stats.switches);
        log::trace!("[SCHED] CPU {}: {} -> {}", cpu, prev, next);

        let done = pl.switch_to(prev, next, leaving_inband);

        if self.threads[prev].state.contains(ThreadState::ZOMBIE) {
            self.finalize(prev);
        }
        done
    }

    fn leave_root(&mut self, cpu: usize) {
        if let Some(timeout) = self.config.watchdog_timeout {
            let wd = self.scheds[cpu].wdtimer;
            let _ = self.start_timer(wd, timeout, None, TimerMode::Relative);
        }
        // The host tick may now have to be deferred.
        self.timers.mark_dirty(cpu);
    }

    fn enter_root(&mut self, cpu: usize) {
        let sched = &self.scheds[cpu];
        let wd = sched.wdtimer;
        SchedStats::bump(&sched.stats.root_entries);
        self.timers.stop(wd);
    }

    /// Round-robin slice of the current thread elapsed
    pub(crate) fn sched_tick(&mut self, cpu: usize) {
        let curr = self.scheds[cpu].curr;
        let t = &self.threads[curr];
        // Boosted threads are not sliced by the class they borrowed.
        if t.sched_class != t.base_class || t.lock_count > 0 {
            return;
        }
        if t.state & (ThreadState::BLOCK_BITS | ThreadState::ROUND_ROBIN) == ThreadState::ROUND_ROBIN {
            let class = class_of(t.sched_class);
            class.tick(self, cpu);
        }
    }

    /// Real-time activity starved the root thread of `cpu` for too long
    pub(crate) fn watchdog_expired(&mut self, cpu: usize) {
        let curr = self.scheds[cpu].curr;
        if self.threads[curr].is_root() {
            return;
        }
        SchedStats::bump(&self.scheds[cpu].stats.watchdog_hits);
        log::warn!("[WATCHDOG] {} runaway on CPU {}", curr, cpu);

        if self.threads[curr].state.contains(ThreadState::USER) {
            self.threads[curr].info.insert(ThreadInfo::KICKED);
            let param = if self.classes.is_registered(ClassId::Weak) {
                SchedParam::Weak { prio: 0 }
            } else {
                SchedParam::Rt { prio: 0 }
            };
            if let Err(err) = self.set_policy(curr, param) {
                log::error!("[WATCHDOG] cannot demote {}: {}", curr, err);
            }
            let class = class_of(self.threads[curr].base_class);
            class.kick(self, curr);
            self.set_resched(cpu);
        } else {
            self.threads[curr].info.insert(ThreadInfo::KICKED);
            self.cancel(curr);
        }

        // Keep watching whoever runs next instead of the root thread.
        if let Some(timeout) = self.config.watchdog_timeout {
            let wd = self.scheds[cpu].wdtimer;
            let _ = self.start_timer(wd, timeout, None, TimerMode::Relative);
        }
    }

    /// Lock the scheduler on behalf of the current thread of `cpu`
    pub(crate) fn lock_sched(&mut self, cpu: usize) {
        let curr = self.scheds[cpu].curr;
        self.threads[curr].lock_count += 1;
    }

    pub(crate) fn unlock_sched(&mut self, cpu: usize) {
        let curr = self.scheds[cpu].curr;
        let t = &mut self.threads[curr];
        crate::sched_assert!(t.lock_count > 0, "scheduler unlock without lock");
        t.lock_count -= 1;
        if t.lock_count > 0 {
            return;
        }
        if t.info.contains(ThreadInfo::CANCELLED) && !t.is_root() {
            self.do_exit(curr);
        }
        // Anything deferred while locked gets its chance now.
        self.set_resched(cpu);
    }

    /// Hardware timer interrupt of `cpu`
    pub(crate) fn clock_tick(&mut self, cpu: usize, pl: &dyn Pipeline) {
        self.scheds[cpu].lflags.insert(SchedLocal::IN_IRQ);
        self.expire_timers(cpu);
        let curr = self.scheds[cpu].curr;
        if self.threads[curr].is_root() {
            self.service_host(cpu, pl);
        }
        self.scheds[cpu].lflags.remove(SchedLocal::IN_IRQ);
    }
}
