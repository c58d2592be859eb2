//! Fixed-priority real-time class
//!
//! FIFO within a priority level, optional round-robin slicing. The per-CPU
//! rt run-queue is also used by the sporadic class.

use crate::scheduler::core::domain::Domain;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::core::policy::{check_prio, set_effective_priority, ClassId, SchedClass, SchedParam};
use crate::scheduler::realtime::priorities::{RT_MAX_PRIO, RT_MIN_PRIO, RT_WEIGHT};
use crate::scheduler::thread::{ThreadId, ThreadState};

pub struct RtClass;

impl RtClass {
    /// Tail insertion into the rt queue of the thread's CPU
    pub(crate) fn queue_tail(d: &mut Domain, tid: ThreadId) {
        let (cpu, prio) = {
            let t = &d.threads[tid];
            (t.cpu, t.cprio)
        };
        d.scheds[cpu].rt.add_tail(&mut d.threads, tid, prio);
    }

    pub(crate) fn queue_head(d: &mut Domain, tid: ThreadId) {
        let (cpu, prio) = {
            let t = &d.threads[tid];
            (t.cpu, t.cprio)
        };
        d.scheds[cpu].rt.add_head(&mut d.threads, tid, prio);
    }

    pub(crate) fn unqueue(d: &mut Domain, tid: ThreadId) {
        let cpu = d.threads[tid].cpu;
        d.scheds[cpu].rt.remove(&mut d.threads, tid);
    }
}

impl SchedClass for RtClass {
    fn id(&self) -> ClassId {
        ClassId::Rt
    }

    fn name(&self) -> &'static str {
        "rt"
    }

    fn weight(&self) -> i32 {
        RT_WEIGHT
    }

    fn prio_range(&self) -> (i32, i32) {
        (RT_MIN_PRIO, RT_MAX_PRIO)
    }

    fn enqueue(&self, d: &mut Domain, tid: ThreadId) {
        Self::queue_tail(d, tid);
    }

    fn dequeue(&self, d: &mut Domain, tid: ThreadId) {
        Self::unqueue(d, tid);
    }

    fn requeue(&self, d: &mut Domain, tid: ThreadId) {
        Self::queue_head(d, tid);
    }

    fn pick(&self, d: &mut Domain, cpu: usize) -> Option<ThreadId> {
        d.scheds[cpu].rt.pick_highest(&mut d.threads)
    }

    fn tick(&self, d: &mut Domain, cpu: usize) {
        // Slice exhausted: back to the end of its priority group.
        let curr = d.scheds[cpu].curr;
        d.putback(curr);
    }

    fn rotate(&self, d: &mut Domain, cpu: usize, prio: Option<i32>) {
        if d.scheds[cpu].rt.is_empty() {
            return;
        }
        let curr = d.scheds[cpu].curr;
        let target = match prio {
            None => curr,
            Some(prio) => match d.scheds[cpu].rt.peek(prio) {
                Some(tid) => tid,
                None => return,
            },
        };
        // Never put back a current thread that blocked or holds the lock.
        let t = &d.threads[target];
        if target != curr || (!t.state.intersects(ThreadState::BLOCK_BITS) && t.lock_count == 0) {
            d.putback(target);
        }
    }

    fn chkparam(&self, _d: &Domain, _cpu: usize, param: &SchedParam) -> SchedulerResult<()> {
        match param {
            SchedParam::Rt { prio } => check_prio(self, *prio),
            _ => Err(SchedulerError::InvalidParam { reason: "not an rt parameter" }),
        }
    }

    fn setparam(&self, d: &mut Domain, tid: ThreadId, param: &SchedParam) -> bool {
        let effective = set_effective_priority(d, tid, param.prio());
        let t = &mut d.threads[tid];
        if !t.state.contains(ThreadState::BOOSTED) {
            t.state.remove(ThreadState::WEAK);
        }
        effective
    }

    fn getparam(&self, d: &Domain, tid: ThreadId) -> SchedParam {
        SchedParam::Rt { prio: d.threads[tid].bprio }
    }

    fn supports_round_robin(&self) -> bool {
        true
    }
}
