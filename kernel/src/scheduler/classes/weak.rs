//! Weak class
//!
//! Real-time threads running below every other real-time class, typically
//! threads that mostly live in-band and only enter the nucleus briefly.

use crate::scheduler::core::domain::Domain;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::core::policy::{check_prio, set_effective_priority, ClassId, SchedClass, SchedParam};
use crate::scheduler::realtime::priorities::{WEAK_MAX_PRIO, WEAK_MIN_PRIO, WEAK_WEIGHT};
use crate::scheduler::thread::{ThreadId, ThreadState};

pub struct WeakClass;

impl SchedClass for WeakClass {
    fn id(&self) -> ClassId {
        ClassId::Weak
    }

    fn name(&self) -> &'static str {
        "weak"
    }

    fn weight(&self) -> i32 {
        WEAK_WEIGHT
    }

    fn prio_range(&self) -> (i32, i32) {
        (WEAK_MIN_PRIO, WEAK_MAX_PRIO)
    }

    fn enqueue(&self, d: &mut Domain, tid: ThreadId) {
        let (cpu, prio) = {
            let t = &d.threads[tid];
            (t.cpu, t.cprio)
        };
        d.scheds[cpu].weak.add_tail(&mut d.threads, tid, prio);
    }

    fn dequeue(&self, d: &mut Domain, tid: ThreadId) {
        let cpu = d.threads[tid].cpu;
        d.scheds[cpu].weak.remove(&mut d.threads, tid);
    }

    fn requeue(&self, d: &mut Domain, tid: ThreadId) {
        let (cpu, prio) = {
            let t = &d.threads[tid];
            (t.cpu, t.cprio)
        };
        d.scheds[cpu].weak.add_head(&mut d.threads, tid, prio);
    }

    fn pick(&self, d: &mut Domain, cpu: usize) -> Option<ThreadId> {
        d.scheds[cpu].weak.pick_highest(&mut d.threads)
    }

    fn rotate(&self, d: &mut Domain, cpu: usize, prio: Option<i32>) {
        let curr = d.scheds[cpu].curr;
        let target = match prio {
            None => curr,
            Some(prio) => match d.scheds[cpu].weak.peek(prio) {
                Some(tid) => tid,
                None => return,
            },
        };
        let t = &d.threads[target];
        if target != curr || (!t.state.intersects(ThreadState::BLOCK_BITS) && t.lock_count == 0) {
            d.putback(target);
        }
    }

    fn chkparam(&self, _d: &Domain, _cpu: usize, param: &SchedParam) -> SchedulerResult<()> {
        match param {
            SchedParam::Weak { prio } => check_prio(self, *prio),
            _ => Err(SchedulerError::InvalidParam { reason: "not a weak parameter" }),
        }
    }

    fn setparam(&self, d: &mut Domain, tid: ThreadId, param: &SchedParam) -> bool {
        if !d.threads[tid].state.contains(ThreadState::BOOSTED) {
            d.threads[tid].state.insert(ThreadState::WEAK);
        }
        set_effective_priority(d, tid, param.prio())
    }

    fn getparam(&self, d: &Domain, tid: ThreadId) -> SchedParam {
        SchedParam::Weak { prio: d.threads[tid].bprio }
    }
}
