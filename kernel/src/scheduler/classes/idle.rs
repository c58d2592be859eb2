//! Idle class
//!
//! Holds only the per-CPU root threads. It has no run-queue: its pick
//! returns the root thread unconditionally, which guarantees every CPU
//! always has something to run.

use crate::scheduler::core::domain::Domain;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::core::policy::{ClassId, SchedClass, SchedParam};
use crate::scheduler::realtime::priorities::{IDLE_PRIO, IDLE_WEIGHT};
use crate::scheduler::thread::ThreadId;

pub struct IdleClass;

impl SchedClass for IdleClass {
    fn id(&self) -> ClassId {
        ClassId::Idle
    }

    fn name(&self) -> &'static str {
        "idle"
    }

    fn weight(&self) -> i32 {
        IDLE_WEIGHT
    }

    fn prio_range(&self) -> (i32, i32) {
        (IDLE_PRIO, IDLE_PRIO)
    }

    fn enqueue(&self, _d: &mut Domain, _tid: ThreadId) {}

    fn dequeue(&self, _d: &mut Domain, _tid: ThreadId) {}

    fn requeue(&self, _d: &mut Domain, _tid: ThreadId) {}

    fn pick(&self, d: &mut Domain, cpu: usize) -> Option<ThreadId> {
        Some(d.scheds[cpu].root)
    }

    fn chkparam(&self, _d: &Domain, _cpu: usize, param: &SchedParam) -> SchedulerResult<()> {
        match param {
            SchedParam::Idle => Ok(()),
            _ => Err(SchedulerError::InvalidParam { reason: "not an idle parameter" }),
        }
    }

    fn setparam(&self, d: &mut Domain, tid: ThreadId, _param: &SchedParam) -> bool {
        let t = &mut d.threads[tid];
        t.bprio = IDLE_PRIO;
        t.cprio = IDLE_PRIO;
        true
    }

    fn getparam(&self, _d: &Domain, _tid: ThreadId) -> SchedParam {
        SchedParam::Idle
    }
}
