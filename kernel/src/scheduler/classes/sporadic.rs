//! Sporadic server class
//!
//! A sporadic thread runs at its normal priority while it has execution
//! budget. Every activity interval it consumes is scheduled to come back
//! one replenishment period after the interval started. When the budget
//! runs out the thread drops to its low priority (or is held if the low
//! priority is -1) until a replenishment restores it.
//!
//! Sporadic threads live in the rt run-queue and are picked by the rt
//! class, competing with fixed-priority threads by current priority.

use super::rt::RtClass;
use crate::scheduler::core::domain::Domain;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::core::policy::{
    check_prio, set_effective_priority, ClassId, SchedClass, SchedParam, SporadicParam,
};
use crate::scheduler::realtime::priorities::{SPORADIC_MAX_PRIO, SPORADIC_MIN_PRIO, SPORADIC_WEIGHT};
use crate::scheduler::thread::{ThreadId, ThreadState};
use crate::time::timer::TimerKind;
use crate::time::{Ticks, Timeout, TimerId, TimerMode, TimerPrio};
use alloc::boxed::Box;

/// Replenishments a sporadic thread can have in flight
pub const SPORADIC_MAX_REPL: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
struct Replenishment {
    date: Ticks,
    amount: Ticks,
}

/// Per-thread sporadic server state
pub struct SporadicData {
    pub(crate) param: SporadicParam,
    pub(crate) budget: Ticks,
    /// Start of the current activity interval
    resume_date: Ticks,
    repl: [Replenishment; SPORADIC_MAX_REPL],
    repl_in: usize,
    repl_out: usize,
    repl_pending: usize,
    drop_timer: TimerId,
    repl_timer: TimerId,
}

impl SporadicData {
    fn new(param: SporadicParam, drop_timer: TimerId, repl_timer: TimerId) -> Self {
        Self {
            param,
            budget: param.init_budget,
            resume_date: 0,
            repl: [Replenishment::default(); SPORADIC_MAX_REPL],
            repl_in: 0,
            repl_out: 0,
            repl_pending: 0,
            drop_timer,
            repl_timer,
        }
    }

    fn reset(&mut self, param: SporadicParam) {
        self.param = param;
        self.budget = param.init_budget;
        self.repl_in = 0;
        self.repl_out = 0;
        self.repl_pending = 0;
    }

    pub fn budget(&self) -> Ticks {
        self.budget
    }

    pub fn pending_replenishments(&self) -> usize {
        self.repl_pending
    }
}

pub struct SporadicClass;

/// Start a new activity interval and arm the budget exhaustion timer
fn schedule_drop(d: &mut Domain, tid: ThreadId) {
    let now = d.now;
    let cpu = d.threads[tid].cpu;
    let Some(pss) = d.threads[tid].pss.as_deref_mut() else {
        return;
    };
    pss.resume_date = now;
    let (timer, budget) = (pss.drop_timer, pss.budget);
    d.timers.set_cpu(timer, cpu);
    // Budget is non-zero here, the date is never in the past.
    let _ = d.timers.start(timer, now.saturating_add(budget), None, TimerMode::Absolute);
}

/// Record `consumed` ticks of budget for return one period after the
/// current activity interval started. A full replenishment queue folds the
/// amount into the latest entry.
fn post_recharge(d: &mut Domain, tid: ThreadId, consumed: Ticks) {
    let now = d.now;
    let cpu = d.threads[tid].cpu;
    let Some(pss) = d.threads[tid].pss.as_deref_mut() else {
        return;
    };

    let amount = consumed.min(pss.budget);
    pss.budget -= amount;

    if pss.repl_pending >= pss.param.max_repl {
        let last = (pss.repl_in + SPORADIC_MAX_REPL - 1) % SPORADIC_MAX_REPL;
        pss.repl[last].amount = pss.repl[last].amount.saturating_add(amount);
        return;
    }

    let r = pss.repl_in;
    pss.repl[r] = Replenishment {
        date: pss.resume_date.saturating_add(pss.param.repl_period),
        amount,
    };
    pss.repl_in = (r + 1) % SPORADIC_MAX_REPL;
    pss.repl_pending += 1;
    if pss.repl_pending > 1 {
        return;
    }

    let (timer, date) = (pss.repl_timer, pss.repl[r].date);
    if date <= now {
        replenish_expired(d, tid);
    } else {
        d.timers.set_cpu(timer, cpu);
        let _ = d.timers.start(timer, date, None, TimerMode::Absolute);
    }
}

/// Budget exhausted while running
pub(crate) fn drop_expired(d: &mut Domain, tid: ThreadId) {
    let Some(remaining) = d.threads.get(tid).and_then(|t| t.pss.as_deref()).map(|p| p.budget) else {
        return;
    };
    post_recharge(d, tid, remaining);

    let t = &d.threads[tid];
    let Some(pss) = t.pss.as_deref() else {
        return;
    };
    let low = pss.param.low_prio;
    if pss.budget == 0 && t.cprio > low {
        if low < 0 {
            log::debug!("[SPORADIC] {} held until replenishment", tid);
            d.suspend(tid, ThreadState::HELD, Timeout::Infinite, None);
        } else {
            log::debug!("[SPORADIC] {} dropped to background prio {}", tid, low);
            d.apply_priority(tid, low);
        }
    }
}

/// Replenishment date reached
pub(crate) fn replenish_expired(d: &mut Domain, tid: ThreadId) {
    let now = d.now;
    let cpu = match d.threads.get(tid) {
        Some(t) if t.pss.is_some() => t.cpu,
        _ => return,
    };
    let Some(pss) = d.threads[tid].pss.as_deref_mut() else {
        return;
    };

    while pss.repl_pending > 0 {
        let r = pss.repl_out;
        if pss.repl[r].date > now {
            break;
        }
        pss.budget = pss.budget.saturating_add(pss.repl[r].amount).min(pss.param.init_budget);
        pss.repl_out = (r + 1) % SPORADIC_MAX_REPL;
        pss.repl_pending -= 1;
    }
    if pss.repl_pending > 0 {
        let (timer, date) = (pss.repl_timer, pss.repl[pss.repl_out].date);
        d.timers.set_cpu(timer, cpu);
        let _ = d.timers.start(timer, date, None, TimerMode::Absolute);
    }

    let Some(pss) = d.threads[tid].pss.as_deref() else {
        return;
    };
    if pss.budget == 0 {
        return;
    }
    let normal = pss.param.normal_prio;
    if d.threads[tid].state.contains(ThreadState::HELD) {
        d.resume(tid, ThreadState::HELD);
    } else if d.threads[tid].cprio < normal {
        log::debug!("[SPORADIC] {} back to foreground prio {}", tid, normal);
        d.apply_priority(tid, normal);
    }

    if d.is_current(tid) {
        schedule_drop(d, tid);
    }
}

impl SchedClass for SporadicClass {
    fn id(&self) -> ClassId {
        ClassId::Sporadic
    }

    fn name(&self) -> &'static str {
        "sporadic"
    }

    fn weight(&self) -> i32 {
        SPORADIC_WEIGHT
    }

    fn prio_range(&self) -> (i32, i32) {
        (SPORADIC_MIN_PRIO, SPORADIC_MAX_PRIO)
    }

    fn enqueue(&self, d: &mut Domain, tid: ThreadId) {
        RtClass::queue_tail(d, tid);
    }

    fn dequeue(&self, d: &mut Domain, tid: ThreadId) {
        RtClass::unqueue(d, tid);
    }

    fn requeue(&self, d: &mut Domain, tid: ThreadId) {
        RtClass::queue_head(d, tid);
    }

    fn migrate(&self, d: &mut Domain, tid: ThreadId, to: usize) {
        if let Some(pss) = d.threads[tid].pss.as_deref() {
            let (drop_timer, repl_timer) = (pss.drop_timer, pss.repl_timer);
            d.timers.set_cpu(drop_timer, to);
            d.timers.set_cpu(repl_timer, to);
        }
    }

    fn chkparam(&self, _d: &Domain, _cpu: usize, param: &SchedParam) -> SchedulerResult<()> {
        let SchedParam::Sporadic(p) = param else {
            return Err(SchedulerError::InvalidParam { reason: "not a sporadic parameter" });
        };
        if p.low_prio != -1 {
            check_prio(self, p.low_prio)?;
        }
        check_prio(self, p.normal_prio)?;
        if p.normal_prio <= p.low_prio {
            return Err(SchedulerError::InvalidParam { reason: "normal priority not above low priority" });
        }
        if p.init_budget == 0 {
            return Err(SchedulerError::InvalidParam { reason: "zero sporadic budget" });
        }
        if p.repl_period < p.init_budget {
            return Err(SchedulerError::InvalidParam { reason: "replenishment period shorter than budget" });
        }
        if p.max_repl == 0 || p.max_repl > SPORADIC_MAX_REPL {
            return Err(SchedulerError::InvalidParam { reason: "bad replenishment count" });
        }
        Ok(())
    }

    fn declare(&self, d: &mut Domain, tid: ThreadId, param: &SchedParam) {
        let SchedParam::Sporadic(p) = param else {
            return;
        };
        let cpu = d.threads[tid].cpu;
        let drop_timer = d.timers.create(TimerKind::SporadicDrop(tid), cpu, TimerPrio::Standard);
        let repl_timer = d.timers.create(TimerKind::SporadicReplenish(tid), cpu, TimerPrio::Standard);
        d.threads[tid].pss = Some(Box::new(SporadicData::new(*p, drop_timer, repl_timer)));
    }

    fn forget(&self, d: &mut Domain, tid: ThreadId) {
        if let Some(pss) = d.threads[tid].pss.take() {
            d.timers.destroy(pss.drop_timer);
            d.timers.destroy(pss.repl_timer);
        }
    }

    fn setparam(&self, d: &mut Domain, tid: ThreadId, param: &SchedParam) -> bool {
        let SchedParam::Sporadic(p) = param else {
            return false;
        };
        d.threads[tid].state.remove(ThreadState::WEAK);
        let effective = set_effective_priority(d, tid, p.normal_prio);

        let Some(pss) = d.threads[tid].pss.as_deref_mut() else {
            return effective;
        };
        pss.reset(*p);
        let drop_timer = pss.drop_timer;
        if effective && d.is_current(tid) {
            d.timers.stop(drop_timer);
            schedule_drop(d, tid);
        }
        effective
    }

    fn getparam(&self, d: &Domain, tid: ThreadId) -> SchedParam {
        let t = &d.threads[tid];
        match t.pss.as_deref() {
            Some(pss) => SchedParam::Sporadic(pss.param),
            None => SchedParam::Rt { prio: t.bprio },
        }
    }

    fn resume_activity(&self, d: &mut Domain, tid: ThreadId) {
        let has_budget = d.threads[tid].pss.as_deref().is_some_and(|p| p.budget > 0);
        if has_budget {
            schedule_drop(d, tid);
        }
    }

    fn suspend_activity(&self, d: &mut Domain, tid: ThreadId) {
        let now = d.now;
        let Some(pss) = d.threads[tid].pss.as_deref() else {
            return;
        };
        if pss.budget > 0 {
            let (timer, consumed) = (pss.drop_timer, now.saturating_sub(pss.resume_date));
            d.timers.stop(timer);
            post_recharge(d, tid, consumed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NucleusConfig;
    use crate::scheduler::core::affinity::CpuMask;

    fn param() -> SporadicParam {
        SporadicParam {
            low_prio: 2,
            normal_prio: 20,
            init_budget: 100,
            repl_period: 1_000,
            max_repl: 4,
        }
    }

    fn domain() -> Domain {
        Domain::new(NucleusConfig::new(1), CpuMask::first_n(1))
    }

    #[test]
    fn chkparam_rules() {
        let d = domain();
        let class = SporadicClass;
        assert!(class.chkparam(&d, 0, &SchedParam::Sporadic(param())).is_ok());

        let mut p = param();
        p.normal_prio = 2;
        assert!(class.chkparam(&d, 0, &SchedParam::Sporadic(p)).is_err());

        let mut p = param();
        p.init_budget = 0;
        assert!(class.chkparam(&d, 0, &SchedParam::Sporadic(p)).is_err());

        let mut p = param();
        p.repl_period = 50;
        assert!(class.chkparam(&d, 0, &SchedParam::Sporadic(p)).is_err());

        let mut p = param();
        p.max_repl = SPORADIC_MAX_REPL + 1;
        assert!(class.chkparam(&d, 0, &SchedParam::Sporadic(p)).is_err());

        let mut p = param();
        p.low_prio = -1;
        assert!(class.chkparam(&d, 0, &SchedParam::Sporadic(p)).is_ok());

        assert!(class.chkparam(&d, 0, &SchedParam::Rt { prio: 3 }).is_err());
    }
}
