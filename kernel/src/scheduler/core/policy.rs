//! Scheduling Classes - pluggable policies
//!
//! Every policy implements [`SchedClass`]. Classes are ordered by weight;
//! the scheduler asks each registered class in decreasing weight order for
//! a candidate and the first answer wins. A class that picks nothing falls
//! through to the next, down to the idle class which always returns the
//! CPU's root thread.
//!
//! Class hooks receive the whole scheduling [`Domain`] and reach the
//! run-queues, timers and threads through its fields.

use super::domain::Domain;
use super::error::{SchedulerError, SchedulerResult};
use crate::config::ClassSet;
use crate::scheduler::classes::{IdleClass, QuotaClass, RtClass, SporadicClass, WeakClass};
use crate::scheduler::realtime::priorities::in_range;
use crate::scheduler::thread::{ThreadId, ThreadState};
use crate::time::Ticks;
use alloc::vec::Vec;
use core::fmt;

/// Scheduling class identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClassId {
    Idle,
    Weak,
    Quota,
    Sporadic,
    Rt,
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(class_of(*self).name())
    }
}

/// Sporadic server parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SporadicParam {
    /// Background priority once the budget is exhausted, -1 to hold instead
    pub low_prio: i32,
    /// Foreground priority while budget remains
    pub normal_prio: i32,
    /// Execution budget per replenishment period
    pub init_budget: Ticks,
    pub repl_period: Ticks,
    /// Pending replenishments allowed
    pub max_repl: usize,
}

/// Per-class scheduling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedParam {
    /// Root threads only
    Idle,
    Weak { prio: i32 },
    Rt { prio: i32 },
    Sporadic(SporadicParam),
    Quota { prio: i32, tgid: u32 },
}

impl SchedParam {
    pub fn class(&self) -> ClassId {
        match self {
            Self::Idle => ClassId::Idle,
            Self::Weak { .. } => ClassId::Weak,
            Self::Rt { .. } => ClassId::Rt,
            Self::Sporadic(_) => ClassId::Sporadic,
            Self::Quota { .. } => ClassId::Quota,
        }
    }

    /// Priority the thread starts with under this parameter set
    pub fn prio(&self) -> i32 {
        match self {
            Self::Idle => crate::scheduler::realtime::priorities::IDLE_PRIO,
            Self::Weak { prio } | Self::Rt { prio } | Self::Quota { prio, .. } => *prio,
            Self::Sporadic(p) => p.normal_prio,
        }
    }
}

/// Scheduling class operations
pub trait SchedClass: Sync {
    fn id(&self) -> ClassId;

    fn name(&self) -> &'static str;

    /// Class weight; weighted priority = weight + current priority
    fn weight(&self) -> i32;

    /// Inclusive priority range
    fn prio_range(&self) -> (i32, i32);

    /// Link a runnable thread at the tail of its level
    fn enqueue(&self, d: &mut Domain, tid: ThreadId);

    /// Unlink a runnable thread
    fn dequeue(&self, d: &mut Domain, tid: ThreadId);

    /// Link a preempted thread at the head of its level
    fn requeue(&self, d: &mut Domain, tid: ThreadId);

    /// Remove and return this class's best candidate on `cpu`
    fn pick(&self, _d: &mut Domain, _cpu: usize) -> Option<ThreadId> {
        None
    }

    /// Round-robin slice end of the current thread
    fn tick(&self, _d: &mut Domain, _cpu: usize) {}

    /// Move the head of level `prio` to its tail; `None` rotates the
    /// current thread's level
    fn rotate(&self, _d: &mut Domain, _cpu: usize, _prio: Option<i32>) {}

    /// Thread leaves its CPU for `to`
    fn migrate(&self, _d: &mut Domain, _tid: ThreadId, _to: usize) {}

    fn chkparam(&self, _d: &Domain, _cpu: usize, param: &SchedParam) -> SchedulerResult<()> {
        check_prio(self, param.prio())
    }

    /// Thread joins the class
    fn declare(&self, _d: &mut Domain, _tid: ThreadId, _param: &SchedParam) {}

    /// Thread leaves the class
    fn forget(&self, _d: &mut Domain, _tid: ThreadId) {}

    /// Apply `param`; false when the change is deferred by an active boost
    fn setparam(&self, d: &mut Domain, tid: ThreadId, param: &SchedParam) -> bool;

    fn getparam(&self, d: &Domain, tid: ThreadId) -> SchedParam;

    /// Inherit `prio`, or fall back to the base priority on `None`
    fn trackprio(&self, d: &mut Domain, tid: ThreadId, prio: Option<i32>) {
        let t = &mut d.threads[tid];
        t.cprio = prio.unwrap_or(t.bprio);
    }

    /// Apply a ceiling priority
    fn protectprio(&self, d: &mut Domain, tid: ThreadId, prio: i32) {
        let (_, max) = self.prio_range();
        d.threads[tid].cprio = prio.min(max);
    }

    /// Thread switched in
    fn resume_activity(&self, _d: &mut Domain, _tid: ThreadId) {}

    /// Thread switched out
    fn suspend_activity(&self, _d: &mut Domain, _tid: ThreadId) {}

    /// Thread forced out of the real-time domain
    fn kick(&self, _d: &mut Domain, _tid: ThreadId) {}

    /// Whether round-robin slicing is meaningful for this class
    fn supports_round_robin(&self) -> bool {
        false
    }
}

/// Validate `prio` against the range of `class`
pub(crate) fn check_prio<C: SchedClass + ?Sized>(class: &C, prio: i32) -> SchedulerResult<()> {
    let (min, max) = class.prio_range();
    if in_range(prio, min, max) {
        Ok(())
    } else {
        Err(SchedulerError::InvalidPriority { value: prio, min, max })
    }
}

/// Static class instance for `id`
pub fn class_of(id: ClassId) -> &'static dyn SchedClass {
    match id {
        ClassId::Idle => &IdleClass,
        ClassId::Weak => &WeakClass,
        ClassId::Quota => &QuotaClass,
        ClassId::Sporadic => &SporadicClass,
        ClassId::Rt => &RtClass,
    }
}

/// Weighted priority of `prio` under `class`
pub fn weighted(class: ClassId, prio: i32) -> i32 {
    class_of(class).weight() + prio
}

/// Set the base priority and, unless that would lower a boosted thread,
/// the current one too. Returns whether the change took effect.
pub(crate) fn set_effective_priority(d: &mut Domain, tid: ThreadId, prio: i32) -> bool {
    let t = &mut d.threads[tid];
    let wprio = weighted(t.base_class, prio);

    t.bprio = prio;
    if wprio == t.wprio {
        return true;
    }
    // Lowering while boosted waits for the boost to end.
    if wprio < t.wprio && t.state.contains(ThreadState::BOOSTED) {
        return false;
    }
    t.cprio = prio;
    true
}

/// Registered classes, heaviest first
pub struct ClassTable {
    order: Vec<ClassId>,
    set: ClassSet,
}

impl ClassTable {
    pub fn new(set: ClassSet) -> Self {
        let mut order = alloc::vec![ClassId::Rt];
        if set.contains(ClassSet::SPORADIC) {
            order.push(ClassId::Sporadic);
        }
        if set.contains(ClassSet::QUOTA) {
            order.push(ClassId::Quota);
        }
        if set.contains(ClassSet::WEAK) {
            order.push(ClassId::Weak);
        }
        order.push(ClassId::Idle);

        for pair in order.windows(2) {
            let (a, b) = (class_of(pair[0]), class_of(pair[1]));
            assert!(
                a.weight() > b.weight(),
                "class weights must be strictly decreasing: {} <= {}",
                a.name(),
                b.name()
            );
        }
        for id in &order {
            log::info!("[SCHED] class {} registered, weight {}", id, class_of(*id).weight());
        }
        Self { order, set }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Class at rank `n`, 0 being the heaviest
    pub fn get(&self, n: usize) -> Option<ClassId> {
        self.order.get(n).copied()
    }

    pub fn is_registered(&self, id: ClassId) -> bool {
        match id {
            ClassId::Idle | ClassId::Rt => true,
            ClassId::Weak => self.set.contains(ClassSet::WEAK),
            ClassId::Sporadic => self.set.contains(ClassSet::SPORADIC),
            ClassId::Quota => self.set.contains(ClassSet::QUOTA),
        }
    }

    /// Reject classes this nucleus was built without
    pub fn check(&self, id: ClassId) -> SchedulerResult<&'static dyn SchedClass> {
        if self.is_registered(id) {
            Ok(class_of(id))
        } else {
            Err(SchedulerError::ClassNotAvailable { class: class_of(id).name() })
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.order.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heaviest_first() {
        let table = ClassTable::new(ClassSet::all());
        let order: Vec<ClassId> = table.iter().collect();
        assert_eq!(
            order,
            [ClassId::Rt, ClassId::Sporadic, ClassId::Quota, ClassId::Weak, ClassId::Idle]
        );
    }

    #[test]
    fn minimal_table() {
        let table = ClassTable::new(ClassSet::empty());
        assert_eq!(table.len(), 2);
        assert!(table.check(ClassId::Weak).is_err());
        assert!(table.check(ClassId::Rt).is_ok());
    }

    #[test]
    fn weighted_priorities_order_classes() {
        assert!(weighted(ClassId::Rt, 0) > weighted(ClassId::Sporadic, 257));
        assert!(weighted(ClassId::Weak, 99) < weighted(ClassId::Quota, 0));
        assert!(weighted(ClassId::Idle, -1) < weighted(ClassId::Weak, 0));
    }

    #[test]
    fn param_prio() {
        let sp = SporadicParam {
            low_prio: 2,
            normal_prio: 9,
            init_budget: 10,
            repl_period: 100,
            max_repl: 4,
        };
        assert_eq!(SchedParam::Sporadic(sp).prio(), 9);
        assert_eq!(SchedParam::Idle.prio(), -1);
        assert_eq!(SchedParam::Quota { prio: 3, tgid: 0 }.class(), ClassId::Quota);
    }
}
