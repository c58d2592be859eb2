//! Synchronization objects
//!
//! A synch is a wait queue threads pend on, optionally owned. Owned synchs
//! (mutex-like) hand ownership over to their first waiter on release,
//! without letting a third thread steal it in between. Waiters queue in
//! FIFO order, or by weighted priority with [`SynchFlags::PRIO`].
//!
//! Two boost protocols guard owned synchs against priority inversion:
//!
//! - inheritance ([`SynchFlags::PI`]): while a waiter outranks the owner's
//!   base priority, the owner inherits the class and priority of the top
//!   waiter, transitively along chains of owners waiting on other synchs;
//! - ceiling ([`SynchFlags::PP`]): the owner runs in the rt class at the
//!   synch's ceiling priority for as long as it holds it.
//!
//! An owner keeps every synch currently boosting it in its booster list
//! and runs at the highest of those boosts.

use crate::scheduler::core::domain::Domain;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::core::policy::{check_prio, weighted, ClassId};
use crate::scheduler::classes::RtClass;
use crate::scheduler::thread::{ThreadId, ThreadInfo, ThreadState};
use crate::time::Timeout;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;
use core::ops::{Index, IndexMut};

bitflags! {
    /// Synch behavior
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SynchFlags: u32 {
        /// Waiters ordered by priority instead of arrival
        const PRIO  = 1 << 0;
        /// Priority inheritance
        const PI    = 1 << 1;
        /// Priority ceiling
        const PP    = 1 << 2;
        /// Ownership tracking
        const OWNER = 1 << 3;
    }
}

/// Synch handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SynchId(usize);

impl SynchId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SynchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

pub struct Synch {
    flags: SynchFlags,
    owner: Option<ThreadId>,
    waiters: Vec<ThreadId>,
    ceiling: i32,
    /// Weighted priority this synch boosts its owner to
    wprio: i32,
    /// Inheritance boost applied to the owner
    claimed: bool,
}

impl Synch {
    pub fn flags(&self) -> SynchFlags {
        self.flags
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    /// Waiters, first to be served first
    pub fn waiters(&self) -> &[ThreadId] {
        &self.waiters
    }

    pub fn ceiling(&self) -> i32 {
        self.ceiling
    }
}

impl fmt::Debug for Synch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synch")
            .field("flags", &self.flags)
            .field("owner", &self.owner)
            .field("waiters", &self.waiters)
            .finish()
    }
}

/// Every synch of the nucleus
pub struct SynchTable {
    slots: Vec<Option<Synch>>,
    free: Vec<usize>,
}

impl SynchTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, synch: Synch) -> SynchId {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(synch);
                SynchId(index)
            }
            None => {
                self.slots.push(Some(synch));
                SynchId(self.slots.len() - 1)
            }
        }
    }

    fn remove(&mut self, id: SynchId) -> Option<Synch> {
        let synch = self.slots.get_mut(id.0)?.take()?;
        self.free.push(id.0);
        Some(synch)
    }

    pub fn get(&self, id: SynchId) -> Option<&Synch> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub(crate) fn check(&self, id: SynchId) -> SchedulerResult<&Synch> {
        self.get(id).ok_or(SchedulerError::SynchNotFound { synch_id: id.0 })
    }

    /// Synchs owned by `tid`
    fn owned_by(&self, tid: ThreadId) -> Vec<SynchId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(n, slot)| match slot {
                Some(s) if s.owner == Some(tid) => Some(SynchId(n)),
                _ => None,
            })
            .collect()
    }
}

impl Default for SynchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<SynchId> for SynchTable {
    type Output = Synch;

    fn index(&self, id: SynchId) -> &Synch {
        match self.get(id) {
            Some(s) => s,
            None => panic!("stale synch {}", id),
        }
    }
}

impl IndexMut<SynchId> for SynchTable {
    fn index_mut(&mut self, id: SynchId) -> &mut Synch {
        match self.slots.get_mut(id.0).and_then(Option::as_mut) {
            Some(s) => s,
            None => panic!("stale synch {}", id),
        }
    }
}

impl Domain {
    pub(crate) fn synch_create(&mut self, flags: SynchFlags, ceiling: Option<i32>) -> SchedulerResult<SynchId> {
        let mut flags = flags;
        if flags.contains(SynchFlags::PI | SynchFlags::PP) {
            return Err(SchedulerError::InvalidParam { reason: "inheritance and ceiling are exclusive" });
        }
        if flags.intersects(SynchFlags::PI | SynchFlags::PP) && !flags.contains(SynchFlags::OWNER) {
            return Err(SchedulerError::InvalidParam { reason: "boost protocol without ownership" });
        }
        if flags.contains(SynchFlags::PI) {
            flags.insert(SynchFlags::PRIO);
        }
        let ceiling = match (flags.contains(SynchFlags::PP), ceiling) {
            (true, Some(prio)) => {
                check_prio(&RtClass, prio)?;
                prio
            }
            (true, None) => return Err(SchedulerError::InvalidParam { reason: "ceiling protocol needs a ceiling" }),
            (false, _) => 0,
        };
        let id = self.synchs.insert(Synch {
            flags,
            owner: None,
            waiters: Vec::with_capacity(4),
            ceiling,
            wprio: 0,
            claimed: false,
        });
        log::trace!("[SYNCH] {} created, {:?}", id, flags);
        Ok(id)
    }

    /// Delete `sid`, waking every waiter with REMOVED
    pub(crate) fn synch_destroy(&mut self, sid: SynchId) -> SchedulerResult<bool> {
        self.synchs.check(sid)?;
        let woke = self.synch_flush(sid, ThreadInfo::REMOVED)?;
        if let Some(owner) = self.synchs[sid].owner.take() {
            if self.threads[owner].boosters.contains(&sid) {
                self.drop_booster(sid, owner);
            }
        }
        self.synchs.remove(sid);
        Ok(woke)
    }

    fn insert_waiter(&mut self, sid: SynchId, tid: ThreadId) {
        let wprio = self.threads[tid].wprio;
        let threads = &self.threads;
        let s = &mut self.synchs[sid];
        let pos = if s.flags.contains(SynchFlags::PRIO) {
            // FIFO among equal priorities.
            s.waiters
                .iter()
                .position(|&other| threads[other].wprio < wprio)
                .unwrap_or(s.waiters.len())
        } else {
            s.waiters.len()
        };
        s.waiters.insert(pos, tid);
    }

    // ───────────────────────────────────────────────────────────────
    // Boost bookkeeping
    // ───────────────────────────────────────────────────────────────

    fn raise_boost(&mut self, sid: SynchId, owner: ThreadId) {
        let t = &mut self.threads[owner];
        if !t.boosters.contains(&sid) {
            t.boosters.push(sid);
        }
        t.state.insert(ThreadState::BOOSTED);
    }

    fn drop_booster(&mut self, sid: SynchId, owner: ThreadId) {
        self.threads[owner].boosters.retain(|&b| b != sid);
        self.adjust_boost(owner);
    }

    /// Bring `owner` to the highest boost of its booster list, or back to
    /// its base settings, then propagate along its own wait channel.
    pub(crate) fn adjust_boost(&mut self, owner: ThreadId) {
        let synchs = &self.synchs;
        let top = self.threads[owner]
            .boosters
            .iter()
            .copied()
            .max_by_key(|&sid| synchs[sid].wprio);

        match top {
            None => {
                self.threads[owner].state.remove(ThreadState::BOOSTED);
                self.track_policy(owner, None);
            }
            Some(sid) => {
                let s = &self.synchs[sid];
                let base = self.base_wprio(owner);
                if s.wprio <= base {
                    if self.threads[owner].wprio != base {
                        self.track_policy(owner, None);
                    }
                } else if s.wprio == self.threads[owner].wprio {
                    return;
                } else if s.flags.contains(SynchFlags::PP) {
                    let ceiling = s.ceiling;
                    self.protect_priority(owner, ceiling);
                } else {
                    let target = s.waiters.first().copied();
                    self.track_policy(owner, target);
                }
            }
        }

        if self.threads[owner].wchan.is_some() {
            self.requeue_sleeper(owner);
        }
    }

    /// Re-evaluate the inheritance boost `sid` applies to its owner after
    /// its waiter list changed.
    fn refresh_claim(&mut self, sid: SynchId) {
        let s = &self.synchs[sid];
        if !s.flags.contains(SynchFlags::PI) {
            return;
        }
        let Some(owner) = s.owner else {
            return;
        };
        let top = s.waiters.first().map(|&t| self.threads[t].wprio);
        match top {
            Some(wprio) if wprio > self.base_wprio(owner) => {
                let s = &mut self.synchs[sid];
                s.wprio = wprio;
                s.claimed = true;
                self.raise_boost(sid, owner);
                self.adjust_boost(owner);
            }
            _ => {
                let s = &mut self.synchs[sid];
                if s.claimed {
                    s.claimed = false;
                    self.drop_booster(sid, owner);
                }
            }
        }
    }

    /// Apply the ceiling of `sid` to its new owner
    fn ceiling_owner(&mut self, sid: SynchId, owner: ThreadId) {
        let s = &mut self.synchs[sid];
        s.wprio = weighted(ClassId::Rt, s.ceiling);
        self.raise_boost(sid, owner);
        self.adjust_boost(owner);
    }

    /// Commit ceiling changes made to synchs `tid` holds
    pub(crate) fn commit_ceiling(&mut self, tid: ThreadId) {
        self.threads[tid].info.remove(ThreadInfo::CEILING_PENDING);
        for n in 0..self.threads[tid].boosters.len() {
            let sid = self.threads[tid].boosters[n];
            let s = &mut self.synchs[sid];
            if s.flags.contains(SynchFlags::PP) {
                s.wprio = weighted(ClassId::Rt, s.ceiling);
            }
        }
        self.adjust_boost(tid);
    }

    /// Change the ceiling of `sid`. A kernel owner is re-boosted at once;
    /// a user owner picks the change up at its next rescheduling point.
    pub(crate) fn synch_set_ceiling(&mut self, sid: SynchId, prio: i32) -> SchedulerResult<()> {
        let s = self.synchs.check(sid)?;
        if !s.flags.contains(SynchFlags::PP) {
            return Err(SchedulerError::InvalidParam { reason: "no ceiling protocol" });
        }
        check_prio(&RtClass, prio)?;
        let owner = s.owner;
        self.synchs[sid].ceiling = prio;

        if let Some(owner) = owner {
            if self.threads[owner].state.contains(ThreadState::USER) {
                self.threads[owner].info.insert(ThreadInfo::CEILING_PENDING);
                let cpu = self.threads[owner].cpu;
                self.set_resched(cpu);
            } else {
                self.commit_ceiling(owner);
            }
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────
    // Waiting
    // ───────────────────────────────────────────────────────────────

    /// Stop `tid` waiting on its wait channel, updating the inheritance
    /// chain it may have been part of.
    pub(crate) fn forget_sleeper(&mut self, tid: ThreadId) {
        let t = &mut self.threads[tid];
        t.state.remove(ThreadState::PENDING);
        let Some(sid) = t.wchan.take() else {
            return;
        };
        let Some(s) = self.synchs.get(sid) else {
            return;
        };
        if s.waiters.contains(&tid) {
            self.synchs[sid].waiters.retain(|&w| w != tid);
        }
        self.refresh_claim(sid);
    }

    /// Move `tid` to its new rank in its wait channel after a priority
    /// change, propagating the change to the owner.
    pub(crate) fn requeue_sleeper(&mut self, tid: ThreadId) {
        let Some(sid) = self.threads[tid].wchan else {
            return;
        };
        if !self.synchs[sid].flags.contains(SynchFlags::PRIO) {
            return;
        }
        self.synchs[sid].waiters.retain(|&w| w != tid);
        self.insert_waiter(sid, tid);
        self.refresh_claim(sid);
    }

    /// Pend `tid` on the ownerless synch `sid`
    pub(crate) fn synch_sleep_on(&mut self, tid: ThreadId, sid: SynchId, timeout: Timeout) -> SchedulerResult<()> {
        if self.synchs.check(sid)?.flags.contains(SynchFlags::OWNER) {
            return Err(SchedulerError::InvalidParam { reason: "sleep on an owned synch" });
        }
        self.insert_waiter(sid, tid);
        self.suspend(tid, ThreadState::PENDING, timeout, Some(sid));
        Ok(())
    }

    /// Wake the first waiter of the ownerless synch `sid`
    pub(crate) fn synch_wakeup_one(&mut self, sid: SynchId) -> SchedulerResult<Option<ThreadId>> {
        let s = self.synchs.check(sid)?;
        if s.flags.contains(SynchFlags::OWNER) {
            return Err(SchedulerError::InvalidParam { reason: "wakeup on an owned synch" });
        }
        if s.waiters.is_empty() {
            return Ok(None);
        }
        let tid = self.synchs[sid].waiters.remove(0);
        self.threads[tid].wchan = None;
        self.resume(tid, ThreadState::PENDING);
        Ok(Some(tid))
    }

    /// Wake a given waiter of the ownerless synch `sid`
    pub(crate) fn synch_wakeup_this(&mut self, sid: SynchId, tid: ThreadId) -> SchedulerResult<()> {
        let s = self.synchs.check(sid)?;
        if s.flags.contains(SynchFlags::OWNER) {
            return Err(SchedulerError::InvalidParam { reason: "wakeup on an owned synch" });
        }
        if !s.waiters.contains(&tid) {
            return Err(SchedulerError::InvalidParam { reason: "thread not waiting on this synch" });
        }
        self.synchs[sid].waiters.retain(|&w| w != tid);
        self.threads[tid].wchan = None;
        self.resume(tid, ThreadState::PENDING);
        Ok(())
    }

    /// Wake every waiter of `sid` with `reason` raised. Returns whether
    /// anybody was waiting.
    pub(crate) fn synch_flush(&mut self, sid: SynchId, reason: ThreadInfo) -> SchedulerResult<bool> {
        self.synchs.check(sid)?;
        let waiters = core::mem::take(&mut self.synchs[sid].waiters);
        let woke = !waiters.is_empty();
        for tid in waiters {
            let t = &mut self.threads[tid];
            t.info.insert(reason);
            t.wchan = None;
            self.resume(tid, ThreadState::PENDING);
        }
        let s = &mut self.synchs[sid];
        if s.claimed {
            s.claimed = false;
            if let Some(owner) = s.owner {
                self.drop_booster(sid, owner);
            }
        }
        Ok(woke)
    }

    // ───────────────────────────────────────────────────────────────
    // Ownership
    // ───────────────────────────────────────────────────────────────

    /// Acquire the owned synch `sid` for `tid`. Returns true when granted
    /// at once, false when `tid` now pends on it; ownership is then handed
    /// over by the releasing thread, or the wait ends with a status.
    pub(crate) fn synch_acquire(&mut self, tid: ThreadId, sid: SynchId, timeout: Timeout) -> SchedulerResult<bool> {
        let s = self.synchs.check(sid)?;
        if !s.flags.contains(SynchFlags::OWNER) {
            return Err(SchedulerError::InvalidParam { reason: "acquire on an ownerless synch" });
        }
        let (flags, ceiling, owner) = (s.flags, s.ceiling, s.owner);
        if flags.contains(SynchFlags::PP) && self.base_wprio(tid) > weighted(ClassId::Rt, ceiling) {
            return Err(SchedulerError::InvalidParam { reason: "priority above ceiling" });
        }

        match owner {
            None => {
                self.synchs[sid].owner = Some(tid);
                if flags.contains(SynchFlags::PP) {
                    self.ceiling_owner(sid, tid);
                }
                Ok(true)
            }
            Some(owner) if owner == tid => Err(SchedulerError::Deadlock {
                thread_id: tid.index(),
                synch_id: sid.index(),
            }),
            Some(_) => {
                self.insert_waiter(sid, tid);
                self.refresh_claim(sid);
                self.suspend(tid, ThreadState::PENDING, timeout, Some(sid));
                Ok(false)
            }
        }
    }

    /// Release `sid` held by `tid`, handing it to the first waiter.
    /// Returns the new owner, if any.
    pub(crate) fn synch_release(&mut self, tid: ThreadId, sid: SynchId) -> SchedulerResult<Option<ThreadId>> {
        let s = self.synchs.check(sid)?;
        if s.owner != Some(tid) {
            return Err(SchedulerError::NotOwner {
                thread_id: tid.index(),
                synch_id: sid.index(),
            });
        }
        let flags = s.flags;

        let s = &mut self.synchs[sid];
        s.claimed = false;
        let next = if s.waiters.is_empty() {
            None
        } else {
            Some(s.waiters.remove(0))
        };
        s.owner = next;
        if self.threads[tid].boosters.contains(&sid) {
            self.drop_booster(sid, tid);
        }

        let Some(next) = next else {
            return Ok(None);
        };
        let t = &mut self.threads[next];
        t.wchan = None;
        t.info.insert(ThreadInfo::WOKEN);
        self.resume(next, ThreadState::PENDING);

        if flags.contains(SynchFlags::PP) {
            self.ceiling_owner(sid, next);
        }
        self.refresh_claim(sid);
        log::trace!("[SYNCH] {} handed over {} -> {}", sid, tid, next);
        Ok(Some(next))
    }

    /// Release everything `tid` owns
    pub(crate) fn release_all_ownerships(&mut self, tid: ThreadId) {
        for sid in self.synchs.owned_by(tid) {
            if let Err(err) = self.synch_release(tid, sid) {
                log::error!("[SYNCH] {} cannot release {}: {}", tid, sid, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NucleusConfig;
    use crate::scheduler::core::affinity::CpuMask;
    use crate::scheduler::core::policy::SchedParam;
    use crate::scheduler::thread::ThreadAttr;

    fn domain() -> Domain {
        Domain::new(NucleusConfig::new(1), CpuMask::first_n(1))
    }

    fn rt_thread(d: &mut Domain, name: &str, prio: i32) -> ThreadId {
        let tid = d.thread_init(&ThreadAttr::new(name), SchedParam::Rt { prio }).unwrap();
        d.start(tid).unwrap();
        tid
    }

    #[test]
    fn create_rules() {
        let mut d = domain();
        assert!(d.synch_create(SynchFlags::PI | SynchFlags::PP | SynchFlags::OWNER, Some(3)).is_err());
        assert!(d.synch_create(SynchFlags::PI, None).is_err());
        assert!(d.synch_create(SynchFlags::PP | SynchFlags::OWNER, None).is_err());
        assert!(d.synch_create(SynchFlags::PP | SynchFlags::OWNER, Some(300)).is_err());
        let pi = d.synch_create(SynchFlags::PI | SynchFlags::OWNER, None).unwrap();
        assert!(d.synchs[pi].flags().contains(SynchFlags::PRIO));
    }

    #[test]
    fn priority_waiters_fifo_among_equals() {
        let mut d = domain();
        let sid = d.synch_create(SynchFlags::PRIO, None).unwrap();
        let a = rt_thread(&mut d, "a", 10);
        let b = rt_thread(&mut d, "b", 30);
        let c = rt_thread(&mut d, "c", 10);
        for tid in [a, b, c] {
            d.synch_sleep_on(tid, sid, Timeout::Infinite).unwrap();
        }
        assert_eq!(d.synchs[sid].waiters(), [b, a, c]);
        assert_eq!(d.synch_wakeup_one(sid).unwrap(), Some(b));
        assert!(d.threads[b].state.contains(ThreadState::READY));
        assert_eq!(d.threads[b].wchan, None);
    }

    #[test]
    fn inheritance_follows_top_waiter() {
        let mut d = domain();
        let sid = d.synch_create(SynchFlags::PI | SynchFlags::OWNER, None).unwrap();
        let low = rt_thread(&mut d, "low", 5);
        let high = rt_thread(&mut d, "high", 50);

        assert!(d.synch_acquire(low, sid, Timeout::Infinite).unwrap());
        assert!(!d.synch_acquire(high, sid, Timeout::Infinite).unwrap());
        assert_eq!(d.threads[low].cprio, 50);
        assert!(d.threads[low].is_boosted());

        assert_eq!(d.synch_release(low, sid).unwrap(), Some(high));
        assert_eq!(d.threads[low].cprio, 5);
        assert!(!d.threads[low].is_boosted());
        assert_eq!(d.synchs[sid].owner(), Some(high));
        assert!(d.threads[high].info.contains(ThreadInfo::WOKEN));
    }

    #[test]
    fn ceiling_applies_while_held() {
        let mut d = domain();
        let sid = d.synch_create(SynchFlags::PP | SynchFlags::OWNER, Some(80)).unwrap();
        let tid = rt_thread(&mut d, "t", 10);
        d.synch_acquire(tid, sid, Timeout::Infinite).unwrap();
        assert_eq!(d.threads[tid].cprio, 80);
        d.synch_set_ceiling(sid, 90).unwrap();
        assert_eq!(d.threads[tid].cprio, 90);
        d.synch_release(tid, sid).unwrap();
        assert_eq!(d.threads[tid].cprio, 10);
        assert_eq!(d.threads[tid].sched_class, ClassId::Rt);
    }

    #[test]
    fn release_by_non_owner_and_recursion() {
        let mut d = domain();
        let sid = d.synch_create(SynchFlags::OWNER, None).unwrap();
        let a = rt_thread(&mut d, "a", 1);
        let b = rt_thread(&mut d, "b", 1);
        d.synch_acquire(a, sid, Timeout::Infinite).unwrap();
        assert!(matches!(d.synch_acquire(a, sid, Timeout::Infinite), Err(SchedulerError::Deadlock { .. })));
        assert!(matches!(d.synch_release(b, sid), Err(SchedulerError::NotOwner { .. })));
    }

    #[test]
    fn destroy_wakes_with_removed() {
        let mut d = domain();
        let sid = d.synch_create(SynchFlags::empty(), None).unwrap();
        let a = rt_thread(&mut d, "a", 1);
        d.synch_sleep_on(a, sid, Timeout::Infinite).unwrap();
        assert!(d.synch_destroy(sid).unwrap());
        assert!(d.threads[a].info.contains(ThreadInfo::REMOVED));
        assert_eq!(d.wait_status(a), Err(SchedulerError::ObjectRemoved));
        assert!(d.synchs.get(sid).is_none());
    }
}
