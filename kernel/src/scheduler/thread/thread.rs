//! Thread Control Block
//!
//! Scheduling view of a thread: its state bits, the class it belongs to,
//! its base/current/weighted priorities and the links the run-queues and
//! synchronization objects hang it by. Context switching itself belongs to
//! the pipeline; a TCB holds no register state.

use super::state::{Lifecycle, ThreadInfo, ThreadState};
use crate::scheduler::classes::sporadic::SporadicData;
use crate::scheduler::core::affinity::CpuMask;
use crate::scheduler::core::policy::ClassId;
use crate::scheduler::core::runqueue::{LinkTable, RunLink};
use crate::sync::SynchId;
use crate::time::{Ticks, TimerId};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::ops::{Index, IndexMut};

/// Thread ID type
///
/// A table slot plus the generation of that slot, so that an id kept past
/// the end of its thread never names the thread reusing the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId {
    index: usize,
    generation: u32,
}

impl ThreadId {
    pub(crate) const fn from_index(index: usize) -> Self {
        Self { index, generation: 0 }
    }

    pub fn index(self) -> usize {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "T{}", self.index)
        } else {
            write!(f, "T{}.{}", self.index, self.generation)
        }
    }
}

/// Creation attributes
#[derive(Debug, Clone)]
pub struct ThreadAttr {
    pub name: Box<str>,
    /// Backed by a user-space context
    pub user: bool,
    pub affinity: CpuMask,
}

impl ThreadAttr {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            user: false,
            affinity: CpuMask::all(),
        }
    }

    pub fn user(mut self) -> Self {
        self.user = true;
        self
    }

    pub fn affinity(mut self, mask: CpuMask) -> Self {
        self.affinity = mask;
        self
    }
}

/// Runtime statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadStats {
    /// Times switched in
    pub csw: u64,
    /// Ticks spent running
    pub exec_time: Ticks,
    /// Date of the last switch in
    pub last_switch_in: Ticks,
}

/// Periodic timeline
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PeriodState {
    /// Blocked in wait_period
    pub(crate) waiting: bool,
    /// Release points passed while not waiting
    pub(crate) releases: u64,
    /// Release points missed by the last wakeup
    pub(crate) missed: u64,
}

/// Thread Control Block (TCB)
pub struct Thread {
    id: ThreadId,
    name: Box<str>,

    pub(crate) state: ThreadState,
    pub(crate) info: ThreadInfo,

    /// Class chosen by the owner
    pub(crate) base_class: ClassId,
    /// Class actually scheduling the thread (differs while boosted)
    pub(crate) sched_class: ClassId,
    pub(crate) bprio: i32,
    pub(crate) cprio: i32,
    pub(crate) wprio: i32,

    pub(crate) lock_count: u32,
    pub(crate) affinity: CpuMask,
    /// CPU whose scheduler holds the thread
    pub(crate) cpu: usize,
    pub(crate) rrperiod: Option<Ticks>,

    pub(crate) rlink: RunLink,
    /// Resource/delay timeout
    pub(crate) rtimer: TimerId,
    /// Periodic release timer
    pub(crate) ptimer: TimerId,
    pub(crate) period: PeriodState,

    /// Synch the thread sleeps on
    pub(crate) wchan: Option<SynchId>,
    /// Owned synchs boosting this thread
    pub(crate) boosters: Vec<SynchId>,

    pub(crate) pss: Option<Box<SporadicData>>,
    pub(crate) quota_group: Option<u32>,
    /// Parked on the quota expired list
    pub(crate) quota_expired: bool,

    pub(crate) stats: ThreadStats,
}

impl Thread {
    pub(crate) fn new(
        id: ThreadId,
        attr: &ThreadAttr,
        cpu: usize,
        class: ClassId,
        rtimer: TimerId,
        ptimer: TimerId,
    ) -> Self {
        let mut state = ThreadState::DORMANT;
        if attr.user {
            state |= ThreadState::USER;
        }
        Self {
            id,
            name: attr.name.clone(),
            state,
            info: ThreadInfo::empty(),
            base_class: class,
            sched_class: class,
            bprio: 0,
            cprio: 0,
            wprio: 0,
            lock_count: 0,
            affinity: attr.affinity,
            cpu,
            rrperiod: None,
            rlink: RunLink::default(),
            rtimer,
            ptimer,
            period: PeriodState::default(),
            wchan: None,
            boosters: Vec::with_capacity(4),
            pss: None,
            quota_group: None,
            quota_expired: false,
            stats: ThreadStats::default(),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn info(&self) -> ThreadInfo {
        self.info
    }

    pub fn base_class(&self) -> ClassId {
        self.base_class
    }

    pub fn sched_class(&self) -> ClassId {
        self.sched_class
    }

    /// Priority requested by the owner
    pub fn base_priority(&self) -> i32 {
        self.bprio
    }

    /// Priority in effect, boost included
    pub fn current_priority(&self) -> i32 {
        self.cprio
    }

    /// Class weight plus current priority
    pub fn weighted_priority(&self) -> i32 {
        self.wprio
    }

    pub fn lock_count(&self) -> u32 {
        self.lock_count
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }

    pub fn affinity(&self) -> CpuMask {
        self.affinity
    }

    pub fn rr_quantum(&self) -> Option<Ticks> {
        self.rrperiod
    }

    pub fn wait_channel(&self) -> Option<SynchId> {
        self.wchan
    }

    pub fn quota_group(&self) -> Option<u32> {
        self.quota_group
    }

    pub fn stats(&self) -> ThreadStats {
        self.stats
    }

    pub fn is_root(&self) -> bool {
        self.state.contains(ThreadState::ROOT)
    }

    pub fn is_boosted(&self) -> bool {
        self.state.contains(ThreadState::BOOSTED)
    }

    pub fn is_blocked(&self) -> bool {
        self.state.intersects(ThreadState::BLOCK_BITS)
    }

    pub fn lifecycle(&self, is_current: bool) -> Lifecycle {
        Lifecycle::of(self.state, is_current)
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("info", &self.info)
            .field("class", &self.sched_class)
            .field("cprio", &self.cprio)
            .field("wprio", &self.wprio)
            .field("cpu", &self.cpu)
            .finish()
    }
}

/// Slab of every thread known to the nucleus, indexed by [`ThreadId`]
pub struct ThreadTable {
    slots: Vec<Option<Thread>>,
    /// Current generation of each slot, bumped when its thread is removed
    generations: Vec<u32>,
    free: Vec<usize>,
    live: usize,
}

impl ThreadTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            generations: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Id the next insertion will use
    pub(crate) fn next_id(&self) -> ThreadId {
        match self.free.last() {
            Some(&index) => ThreadId {
                index,
                generation: self.generations[index],
            },
            None => ThreadId::from_index(self.slots.len()),
        }
    }

    pub(crate) fn insert(&mut self, thread: Thread) -> ThreadId {
        let id = thread.id;
        crate::sched_assert!(id == self.next_id(), "thread id out of sequence", id);
        match self.free.pop() {
            Some(index) => self.slots[index] = Some(thread),
            None => {
                self.slots.push(Some(thread));
                self.generations.push(0);
            }
        }
        self.live += 1;
        id
    }

    pub(crate) fn remove(&mut self, id: ThreadId) -> Option<Thread> {
        if !self.contains(id) {
            return None;
        }
        let thread = self.slots[id.index].take()?;
        self.generations[id.index] = self.generations[id.index].wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(thread)
    }

    pub fn get(&self, id: ThreadId) -> Option<&Thread> {
        self.slots
            .get(id.index)
            .and_then(Option::as_ref)
            .filter(|t| t.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.slots
            .get_mut(id.index)
            .and_then(Option::as_mut)
            .filter(|t| t.id == id)
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.slots.iter().flatten()
    }

    /// Ids of the threads matching `pred`
    pub(crate) fn select(&self, mut pred: impl FnMut(&Thread) -> bool) -> Vec<ThreadId> {
        self.iter().filter(|t| pred(t)).map(Thread::id).collect()
    }
}

impl Default for ThreadTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<ThreadId> for ThreadTable {
    type Output = Thread;

    fn index(&self, id: ThreadId) -> &Thread {
        match self.get(id) {
            Some(thread) => thread,
            None => panic!("stale thread id {}", id),
        }
    }
}

impl IndexMut<ThreadId> for ThreadTable {
    fn index_mut(&mut self, id: ThreadId) -> &mut Thread {
        match self.get_mut(id) {
            Some(thread) => thread,
            None => panic!("stale thread id {}", id),
        }
    }
}

impl LinkTable for ThreadTable {
    fn link(&self, id: ThreadId) -> &RunLink {
        &self[id].rlink
    }

    fn link_mut(&mut self, id: ThreadId) -> &mut RunLink {
        &mut self[id].rlink
    }
}
