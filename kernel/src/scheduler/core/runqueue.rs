//! Multi-level run-queue
//!
//! One FIFO per priority level plus a two-level occupancy bitmap, giving
//! O(1) insertion, removal and highest-priority lookup.
//!
//! # Index convention
//!
//! Levels are stored by *inverted* index: `index = MLQ_LEVELS - prio - 1`.
//! The highest priority therefore sits at the lowest index, and finding it
//! is a `trailing_zeros` on the summary word followed by one on the leaf
//! word. A lower bit index always means a higher priority.
//!
//! The FIFOs are intrusive and index-linked: every thread embeds a
//! [`RunLink`] and the queue only stores head and tail ids. Nothing here
//! allocates.

use crate::scheduler::realtime::priorities::MLQ_LEVELS;
use crate::scheduler::thread::ThreadId;

const BITS_PER_WORD: usize = 64;
const MLQ_WORDS: usize = (MLQ_LEVELS + BITS_PER_WORD - 1) / BITS_PER_WORD;

/// Run-queue linkage embedded in every thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunLink {
    prev: Option<ThreadId>,
    next: Option<ThreadId>,
    /// Inverted level index while linked
    index: Option<usize>,
}

impl RunLink {
    /// Is the owner linked to a run-queue?
    pub fn is_linked(&self) -> bool {
        self.index.is_some()
    }
}

/// Access to the [`RunLink`] of each thread
pub trait LinkTable {
    fn link(&self, id: ThreadId) -> &RunLink;
    fn link_mut(&mut self, id: ThreadId) -> &mut RunLink;
}

#[derive(Debug, Clone, Copy, Default)]
struct Fifo {
    head: Option<ThreadId>,
    tail: Option<ThreadId>,
}

/// Bitmap-indexed multi-level queue
pub struct MultiLevelQueue {
    fifos: [Fifo; MLQ_LEVELS],
    /// Bit `w` set iff `leaves[w] != 0`
    summary: u64,
    /// Bit `i` of the concatenated words set iff FIFO `i` is non-empty
    leaves: [u64; MLQ_WORDS],
    elems: usize,
}

#[inline]
fn index_of(prio: i32) -> usize {
    MLQ_LEVELS - prio as usize - 1
}

#[inline]
fn prio_of(index: usize) -> i32 {
    (MLQ_LEVELS - index - 1) as i32
}

impl MultiLevelQueue {
    pub fn new() -> Self {
        Self {
            fifos: [Fifo::default(); MLQ_LEVELS],
            summary: 0,
            leaves: [0; MLQ_WORDS],
            elems: 0,
        }
    }

    /// Number of queued threads
    pub fn len(&self) -> usize {
        self.elems
    }

    pub fn is_empty(&self) -> bool {
        self.elems == 0
    }

    fn mark(&mut self, index: usize) {
        let word = index / BITS_PER_WORD;
        self.leaves[word] |= 1 << (index % BITS_PER_WORD);
        self.summary |= 1 << word;
    }

    fn unmark(&mut self, index: usize) {
        let word = index / BITS_PER_WORD;
        self.leaves[word] &= !(1 << (index % BITS_PER_WORD));
        if self.leaves[word] == 0 {
            self.summary &= !(1 << word);
        }
    }

    fn first_index(&self) -> Option<usize> {
        if self.summary == 0 {
            return None;
        }
        let word = self.summary.trailing_zeros() as usize;
        let bit = self.leaves[word].trailing_zeros() as usize;
        Some(word * BITS_PER_WORD + bit)
    }

    /// Append `id` at the tail of level `prio`
    pub fn add_tail<L: LinkTable>(&mut self, links: &mut L, id: ThreadId, prio: i32) {
        crate::sched_assert!(
            prio >= 0 && (prio as usize) < MLQ_LEVELS,
            "run-queue priority out of range"
        );
        crate::sched_assert!(!links.link(id).is_linked(), "thread queued twice");

        let index = index_of(prio);
        let old_tail = self.fifos[index].tail;
        *links.link_mut(id) = RunLink {
            prev: old_tail,
            next: None,
            index: Some(index),
        };
        match old_tail {
            Some(tail) => links.link_mut(tail).next = Some(id),
            None => self.fifos[index].head = Some(id),
        }
        self.fifos[index].tail = Some(id);
        self.mark(index);
        self.elems += 1;
    }

    /// Insert `id` at the head of level `prio`
    pub fn add_head<L: LinkTable>(&mut self, links: &mut L, id: ThreadId, prio: i32) {
        crate::sched_assert!(
            prio >= 0 && (prio as usize) < MLQ_LEVELS,
            "run-queue priority out of range"
        );
        crate::sched_assert!(!links.link(id).is_linked(), "thread queued twice");

        let index = index_of(prio);
        let old_head = self.fifos[index].head;
        *links.link_mut(id) = RunLink {
            prev: None,
            next: old_head,
            index: Some(index),
        };
        match old_head {
            Some(head) => links.link_mut(head).prev = Some(id),
            None => self.fifos[index].tail = Some(id),
        }
        self.fifos[index].head = Some(id);
        self.mark(index);
        self.elems += 1;
    }

    /// Unlink `id`, wherever it sits. No-op if not linked.
    pub fn remove<L: LinkTable>(&mut self, links: &mut L, id: ThreadId) {
        let link = *links.link(id);
        let Some(index) = link.index else {
            return;
        };

        match link.prev {
            Some(prev) => links.link_mut(prev).next = link.next,
            None => self.fifos[index].head = link.next,
        }
        match link.next {
            Some(next) => links.link_mut(next).prev = link.prev,
            None => self.fifos[index].tail = link.prev,
        }
        *links.link_mut(id) = RunLink::default();

        if self.fifos[index].head.is_none() {
            self.unmark(index);
        }
        self.elems -= 1;
    }

    /// Remove and return the head of the highest non-empty level
    pub fn pick_highest<L: LinkTable>(&mut self, links: &mut L) -> Option<ThreadId> {
        let index = self.first_index()?;
        let id = self.fifos[index].head?;
        self.remove(links, id);
        Some(id)
    }

    /// Head of the highest non-empty level, left in place
    pub fn peek_highest(&self) -> Option<ThreadId> {
        self.first_index().and_then(|index| self.fifos[index].head)
    }

    /// Head of level `prio`, left in place
    pub fn peek(&self, prio: i32) -> Option<ThreadId> {
        if prio < 0 || prio as usize >= MLQ_LEVELS {
            return None;
        }
        self.fifos[index_of(prio)].head
    }

    /// Priority of the highest non-empty level
    pub fn highest_prio(&self) -> Option<i32> {
        self.first_index().map(prio_of)
    }

    /// Priority level `id` is linked at
    pub fn level_of<L: LinkTable>(links: &L, id: ThreadId) -> Option<i32> {
        links.link(id).index.map(prio_of)
    }

    /// Walk level `prio` from head to tail
    pub fn for_each_at<L: LinkTable>(&self, links: &L, prio: i32, mut f: impl FnMut(ThreadId)) {
        let mut cursor = self.peek(prio);
        while let Some(id) = cursor {
            f(id);
            cursor = links.link(id).next;
        }
    }

    /// Bitmap consistency: a bit is set iff its FIFO is non-empty
    pub fn check_consistency(&self) -> bool {
        let mut count_words = 0u64;
        for index in 0..MLQ_LEVELS {
            let word = index / BITS_PER_WORD;
            let bit = self.leaves[word] & (1 << (index % BITS_PER_WORD)) != 0;
            if bit != self.fifos[index].head.is_some() {
                return false;
            }
            if self.fifos[index].head.is_some() != self.fifos[index].tail.is_some() {
                return false;
            }
            if bit {
                count_words |= 1 << word;
            }
        }
        count_words == self.summary
    }
}

impl Default for MultiLevelQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use proptest::prelude::*;

    struct Links(Vec<RunLink>);

    impl LinkTable for Links {
        fn link(&self, id: ThreadId) -> &RunLink {
            &self.0[id.index()]
        }
        fn link_mut(&mut self, id: ThreadId) -> &mut RunLink {
            &mut self.0[id.index()]
        }
    }

    fn links(n: usize) -> Links {
        Links(alloc::vec![RunLink::default(); n])
    }

    fn tid(n: usize) -> ThreadId {
        ThreadId::from_index(n)
    }

    #[test]
    fn fifo_within_level() {
        let mut l = links(4);
        let mut q = MultiLevelQueue::new();
        q.add_tail(&mut l, tid(0), 10);
        q.add_tail(&mut l, tid(1), 10);
        q.add_head(&mut l, tid(2), 10);
        assert_eq!(q.len(), 3);
        assert_eq!(q.pick_highest(&mut l), Some(tid(2)));
        assert_eq!(q.pick_highest(&mut l), Some(tid(0)));
        assert_eq!(q.pick_highest(&mut l), Some(tid(1)));
        assert!(q.is_empty());
        assert!(q.check_consistency());
    }

    #[test]
    fn highest_level_wins() {
        let mut l = links(3);
        let mut q = MultiLevelQueue::new();
        q.add_tail(&mut l, tid(0), 0);
        q.add_tail(&mut l, tid(1), 257);
        q.add_tail(&mut l, tid(2), 64);
        assert_eq!(q.highest_prio(), Some(257));
        assert_eq!(q.peek_highest(), Some(tid(1)));
        assert_eq!(MultiLevelQueue::level_of(&l, tid(2)), Some(64));
        assert_eq!(q.pick_highest(&mut l), Some(tid(1)));
        assert_eq!(q.pick_highest(&mut l), Some(tid(2)));
        assert_eq!(q.pick_highest(&mut l), Some(tid(0)));
        assert_eq!(q.pick_highest(&mut l), None);
    }

    #[test]
    fn remove_from_middle() {
        let mut l = links(3);
        let mut q = MultiLevelQueue::new();
        for n in 0..3 {
            q.add_tail(&mut l, tid(n), 5);
        }
        q.remove(&mut l, tid(1));
        q.remove(&mut l, tid(1));
        assert_eq!(q.len(), 2);
        let mut seen = Vec::new();
        q.for_each_at(&l, 5, |id| seen.push(id));
        assert_eq!(seen, [tid(0), tid(2)]);
        assert!(!l.link(tid(1)).is_linked());
        assert!(q.check_consistency());
    }

    proptest! {
        #[test]
        fn bitmap_tracks_fifos(ops in proptest::collection::vec((0usize..32, 0i32..260, any::<bool>()), 1..200)) {
            let mut l = links(32);
            let mut q = MultiLevelQueue::new();
            let mut queued = alloc::vec![None::<i32>; 32];
            for (n, prio, head) in ops {
                if queued[n].is_some() {
                    q.remove(&mut l, tid(n));
                    queued[n] = None;
                } else {
                    if head {
                        q.add_head(&mut l, tid(n), prio);
                    } else {
                        q.add_tail(&mut l, tid(n), prio);
                    }
                    queued[n] = Some(prio);
                }
                prop_assert!(q.check_consistency());
                let expected = queued.iter().flatten().max().copied();
                prop_assert_eq!(q.highest_prio(), expected);
                prop_assert_eq!(q.len(), queued.iter().flatten().count());
            }
        }
    }
}
