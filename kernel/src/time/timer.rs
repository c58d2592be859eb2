//! Nucleus timers
//!
//! Timers live in one table and are linked, when running, into the queue of
//! the CPU they are bound to. Each queue is kept sorted by (date, priority)
//! with FIFO order among equal keys, so the head is always the next timer
//! to fire. Links are indices into the table; starting or stopping a timer
//! never allocates.
//!
//! Periodic timers remember their start date and how many periods elapsed,
//! so the n-th firing is due at exactly `start + n * interval` whatever the
//! handling latency.

use super::Ticks;
use crate::scheduler::core::affinity::CpuMask;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::thread::ThreadId;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

/// Timer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(usize);

impl TimerId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Ordering among timers due at the same date, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerPrio {
    High,
    Standard,
    /// Host tick relay
    Low,
}

/// How a start value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Ticks from now on the monotonic clock
    Relative,
    /// Absolute monotonic date
    Absolute,
    /// Absolute realtime date, follows wall-clock adjustments
    Realtime,
}

/// Passed to external timer handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub timer: TimerId,
    pub cpu: usize,
    /// Nominal due date of this firing
    pub due: Ticks,
    /// Date the timer was actually handled
    pub now: Ticks,
    /// Periods skipped since the previous firing
    pub overruns: u64,
}

/// Handler of a timer owned outside the nucleus
pub type TimerHandler = Box<dyn FnMut(&TimerEvent) + Send>;

/// What a timer does when it fires
pub(crate) enum TimerKind {
    /// Round-robin slice end of the current thread
    RoundRobin,
    /// Relay of the in-band kernel tick
    HostTick,
    /// Real-time domain watchdog
    Watchdog,
    /// Resource or delay timeout of a thread
    ThreadTimeout(ThreadId),
    /// Release point of a periodic thread
    ThreadPeriod(ThreadId),
    /// Sporadic budget exhaustion
    SporadicDrop(ThreadId),
    /// Sporadic budget replenishment
    SporadicReplenish(ThreadId),
    /// Quota period refill
    QuotaRefill,
    /// Quota group budget exhaustion
    QuotaLimit,
    External(TimerHandler),
}

impl TimerKind {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::RoundRobin => "[rrb]",
            Self::HostTick => "[host-timer]",
            Self::Watchdog => "[watchdog]",
            Self::ThreadTimeout(_) => "[rtimer]",
            Self::ThreadPeriod(_) => "[ptimer]",
            Self::SporadicDrop(_) => "[sp-drop]",
            Self::SporadicReplenish(_) => "[sp-repl]",
            Self::QuotaRefill => "[quota-refill]",
            Self::QuotaLimit => "[quota-limit]",
            Self::External(_) => "[external]",
        }
    }
}

/// Internal timers dispatched by the nucleus itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiry {
    RoundRobin,
    HostTick,
    Watchdog,
    ThreadTimeout(ThreadId),
    ThreadPeriod(ThreadId, u64),
    SporadicDrop(ThreadId),
    SporadicReplenish(ThreadId),
    QuotaRefill,
    QuotaLimit,
    /// External handler already invoked
    Handled,
}

pub(crate) struct Timer {
    kind: TimerKind,
    cpu: usize,
    prio: TimerPrio,
    mode: TimerMode,
    running: bool,
    /// Absolute monotonic due date while running
    date: Ticks,
    start_date: Ticks,
    /// Zero for one-shot timers
    interval: Ticks,
    periodic_ticks: u64,
    /// Periods skipped, not yet collected
    overruns: u64,
    fired: u64,
    prev: Option<TimerId>,
    next: Option<TimerId>,
    queued: bool,
}

impl Timer {
    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn date(&self) -> Ticks {
        self.date
    }

    pub(crate) fn interval(&self) -> Ticks {
        self.interval
    }

    pub(crate) fn cpu(&self) -> usize {
        self.cpu
    }

    pub(crate) fn fired(&self) -> u64 {
        self.fired
    }

    fn key(&self) -> (Ticks, TimerPrio) {
        (self.date, self.prio)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct QueueEnds {
    head: Option<TimerId>,
    tail: Option<TimerId>,
    len: usize,
}

/// Every timer of the nucleus plus the per-CPU queues
pub(crate) struct TimerTable {
    slots: Vec<Option<Timer>>,
    free: Vec<usize>,
    queues: Vec<QueueEnds>,
    /// CPUs whose queue head may have changed since the last shot
    dirty: CpuMask,
}

impl TimerTable {
    pub(crate) fn new(nr_cpus: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            queues: alloc::vec![QueueEnds::default(); nr_cpus],
            dirty: CpuMask::empty(),
        }
    }

    pub(crate) fn create(&mut self, kind: TimerKind, cpu: usize, prio: TimerPrio) -> TimerId {
        let timer = Timer {
            kind,
            cpu,
            prio,
            mode: TimerMode::Relative,
            running: false,
            date: 0,
            start_date: 0,
            interval: 0,
            periodic_ticks: 0,
            overruns: 0,
            fired: 0,
            prev: None,
            next: None,
            queued: false,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(timer);
                TimerId(index)
            }
            None => {
                self.slots.push(Some(timer));
                TimerId(self.slots.len() - 1)
            }
        }
    }

    pub(crate) fn destroy(&mut self, id: TimerId) {
        if self.get(id).is_none() {
            return;
        }
        self.stop(id);
        self.slots[id.0] = None;
        self.free.push(id.0);
    }

    pub(crate) fn get(&self, id: TimerId) -> Option<&Timer> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    fn timer(&self, id: TimerId) -> &Timer {
        match self.get(id) {
            Some(timer) => timer,
            None => panic!("stale {}", id),
        }
    }

    fn timer_mut(&mut self, id: TimerId) -> &mut Timer {
        match self.slots.get_mut(id.0).and_then(Option::as_mut) {
            Some(timer) => timer,
            None => panic!("stale {}", id),
        }
    }

    pub(crate) fn check(&self, id: TimerId) -> SchedulerResult<&Timer> {
        self.get(id).ok_or(SchedulerError::TimerNotFound { timer_id: id.0 })
    }

    /// Same as `check`, hiding the timers the nucleus owns
    pub(crate) fn check_external(&self, id: TimerId) -> SchedulerResult<&Timer> {
        match self.get(id) {
            Some(t) if matches!(t.kind, TimerKind::External(_)) => Ok(t),
            _ => Err(SchedulerError::TimerNotFound { timer_id: id.0 }),
        }
    }

    fn enqueue(&mut self, id: TimerId) {
        let (cpu, key) = {
            let t = self.timer(id);
            (t.cpu, t.key())
        };

        // Walk back from the tail: new timers usually land late in the queue.
        let mut after = self.queues[cpu].tail;
        while let Some(cursor) = after {
            let t = self.timer(cursor);
            if t.key() <= key {
                break;
            }
            after = t.prev;
        }

        let before = match after {
            Some(a) => self.timer(a).next,
            None => self.queues[cpu].head,
        };
        {
            let t = self.timer_mut(id);
            t.prev = after;
            t.next = before;
            t.queued = true;
        }
        match after {
            Some(a) => self.timer_mut(a).next = Some(id),
            None => self.queues[cpu].head = Some(id),
        }
        match before {
            Some(b) => self.timer_mut(b).prev = Some(id),
            None => self.queues[cpu].tail = Some(id),
        }
        self.queues[cpu].len += 1;
        if self.queues[cpu].head == Some(id) {
            self.dirty.set(cpu);
        }
    }

    fn dequeue(&mut self, id: TimerId) {
        let (cpu, prev, next, queued) = {
            let t = self.timer(id);
            (t.cpu, t.prev, t.next, t.queued)
        };
        if !queued {
            return;
        }
        if prev.is_none() {
            self.dirty.set(cpu);
        }
        match prev {
            Some(p) => self.timer_mut(p).next = next,
            None => self.queues[cpu].head = next,
        }
        match next {
            Some(n) => self.timer_mut(n).prev = prev,
            None => self.queues[cpu].tail = prev,
        }
        let t = self.timer_mut(id);
        t.prev = None;
        t.next = None;
        t.queued = false;
        self.queues[cpu].len -= 1;
    }

    /// Arm `id` at absolute monotonic `date`
    pub(crate) fn start(
        &mut self,
        id: TimerId,
        date: Ticks,
        interval: Option<Ticks>,
        mode: TimerMode,
    ) -> SchedulerResult<()> {
        if interval == Some(0) {
            return Err(SchedulerError::InvalidInterval);
        }
        self.dequeue(id);
        {
            let t = self.timer_mut(id);
            t.mode = mode;
            t.date = date;
            t.start_date = date;
            t.interval = interval.unwrap_or(0);
            t.periodic_ticks = 0;
            t.overruns = 0;
            t.running = true;
        }
        self.enqueue(id);
        Ok(())
    }

    /// Disarm `id`; stopping a stopped timer does nothing
    pub(crate) fn stop(&mut self, id: TimerId) {
        self.dequeue(id);
        if let Some(t) = self.slots.get_mut(id.0).and_then(Option::as_mut) {
            t.running = false;
        }
    }

    pub(crate) fn is_running(&self, id: TimerId) -> bool {
        self.get(id).is_some_and(Timer::is_running)
    }

    /// Collect and reset the overrun count of `id`
    pub(crate) fn take_overruns(&mut self, id: TimerId) -> u64 {
        match self.slots.get_mut(id.0).and_then(Option::as_mut) {
            Some(t) => core::mem::take(&mut t.overruns),
            None => 0,
        }
    }

    /// Bind `id` to another CPU, keeping its date
    pub(crate) fn set_cpu(&mut self, id: TimerId, cpu: usize) {
        if self.timer(id).cpu == cpu {
            return;
        }
        let queued = self.timer(id).queued;
        self.dequeue(id);
        self.timer_mut(id).cpu = cpu;
        if queued {
            self.enqueue(id);
        }
    }

    pub(crate) fn head(&self, cpu: usize) -> Option<TimerId> {
        self.queues.get(cpu).and_then(|q| q.head)
    }

    /// First queued timer on `cpu` that is not the host tick relay
    pub(crate) fn head_excluding_host(&self, cpu: usize) -> Option<TimerId> {
        let mut cursor = self.head(cpu);
        while let Some(id) = cursor {
            let t = self.timer(id);
            if !matches!(t.kind, TimerKind::HostTick) {
                return Some(id);
            }
            cursor = t.next;
        }
        None
    }

    pub(crate) fn is_host_tick(&self, id: TimerId) -> bool {
        matches!(self.timer(id).kind, TimerKind::HostTick)
    }

    pub(crate) fn queued_on(&self, cpu: usize) -> usize {
        self.queues.get(cpu).map_or(0, |q| q.len)
    }

    /// Unlink the head of `cpu` if it is due at `now`
    pub(crate) fn pop_expired(&mut self, cpu: usize, now: Ticks) -> Option<TimerId> {
        let head = self.head(cpu)?;
        if self.timer(head).date > now {
            return None;
        }
        self.dequeue(head);
        Some(head)
    }

    /// Account one firing of an unlinked timer and run its handler if it is
    /// external. Returns the nominal due date and what the nucleus must do.
    pub(crate) fn fire(&mut self, id: TimerId, now: Ticks) -> (Ticks, Expiry) {
        let t = self.timer_mut(id);
        let due = t.date;
        t.fired += 1;
        if t.interval == 0 {
            t.running = false;
        }
        let overruns = t.overruns;
        let cpu = t.cpu;
        let expiry = match &mut t.kind {
            TimerKind::RoundRobin => Expiry::RoundRobin,
            TimerKind::HostTick => Expiry::HostTick,
            TimerKind::Watchdog => Expiry::Watchdog,
            TimerKind::ThreadTimeout(tid) => Expiry::ThreadTimeout(*tid),
            TimerKind::ThreadPeriod(tid) => Expiry::ThreadPeriod(*tid, overruns),
            TimerKind::SporadicDrop(tid) => Expiry::SporadicDrop(*tid),
            TimerKind::SporadicReplenish(tid) => Expiry::SporadicReplenish(*tid),
            TimerKind::QuotaRefill => Expiry::QuotaRefill,
            TimerKind::QuotaLimit => Expiry::QuotaLimit,
            TimerKind::External(handler) => {
                let event = TimerEvent { timer: id, cpu, due, now, overruns };
                handler(&event);
                Expiry::Handled
            }
        };
        if matches!(expiry, Expiry::ThreadPeriod(..)) {
            t.overruns = 0;
        }
        (due, expiry)
    }

    /// Requeue a periodic timer after it fired, unless its handler stopped
    /// or restarted it. The next date is the first period boundary strictly
    /// after `now`; skipped periods are added to the overrun count.
    pub(crate) fn reload(&mut self, id: TimerId, now: Ticks) {
        let Some(t) = self.slots.get_mut(id.0).and_then(Option::as_mut) else {
            return;
        };
        if !t.running || t.queued || t.interval == 0 {
            return;
        }
        let (start, interval) = (t.start_date, t.interval);
        let boundary = |ticks: u64| interval.checked_mul(ticks).and_then(|off| start.checked_add(off));
        let mut ticks = t.periodic_ticks + 1;
        let mut next = boundary(ticks);
        if let Some(date) = next.filter(|&date| date <= now) {
            let skipped = (now - date) / interval + 1;
            ticks += skipped;
            t.overruns += skipped;
            next = boundary(ticks);
        }
        let Some(next) = next else {
            // The next boundary is beyond the clock range.
            log::warn!("[TIMER] {} period out of range, stopped", id);
            t.running = false;
            return;
        };
        t.periodic_ticks = ticks;
        t.date = next;
        self.enqueue(id);
    }

    /// Move every running realtime timer after the wall clock moved by
    /// `delta` ticks.
    pub(crate) fn shift_realtime(&mut self, delta: i64) {
        if delta == 0 {
            return;
        }
        let ids: Vec<TimerId> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(n, slot)| match slot {
                Some(t) if t.running && t.mode == TimerMode::Realtime => Some(TimerId(n)),
                _ => None,
            })
            .collect();
        for id in ids {
            self.dequeue(id);
            let t = self.timer_mut(id);
            let shift = |date: Ticks| (date as i128 - delta as i128).max(0) as Ticks;
            t.date = shift(t.date);
            t.start_date = shift(t.start_date);
            self.enqueue(id);
        }
    }

    /// CPUs whose next shot must be recomputed
    pub(crate) fn take_dirty(&mut self) -> CpuMask {
        core::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self, cpu: usize) {
        self.dirty.set(cpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TimerTable {
        TimerTable::new(2)
    }

    fn order(t: &TimerTable, cpu: usize) -> Vec<TimerId> {
        let mut out = Vec::new();
        let mut cursor = t.head(cpu);
        while let Some(id) = cursor {
            out.push(id);
            cursor = t.timer(id).next;
        }
        out
    }

    #[test]
    fn queue_sorted_by_date_then_prio() {
        let mut t = table();
        let a = t.create(TimerKind::QuotaLimit, 0, TimerPrio::Standard);
        let b = t.create(TimerKind::HostTick, 0, TimerPrio::Low);
        let c = t.create(TimerKind::RoundRobin, 0, TimerPrio::High);
        let d = t.create(TimerKind::Watchdog, 0, TimerPrio::Standard);
        t.start(a, 100, None, TimerMode::Absolute).unwrap();
        t.start(b, 100, None, TimerMode::Absolute).unwrap();
        t.start(c, 100, None, TimerMode::Absolute).unwrap();
        t.start(d, 50, None, TimerMode::Absolute).unwrap();
        assert_eq!(order(&t, 0), [d, c, a, b]);
        assert_eq!(t.head_excluding_host(0), Some(d));
    }

    #[test]
    fn zero_interval_rejected_and_stop_idempotent() {
        let mut t = table();
        let a = t.create(TimerKind::QuotaRefill, 1, TimerPrio::Standard);
        assert_eq!(t.start(a, 10, Some(0), TimerMode::Absolute), Err(SchedulerError::InvalidInterval));
        assert!(!t.is_running(a));
        t.stop(a);
        t.stop(a);
        t.start(a, 10, None, TimerMode::Absolute).unwrap();
        assert_eq!(t.queued_on(1), 1);
        t.stop(a);
        t.stop(a);
        assert_eq!(t.queued_on(1), 0);
    }

    #[test]
    fn periodic_reload_has_no_drift() {
        let mut t = table();
        let p = t.create(TimerKind::QuotaRefill, 0, TimerPrio::Standard);
        t.start(p, 1_100, Some(100), TimerMode::Absolute).unwrap();

        assert_eq!(t.pop_expired(0, 1_105), Some(p));
        let (due, _) = t.fire(p, 1_105);
        assert_eq!(due, 1_100);
        t.reload(p, 1_105);
        assert_eq!(t.timer(p).date(), 1_200);

        // Handled 250 ticks late: two release points skipped.
        assert_eq!(t.pop_expired(0, 1_450), Some(p));
        t.fire(p, 1_450);
        t.reload(p, 1_450);
        assert_eq!(t.timer(p).date(), 1_500);
        assert_eq!(t.take_overruns(p), 2);
        assert_eq!(t.take_overruns(p), 0);
    }

    #[test]
    fn period_beyond_clock_range_stops_timer() {
        let mut t = table();
        let p = t.create(TimerKind::QuotaRefill, 0, TimerPrio::Standard);
        t.start(p, 10, Some(u64::MAX), TimerMode::Absolute).unwrap();

        assert_eq!(t.pop_expired(0, 10), Some(p));
        t.fire(p, 10);
        t.reload(p, 10);
        assert!(!t.is_running(p));
        assert_eq!(t.head(0), None);
    }

    #[test]
    fn external_handler_gets_event() {
        extern crate std;
        use std::sync::{Arc, Mutex};

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut t = table();
        let id = t.create(
            TimerKind::External(Box::new(move |ev: &TimerEvent| sink.lock().unwrap().push(ev.due))),
            0,
            TimerPrio::Standard,
        );
        t.start(id, 40, None, TimerMode::Absolute).unwrap();
        assert_eq!(t.pop_expired(0, 39), None);
        let id2 = t.pop_expired(0, 41).unwrap();
        assert_eq!(t.fire(id2, 41).1, Expiry::Handled);
        assert!(!t.is_running(id));
        assert_eq!(*seen.lock().unwrap(), [40]);
    }

    #[test]
    fn realtime_timers_shift() {
        let mut t = table();
        let rt = t.create(TimerKind::QuotaLimit, 0, TimerPrio::Standard);
        let mono = t.create(TimerKind::Watchdog, 0, TimerPrio::Standard);
        t.start(rt, 1_000, None, TimerMode::Realtime).unwrap();
        t.start(mono, 900, None, TimerMode::Absolute).unwrap();
        t.shift_realtime(200);
        assert_eq!(t.timer(rt).date(), 800);
        assert_eq!(t.timer(mono).date(), 900);
        assert_eq!(order(&t, 0), [rt, mono]);
    }

    #[test]
    fn migrate_keeps_date() {
        let mut t = table();
        let a = t.create(TimerKind::Watchdog, 0, TimerPrio::Standard);
        t.start(a, 70, None, TimerMode::Absolute).unwrap();
        t.take_dirty();
        t.set_cpu(a, 1);
        assert_eq!(t.head(0), None);
        assert_eq!(t.head(1), Some(a));
        assert_eq!(t.timer(a).date(), 70);
        let dirty = t.take_dirty();
        assert!(dirty.is_set(0) && dirty.is_set(1));
    }
}
