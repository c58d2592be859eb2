//! Propriétés de l'ordonnanceur
//!
//! Randomized checks of the scheduling rules that must hold whatever the
//! thread mix: election order, scheduler locking, round-robin fairness,
//! periodic timer accuracy.

mod common;

use common::{current, nucleus, root, rt, spawn, tick_at, MockPipeline};
use cobalt_nucleus::{Nucleus, NucleusConfig, SchedParam, SynchFlags, ThreadId, Timeout, TimerMode};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

static_assertions::assert_impl_all!(Nucleus<MockPipeline>: Send, Sync);
static_assertions::assert_impl_all!(ThreadId: Copy, Eq, core::hash::Hash, core::fmt::Debug);

fn weighted(param: &SchedParam) -> i32 {
    match param {
        SchedParam::Weak { prio } => 1024 + prio,
        SchedParam::Rt { prio } => 4 * 1024 + prio,
        _ => unreachable!(),
    }
}

fn thread_mix() -> impl Strategy<Value = Vec<SchedParam>> {
    let param = prop_oneof![
        (0i32..=257).prop_map(|prio| SchedParam::Rt { prio }),
        (0i32..=99).prop_map(|prio| SchedParam::Weak { prio }),
    ];
    proptest::collection::vec(param, 1..12)
}

proptest! {
    /// Threads get the CPU by decreasing weighted priority, FIFO among
    /// equals, and the root thread runs once they are all blocked.
    #[test]
    fn election_follows_weighted_priority(params in thread_mix()) {
        let n = nucleus(NucleusConfig::new(1));
        let root = root(&n, 0);

        n.lock();
        let mut expected: Vec<(i32, ThreadId)> = params
            .iter()
            .enumerate()
            .map(|(i, p)| (weighted(p), spawn(&n, &format!("t{}", i), *p)))
            .collect();
        prop_assert_eq!(current(&n), root);
        n.unlock();

        expected.sort_by(|a, b| b.0.cmp(&a.0));
        for &(_, tid) in &expected {
            prop_assert_eq!(current(&n), tid);
            n.sleep(Timeout::Infinite).unwrap();
        }
        prop_assert_eq!(current(&n), root);
    }

    /// A thread holding the scheduler lock keeps the CPU whatever starts.
    #[test]
    fn locked_thread_keeps_the_cpu(prios in proptest::collection::vec(11i32..=257, 1..8)) {
        let n = nucleus(NucleusConfig::new(1));
        let t = spawn(&n, "holder", rt(10));
        n.lock();
        for (i, prio) in prios.iter().enumerate() {
            spawn(&n, &format!("t{}", i), rt(*prio));
            prop_assert_eq!(current(&n), t);
        }
        n.unlock();
        prop_assert_ne!(current(&n), t);
    }

    /// Threads of one priority level sharing a quantum take turns in the
    /// order they were started.
    #[test]
    fn round_robin_cycles_in_start_order(count in 2usize..6, quantum in 1u64..1_000) {
        let n = nucleus(NucleusConfig::new(1));
        n.lock();
        let tids: Vec<ThreadId> = (0..count).map(|i| spawn(&n, &format!("rr{}", i), rt(10))).collect();
        for &tid in &tids {
            n.set_slice(tid, Some(quantum)).unwrap();
        }
        n.unlock();

        for step in 0..(3 * count) {
            prop_assert_eq!(current(&n), tids[step % count]);
            n.pipeline().advance(quantum);
            n.clock_tick();
        }
    }

    /// Rescheduling requests with nothing to do switch nothing.
    #[test]
    fn spurious_ipis_are_harmless(prios in proptest::collection::vec(0i32..=257, 0..4), ipis in 1usize..10) {
        let n = nucleus(NucleusConfig::new(1));
        for (i, prio) in prios.iter().enumerate() {
            spawn(&n, &format!("t{}", i), rt(*prio));
        }
        let before = n.pipeline().switches();
        let curr = current(&n);
        for _ in 0..ipis {
            n.resched_ipi();
        }
        prop_assert_eq!(n.pipeline().switches(), before);
        prop_assert_eq!(current(&n), curr);
    }

    /// A periodic timer handled late, by less than a period, still reports
    /// the nominal release dates.
    #[test]
    fn periodic_timer_keeps_its_timeline(
        first in 1u64..10_000,
        interval in 1u64..10_000,
        lateness in proptest::collection::vec(0u64..1_000, 1..16),
    ) {
        let n = nucleus(NucleusConfig::new(1));
        let dues = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&dues);
        let id = n.timer_create(0, Box::new(move |ev| sink.lock().unwrap().push(ev.due))).unwrap();
        n.timer_start(id, first, Some(interval), TimerMode::Absolute).unwrap();

        for (k, late) in lateness.iter().enumerate() {
            let due = first + k as u64 * interval;
            tick_at(&n, due + late % interval);
        }

        let expected: Vec<u64> = (0..lateness.len() as u64).map(|k| first + k * interval).collect();
        prop_assert_eq!(&*dues.lock().unwrap(), &expected);
        prop_assert_eq!(n.timer_overruns(id).unwrap(), 0);
    }
}

#[test]
fn policy_change_while_boosted_is_deferred() {
    let n = nucleus(NucleusConfig::new(1));
    let mutex = n.synch_create(SynchFlags::PI | SynchFlags::OWNER, None).unwrap();
    let x = spawn(&n, "x", rt(5));
    n.synch_acquire(mutex, Timeout::Infinite).unwrap();
    let y = spawn(&n, "y", rt(50));
    n.synch_acquire(mutex, Timeout::Infinite).unwrap();
    assert_eq!(current(&n), x);

    n.set_policy(x, rt(1)).unwrap();
    assert_eq!(n.with_thread(x, |t| t.current_priority()).unwrap(), 50);
    assert_eq!(n.get_policy(x).unwrap(), rt(1));
    assert_eq!(current(&n), x);

    n.synch_release(mutex).unwrap();
    assert_eq!(current(&n), y);
    assert_eq!(n.with_thread(x, |t| t.current_priority()).unwrap(), 1);
}
