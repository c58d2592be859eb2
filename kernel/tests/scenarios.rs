//! Scénarios d'ordonnancement de bout en bout
//!
//! Each test drives the nucleus through the public front end on a mock
//! pipeline and checks who holds the CPU after every step.

mod common;

use common::{current, nucleus, root, rt, spawn, tick_at};
use cobalt_nucleus::{
    ClassId, CpuMask, NucleusConfig, SchedParam, SchedulerError, SporadicParam, SynchFlags, ThreadAttr,
    Timeout, TimerMode,
};
use std::sync::{Arc, Mutex};

#[test]
fn highest_priority_runs_first() {
    let n = nucleus(NucleusConfig::new(1));
    let root = root(&n, 0);

    n.lock();
    let low = spawn(&n, "low", rt(10));
    let high = spawn(&n, "high", rt(20));
    assert_eq!(current(&n), root);

    n.unlock();
    assert_eq!(current(&n), high);

    n.sleep(Timeout::Infinite).unwrap();
    assert_eq!(current(&n), low);
}

#[test]
fn priority_inheritance_chain() {
    let n = nucleus(NucleusConfig::new(1));
    let mutex = n.synch_create(SynchFlags::PI | SynchFlags::OWNER, None).unwrap();

    let x = spawn(&n, "x", rt(5));
    assert_eq!(current(&n), x);
    assert_eq!(n.synch_acquire(mutex, Timeout::Infinite), Ok(true));

    let y = spawn(&n, "y", rt(50));
    assert_eq!(current(&n), y);
    assert_eq!(n.synch_acquire(mutex, Timeout::Infinite), Ok(false));

    // Y pends on X, which now runs at Y's priority.
    assert_eq!(current(&n), x);
    assert_eq!(n.with_thread(x, |t| t.current_priority()).unwrap(), 50);
    assert!(n.with_thread(x, |t| t.is_boosted()).unwrap());

    // A middle priority thread cannot preempt the boosted owner.
    let z = spawn(&n, "z", rt(20));
    assert_eq!(current(&n), x);

    assert_eq!(n.synch_release(mutex), Ok(Some(y)));
    assert_eq!(current(&n), y);
    assert_eq!(n.synch_owner(mutex), Ok(Some(y)));
    assert_eq!(n.wait_status(y), Ok(()));
    assert_eq!(n.with_thread(x, |t| t.current_priority()).unwrap(), 5);
    assert!(!n.with_thread(x, |t| t.is_boosted()).unwrap());

    n.sleep(Timeout::Infinite).unwrap();
    assert_eq!(current(&n), z);
}

#[test]
fn periodic_external_timer() {
    let n = nucleus(NucleusConfig::new(1));
    let dues = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&dues);
    let id = n
        .timer_create(0, Box::new(move |ev| sink.lock().unwrap().push(ev.due)))
        .unwrap();

    n.timer_start(id, 100, Some(100), TimerMode::Relative).unwrap();
    assert_eq!(n.pipeline().last_shot(0), Some(100));

    tick_at(&n, 105);
    assert_eq!(n.pipeline().last_shot(0), Some(200));
    tick_at(&n, 200);
    tick_at(&n, 300);

    assert_eq!(*dues.lock().unwrap(), [100, 200, 300]);
    assert_eq!(n.timer_info(id).unwrap().fired, 3);
}

#[test]
fn scheduler_lock_defers_preemption() {
    let n = nucleus(NucleusConfig::new(1));
    let t = spawn(&n, "t", rt(10));
    n.lock();
    n.lock();

    let u = spawn(&n, "u", rt(30));
    assert_eq!(current(&n), t);
    assert!(n.with_sched(0, |s| s.resched_pending()).unwrap());

    n.unlock();
    assert_eq!(current(&n), t);
    assert_eq!(n.with_thread(t, |t| t.lock_count()).unwrap(), 1);

    n.unlock();
    assert_eq!(current(&n), u);
}

#[test]
fn quota_group_throttles_and_refills() {
    let n = nucleus(NucleusConfig::new(1).with_quota_period(1_000));
    let root = root(&n, 0);
    let tgid = n.quota_create_group(0).unwrap();
    n.quota_set_limit(0, tgid, 50, 50).unwrap();

    let t = spawn(&n, "q", SchedParam::Quota { prio: 10, tgid });
    assert_eq!(current(&n), t);
    assert_eq!(n.quota_group_info(0, tgid).unwrap().nr_threads, 1);

    // Half of the period is spent: the group is throttled.
    tick_at(&n, 500);
    assert_eq!(current(&n), root);

    // New period, fresh budget.
    tick_at(&n, 1_000);
    assert_eq!(current(&n), t);
    assert_eq!(n.pipeline().last_shot(0), Some(1_500));
}

#[test]
fn sporadic_budget_drops_to_low_priority() {
    let n = nucleus(NucleusConfig::new(1));
    let r = spawn(&n, "r", rt(10));
    let param = SporadicParam {
        low_prio: 2,
        normal_prio: 20,
        init_budget: 100,
        repl_period: 1_000,
        max_repl: 4,
    };
    let s = spawn(&n, "s", SchedParam::Sporadic(param));
    assert_eq!(current(&n), s);

    tick_at(&n, 100);
    assert_eq!(n.with_thread(s, |t| t.current_priority()).unwrap(), 2);
    assert_eq!(current(&n), r);

    tick_at(&n, 1_000);
    assert_eq!(n.with_thread(s, |t| t.current_priority()).unwrap(), 20);
    assert_eq!(current(&n), s);
}

#[test]
fn watchdog_demotes_user_threads() {
    let n = nucleus(NucleusConfig::new(1).with_watchdog(Some(1_000)));
    let attr = ThreadAttr::new("u").user();
    let u = n.thread_create(&attr, rt(10)).unwrap();
    n.thread_start(u).unwrap();
    assert_eq!(current(&n), u);

    tick_at(&n, 1_000);
    assert_eq!(n.with_thread(u, |t| t.base_class()).unwrap(), ClassId::Weak);
    assert_eq!(current(&n), u);
}

#[test]
fn watchdog_cancels_kernel_threads() {
    let n = nucleus(NucleusConfig::new(1).with_watchdog(Some(1_000)));
    let root = root(&n, 0);
    let before = n.thread_count();
    let t = spawn(&n, "k", rt(10));
    assert_eq!(n.thread_count(), before + 1);

    tick_at(&n, 1_000);
    assert_eq!(current(&n), root);
    assert!(n.with_thread(t, |_| ()).is_err());
    assert_eq!(n.thread_count(), before);
}

#[test]
fn periodic_thread_reports_overruns() {
    let n = nucleus(NucleusConfig::new(1));
    let root = root(&n, 0);
    let t = spawn(&n, "p", rt(10));
    n.set_periodic(t, Timeout::Relative(100), Some(100)).unwrap();

    n.wait_period().unwrap();
    assert_eq!(current(&n), root);

    tick_at(&n, 100);
    assert_eq!(current(&n), t);
    assert_eq!(n.wait_status(t), Ok(()));

    // Running late: the release at 200 went by while the thread ran,
    // and so did the one at 300.
    n.pipeline().set_clock(350);
    n.clock_tick();
    assert_eq!(n.wait_period(), Err(SchedulerError::Overrun { count: 1 }));
    assert_eq!(current(&n), t);

    n.wait_period().unwrap();
    assert_eq!(current(&n), root);
    tick_at(&n, 400);
    assert_eq!(current(&n), t);
}

#[test]
fn cancelled_thread_exits_when_it_runs() {
    let n = nucleus(NucleusConfig::new(1));
    let root = root(&n, 0);
    let u = spawn(&n, "u", rt(5));
    n.sleep(Timeout::Infinite).unwrap();
    let t = spawn(&n, "t", rt(10));

    n.cancel(u).unwrap();
    assert!(n.with_thread(u, |t| !t.is_blocked()).unwrap());
    assert_eq!(n.wait_status(u), Err(SchedulerError::Interrupted));

    n.sleep(Timeout::Infinite).unwrap();
    let switches = n.pipeline().switches();
    assert_eq!(&switches[switches.len() - 2..], [(t, u), (u, root)]);
    assert!(n.with_thread(u, |_| ()).is_err());
}

#[test]
fn stale_id_misses_thread_reusing_its_slot() {
    let n = nucleus(NucleusConfig::new(1));
    let u = spawn(&n, "u", rt(5));
    n.cancel(u).unwrap();
    assert!(n.with_thread(u, |_| ()).is_err());

    let v = spawn(&n, "v", rt(5));
    assert_eq!(v.index(), u.index());
    assert_ne!(v, u);
    assert_eq!(n.cancel(u), Err(SchedulerError::ThreadNotFound { thread_id: u.index() }));
    assert_eq!(n.set_policy(u, rt(1)), Err(SchedulerError::ThreadNotFound { thread_id: u.index() }));
    assert_eq!(current(&n), v);
    assert_eq!(n.get_policy(v).unwrap(), rt(5));
}

#[test]
fn affinity_change_migrates_through_ipi() {
    let n = nucleus(NucleusConfig::new(2));
    let t = spawn(&n, "t", rt(10));
    assert_eq!(n.current(0).unwrap(), t);

    n.set_affinity(t, CpuMask::single(1)).unwrap();
    assert_eq!(n.pipeline().ipis(), [CpuMask::single(1)]);
    assert_eq!(n.current(0).unwrap(), root(&n, 0));

    n.pipeline().set_cpu(1);
    n.resched_ipi();
    assert_eq!(n.current(1).unwrap(), t);
    assert_eq!(n.with_thread(t, |t| t.cpu()).unwrap(), 1);
}

#[test]
fn host_tick_waits_for_root() {
    let n = nucleus(NucleusConfig::new(1));
    n.program_host_tick(1_000).unwrap();
    assert_eq!(n.pipeline().last_shot(0), Some(1_000));

    // The watchdog is the only timer a real-time thread needs.
    spawn(&n, "t", rt(10));
    assert_eq!(n.pipeline().last_shot(0), Some(4_000_000_000));

    n.sleep(Timeout::Infinite).unwrap();
    assert_eq!(n.pipeline().last_shot(0), Some(1_000));

    tick_at(&n, 1_000);
    assert_eq!(n.pipeline().host_ticks(), [0]);
}

#[test]
fn removed_object_wakes_sleepers() {
    let n = nucleus(NucleusConfig::new(1));
    let event = n.synch_create(SynchFlags::PRIO, None).unwrap();
    let t = spawn(&n, "t", rt(10));
    n.synch_sleep_on(event, Timeout::Infinite).unwrap();
    assert_eq!(current(&n), root(&n, 0));

    assert_eq!(n.synch_destroy(event), Ok(true));
    assert_eq!(current(&n), t);
    assert_eq!(n.wait_status(t), Err(SchedulerError::ObjectRemoved));
}

#[test]
fn nested_inheritance_keeps_remaining_boost() {
    let n = nucleus(NucleusConfig::new(1));
    let a = n.synch_create(SynchFlags::PI | SynchFlags::OWNER, None).unwrap();
    let b = n.synch_create(SynchFlags::PI | SynchFlags::OWNER, None).unwrap();

    let x = spawn(&n, "x", rt(5));
    assert_eq!(n.synch_acquire(a, Timeout::Infinite), Ok(true));
    assert_eq!(n.synch_acquire(b, Timeout::Infinite), Ok(true));

    let y = spawn(&n, "y", rt(30));
    assert_eq!(n.synch_acquire(a, Timeout::Infinite), Ok(false));
    assert_eq!(current(&n), x);
    assert_eq!(n.with_thread(x, |t| t.current_priority()).unwrap(), 30);

    let w = spawn(&n, "w", rt(50));
    assert_eq!(n.synch_acquire(b, Timeout::Infinite), Ok(false));
    assert_eq!(current(&n), x);
    assert_eq!(n.with_thread(x, |t| t.current_priority()).unwrap(), 50);

    // Giving up B leaves X boosted by the waiter on A.
    assert_eq!(n.synch_release(b), Ok(Some(w)));
    assert_eq!(current(&n), w);
    assert_eq!(n.with_thread(x, |t| t.current_priority()).unwrap(), 30);
    assert!(n.with_thread(x, |t| t.is_boosted()).unwrap());

    n.sleep(Timeout::Infinite).unwrap();
    assert_eq!(current(&n), x);
    assert_eq!(n.synch_release(a), Ok(Some(y)));
    assert_eq!(current(&n), y);
    assert_eq!(n.with_thread(x, |t| t.current_priority()).unwrap(), 5);
}

#[test]
fn sporadic_budget_at_clock_limit() {
    let n = nucleus(NucleusConfig::new(1));
    let root = root(&n, 0);
    n.pipeline().set_clock(10);
    let param = SporadicParam {
        low_prio: 2,
        normal_prio: 20,
        init_budget: u64::MAX,
        repl_period: u64::MAX,
        max_repl: 4,
    };
    let s = spawn(&n, "s", SchedParam::Sporadic(param));
    assert_eq!(current(&n), s);

    tick_at(&n, 1_000);
    assert_eq!(current(&n), s);
    assert_eq!(n.with_thread(s, |t| t.current_priority()).unwrap(), 20);

    n.sleep(Timeout::Infinite).unwrap();
    assert_eq!(current(&n), root);
}

#[test]
fn external_timer_period_at_clock_limit() {
    let n = nucleus(NucleusConfig::new(1));
    let id = n.timer_create(0, Box::new(|_| {})).unwrap();
    n.timer_start(id, 10, Some(u64::MAX), TimerMode::Absolute).unwrap();

    tick_at(&n, 10);
    let info = n.timer_info(id).unwrap();
    assert_eq!(info.fired, 1);
    assert!(!info.running);
}
