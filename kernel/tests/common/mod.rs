//! Pipeline simulé partagé par les tests d'intégration
//!
//! Deterministic: the clock and the calling CPU only change when a test
//! says so, and every platform request is recorded.

#![allow(dead_code)]

use cobalt_nucleus::{CpuMask, Nucleus, NucleusConfig, Pipeline, SchedParam, ThreadAttr, ThreadId, Ticks};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct Record {
    shots: Vec<(usize, Ticks)>,
    ipis: Vec<CpuMask>,
    switches: Vec<(ThreadId, ThreadId)>,
    host_ticks: Vec<usize>,
}

pub struct MockPipeline {
    cpu: AtomicUsize,
    clock: AtomicU64,
    online: CpuMask,
    record: Mutex<Record>,
}

impl MockPipeline {
    pub fn new(nr_cpus: usize) -> Self {
        Self {
            cpu: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            online: CpuMask::first_n(nr_cpus),
            record: Mutex::new(Record::default()),
        }
    }

    pub fn set_cpu(&self, cpu: usize) {
        self.cpu.store(cpu, Ordering::Relaxed);
    }

    pub fn set_clock(&self, now: Ticks) {
        self.clock.store(now, Ordering::Relaxed);
    }

    pub fn advance(&self, delta: Ticks) {
        self.clock.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn switches(&self) -> Vec<(ThreadId, ThreadId)> {
        self.record.lock().unwrap().switches.clone()
    }

    pub fn ipis(&self) -> Vec<CpuMask> {
        self.record.lock().unwrap().ipis.clone()
    }

    pub fn host_ticks(&self) -> Vec<usize> {
        self.record.lock().unwrap().host_ticks.clone()
    }

    pub fn last_shot(&self, cpu: usize) -> Option<Ticks> {
        let record = self.record.lock().unwrap();
        record.shots.iter().rev().find(|(c, _)| *c == cpu).map(|&(_, date)| date)
    }
}

impl Pipeline for MockPipeline {
    fn this_cpu(&self) -> usize {
        self.cpu.load(Ordering::Relaxed)
    }

    fn read_clock(&self) -> Ticks {
        self.clock.load(Ordering::Relaxed)
    }

    fn program_shot(&self, cpu: usize, date: Ticks) {
        self.record.lock().unwrap().shots.push((cpu, date));
    }

    fn send_resched_ipi(&self, cpus: CpuMask) {
        self.record.lock().unwrap().ipis.push(cpus);
    }

    fn switch_to(&self, prev: ThreadId, next: ThreadId, _leaving_inband: bool) -> bool {
        self.record.lock().unwrap().switches.push((prev, next));
        false
    }

    fn relay_host_tick(&self, cpu: usize) {
        self.record.lock().unwrap().host_ticks.push(cpu);
    }

    fn online_cpus(&self) -> CpuMask {
        self.online
    }
}

pub fn nucleus(config: NucleusConfig) -> Nucleus<MockPipeline> {
    let nr_cpus = config.nr_cpus;
    Nucleus::new(config, MockPipeline::new(nr_cpus)).expect("nucleus bring-up")
}

/// Create and start a thread
pub fn spawn(n: &Nucleus<MockPipeline>, name: &str, param: SchedParam) -> ThreadId {
    let tid = n.thread_create(&ThreadAttr::new(name), param).expect("thread create");
    n.thread_start(tid).expect("thread start");
    tid
}

pub fn rt(prio: i32) -> SchedParam {
    SchedParam::Rt { prio }
}

/// Move the clock to `date` and deliver the timer interrupt
pub fn tick_at(n: &Nucleus<MockPipeline>, date: Ticks) {
    n.pipeline().set_clock(date);
    n.clock_tick();
}

pub fn current(n: &Nucleus<MockPipeline>) -> ThreadId {
    let cpu = n.pipeline().this_cpu();
    n.current(cpu).expect("online cpu")
}

pub fn root(n: &Nucleus<MockPipeline>, cpu: usize) -> ThreadId {
    n.with_sched(cpu, |s| s.root()).expect("online cpu")
}
