//! Deterministic pipeline for unit tests
//!
//! Time only moves when a test says so, the calling CPU is settable, and
//! every request the nucleus makes to the platform is recorded.

use crate::pipeline::Pipeline;
use crate::scheduler::core::affinity::CpuMask;
use crate::scheduler::thread::ThreadId;
use crate::time::Ticks;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;

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

    pub fn with_online(mut self, online: CpuMask) -> Self {
        self.online = online;
        self
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
        self.record.lock().switches.clone()
    }

    pub fn ipis(&self) -> Vec<CpuMask> {
        self.record.lock().ipis.clone()
    }

    pub fn host_ticks(&self) -> Vec<usize> {
        self.record.lock().host_ticks.clone()
    }

    /// Last date programmed on `cpu`
    pub fn last_shot(&self, cpu: usize) -> Option<Ticks> {
        let record = self.record.lock();
        record.shots.iter().rev().find(|(c, _)| *c == cpu).map(|&(_, date)| date)
    }

    pub fn clear(&self) {
        *self.record.lock() = Record::default();
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
        self.record.lock().shots.push((cpu, date));
    }

    fn send_resched_ipi(&self, cpus: CpuMask) {
        self.record.lock().ipis.push(cpus);
    }

    fn switch_to(&self, prev: ThreadId, next: ThreadId, _leaving_inband: bool) -> bool {
        self.record.lock().switches.push((prev, next));
        false
    }

    fn relay_host_tick(&self, cpu: usize) {
        self.record.lock().host_ticks.push(cpu);
    }

    fn online_cpus(&self) -> CpuMask {
        self.online
    }
}
