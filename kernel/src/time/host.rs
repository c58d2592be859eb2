//! Host realtime snapshot
//!
//! The in-band kernel publishes its wall clock as a (cycles, ns, mult,
//! shift) tuple. Real-time readers convert a cycle count against that
//! tuple without ever taking a lock: a sequence counter detects torn
//! reads and the reader retries. There is a single writer.

use super::Ticks;
use core::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Lock-free wall-clock snapshot
pub struct HostRealtime {
    seq: AtomicU64,
    live: AtomicBool,
    base_cycles: AtomicU64,
    base_ns: AtomicU64,
    mult: AtomicU32,
    shift: AtomicU32,
}

impl HostRealtime {
    pub const fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            live: AtomicBool::new(false),
            base_cycles: AtomicU64::new(0),
            base_ns: AtomicU64::new(0),
            mult: AtomicU32::new(1),
            shift: AtomicU32::new(0),
        }
    }

    /// Publish a new snapshot (writer side)
    pub fn update(&self, base_cycles: Ticks, base_ns: u64, mult: u32, shift: u32) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.base_cycles.store(base_cycles, Ordering::Relaxed);
        self.base_ns.store(base_ns, Ordering::Relaxed);
        self.mult.store(mult, Ordering::Relaxed);
        self.shift.store(shift, Ordering::Relaxed);
        self.live.store(true, Ordering::Relaxed);

        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Wall clock in ns at `now_cycles`, `None` until the host published once
    pub fn read(&self, now_cycles: Ticks) -> Option<u64> {
        loop {
            let start = self.seq.load(Ordering::Acquire);
            if start & 1 != 0 {
                core::hint::spin_loop();
                continue;
            }

            let live = self.live.load(Ordering::Relaxed);
            let base_cycles = self.base_cycles.load(Ordering::Relaxed);
            let base_ns = self.base_ns.load(Ordering::Relaxed);
            let mult = self.mult.load(Ordering::Relaxed);
            let shift = self.shift.load(Ordering::Relaxed);

            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) != start {
                continue;
            }

            if !live {
                return None;
            }
            let elapsed = now_cycles.saturating_sub(base_cycles) as u128;
            let delta = (elapsed * mult as u128) >> shift;
            return Some(base_ns.saturating_add(delta as u64));
        }
    }
}

impl Default for HostRealtime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_until_published() {
        let host = HostRealtime::new();
        assert_eq!(host.read(100), None);
        host.update(100, 5_000, 2, 1);
        assert_eq!(host.read(100), Some(5_000));
        assert_eq!(host.read(110), Some(5_010));
    }

    #[test]
    fn concurrent_reader_sees_consistent_tuple() {
        extern crate std;
        use std::sync::Arc;

        let host = Arc::new(HostRealtime::new());
        host.update(0, 0, 1, 0);
        let writer = {
            let host = host.clone();
            std::thread::spawn(move || {
                for n in 1..2_000u64 {
                    // base_ns always equals base_cycles, so reads at any
                    // cycle count return that count.
                    host.update(n, n, 1, 0);
                }
            })
        };
        for _ in 0..2_000 {
            assert_eq!(host.read(5_000), Some(5_000));
        }
        writer.join().unwrap();
    }
}
