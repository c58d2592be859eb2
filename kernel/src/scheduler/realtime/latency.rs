//! Timer lateness tracking
//!
//! Each CPU records how late its timers fire relative to their due date,
//! in clock ticks.

use core::sync::atomic::{AtomicU64, Ordering};

/// Lateness tracker
pub struct LatencyTracker {
    /// Maximum observed lateness (ticks)
    max_late: AtomicU64,
    /// Total lateness (ticks)
    total_late: AtomicU64,
    /// Number of samples
    samples: AtomicU64,
}

impl LatencyTracker {
    pub const fn new() -> Self {
        Self {
            max_late: AtomicU64::new(0),
            total_late: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    /// Record one timer firing `late` ticks after its due date
    pub fn record(&self, late: u64) {
        self.total_late.fetch_add(late, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.max_late.fetch_max(late, Ordering::Relaxed);
    }

    /// Get maximum lateness
    pub fn max_latency(&self) -> u64 {
        self.max_late.load(Ordering::Relaxed)
    }

    /// Get average lateness
    pub fn average_latency(&self) -> u64 {
        let total = self.total_late.load(Ordering::Relaxed);
        let count = self.samples.load(Ordering::Relaxed);
        if count == 0 {
            0
        } else {
            total / count
        }
    }

    /// Number of samples recorded
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Reset statistics
    pub fn reset(&self) {
        self.max_late.store(0, Ordering::Relaxed);
        self.total_late.store(0, Ordering::Relaxed);
        self.samples.store(0, Ordering::Relaxed);
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_max_and_average() {
        let lat = LatencyTracker::new();
        lat.record(10);
        lat.record(30);
        assert_eq!(lat.max_latency(), 30);
        assert_eq!(lat.average_latency(), 20);
        lat.reset();
        assert_eq!(lat.samples(), 0);
    }
}
