//! Affinity - CPU sets
//!
//! Controls which CPUs a thread can run on, and which CPUs must be sent a
//! rescheduling IPI.

use core::fmt;

/// Highest number of CPUs a mask can describe
pub const MAX_CPUS: usize = 64;

/// CPU mask (64 CPUs max)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CpuMask(u64);

impl CpuMask {
    /// Create empty mask
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Create mask allowing all CPUs
    pub const fn all() -> Self {
        Self(u64::MAX)
    }

    /// Create mask for the first `n` CPUs
    pub const fn first_n(n: usize) -> Self {
        if n >= MAX_CPUS {
            Self::all()
        } else {
            Self((1u64 << n) - 1)
        }
    }

    /// Create mask for single CPU
    pub const fn single(cpu: usize) -> Self {
        Self(1 << (cpu & 63))
    }

    /// Raw bit representation
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Set CPU bit
    pub fn set(&mut self, cpu: usize) {
        self.0 |= 1 << (cpu & 63);
    }

    /// Clear CPU bit
    pub fn clear(&mut self, cpu: usize) {
        self.0 &= !(1 << (cpu & 63));
    }

    /// Check if CPU is set
    pub fn is_set(&self, cpu: usize) -> bool {
        cpu < MAX_CPUS && (self.0 & (1 << cpu)) != 0
    }

    /// Count set CPUs
    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Get first set CPU
    pub fn first(&self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    /// Intersect with another mask
    pub fn intersect(&self, other: &Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Union with another mask
    pub fn union(&self, other: &Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Iterate over set CPUs, lowest first
    pub fn iter(&self) -> CpuIter {
        CpuIter(self.0)
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuMask({:#x})", self.0)
    }
}

/// Iterator over the CPUs of a mask
pub struct CpuIter(u64);

impl Iterator for CpuIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let cpu = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_n_and_iter() {
        let mask = CpuMask::first_n(3);
        assert_eq!(mask.count(), 3);
        let cpus: alloc::vec::Vec<usize> = mask.iter().collect();
        assert_eq!(cpus, [0, 1, 2]);
        assert_eq!(CpuMask::first_n(64), CpuMask::all());
    }

    #[test]
    fn intersect_empty() {
        let a = CpuMask::single(1);
        let b = CpuMask::single(2);
        assert!(a.intersect(&b).is_empty());
        assert_eq!(a.union(&b).first(), Some(1));
        assert!(!a.is_set(70));
    }
}
