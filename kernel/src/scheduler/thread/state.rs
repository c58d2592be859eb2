//! State - Thread state and information bits
//!
//! A thread's condition is a set of independent bits rather than a single
//! enum: a thread may be suspended, pending on a resource and delayed at
//! the same time. Any bit of [`ThreadState::BLOCK_BITS`] keeps the thread
//! off every run-queue.

use bitflags::bitflags;
use core::fmt;

bitflags! {
    /// Persistent thread state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ThreadState: u32 {
        /// Forcibly suspended
        const SUSPENDED     = 1 << 0;
        /// Pending on a synchronization object
        const PENDING       = 1 << 1;
        /// Delayed on a timeout
        const DELAYED       = 1 << 2;
        /// Linked to a run-queue
        const READY         = 1 << 3;
        /// Initialized but never started
        const DORMANT       = 1 << 4;
        /// Exited, awaiting finalization
        const ZOMBIE        = 1 << 5;
        /// Running under the in-band kernel
        const RELAXED       = 1 << 6;
        /// Held until budget replenishment
        const HELD          = 1 << 7;
        /// Stopped by a debugger
        const DEBUG_STOPPED = 1 << 8;
        /// Priority inherited or ceiling applied
        const BOOSTED       = 1 << 9;
        /// Round-robin time slicing enabled
        const ROUND_ROBIN   = 1 << 10;
        /// Per-CPU root (in-band placeholder) thread
        const ROOT          = 1 << 11;
        /// Backed by a user-space context
        const USER          = 1 << 12;
        /// Member of the weak class
        const WEAK          = 1 << 13;
        /// CPU migration requested, pending its own context
        const MIGRATING     = 1 << 14;

        const BLOCK_BITS = Self::SUSPENDED.bits()
            | Self::PENDING.bits()
            | Self::DELAYED.bits()
            | Self::DORMANT.bits()
            | Self::RELAXED.bits()
            | Self::HELD.bits()
            | Self::DEBUG_STOPPED.bits();
    }
}

bitflags! {
    /// Transient information bits, mostly wait outcomes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ThreadInfo: u32 {
        /// Wait timed out
        const TIMED_OUT       = 1 << 0;
        /// Object waited on was removed
        const REMOVED         = 1 << 1;
        /// Wait was broken (unblock, kick, cancel)
        const BROKEN          = 1 << 2;
        /// Forced out of the real-time domain
        const KICKED          = 1 << 3;
        /// Woken by a resource release (ownership granted)
        const WOKEN           = 1 << 4;
        /// Cancellation requested
        const CANCELLED       = 1 << 5;
        /// Migrated to another CPU
        const MOVED           = 1 << 6;
        /// Priority ceiling change waiting to be committed
        const CEILING_PENDING = 1 << 7;

        const WAIT_OUTCOME = Self::TIMED_OUT.bits()
            | Self::REMOVED.bits()
            | Self::BROKEN.bits();
    }
}

/// Coarse lifecycle view derived from the state bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Initialized, not started
    Dormant,
    /// Runnable, linked to a run-queue
    Ready,
    /// Current thread of its CPU
    Running,
    /// Holding at least one block bit
    Blocked,
    /// Exited
    Zombie,
}

impl Lifecycle {
    /// Derive the lifecycle phase from state bits
    pub fn of(state: ThreadState, is_current: bool) -> Self {
        if state.contains(ThreadState::ZOMBIE) {
            Self::Zombie
        } else if state.contains(ThreadState::DORMANT) {
            Self::Dormant
        } else if state.intersects(ThreadState::BLOCK_BITS) {
            Self::Blocked
        } else if is_current && !state.contains(ThreadState::READY) {
            Self::Running
        } else {
            Self::Ready
        }
    }

    /// Check if state is schedulable
    pub fn is_schedulable(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Dormant => write!(f, "Dormant"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::Blocked => write!(f, "Blocked"),
            Self::Zombie => write!(f, "Zombie"),
        }
    }
}

/// Validate a lifecycle transition
pub fn validate_transition(from: Lifecycle, to: Lifecycle) -> bool {
    use Lifecycle::*;

    match (from, to) {
        // Start
        (Dormant, Ready) => true,

        // Picked, preempted or yielded
        (Ready, Running) | (Running, Ready) => true,

        // Suspension applies to runnable threads
        (Running, Blocked) | (Ready, Blocked) => true,

        // Resume and unblock
        (Blocked, Ready) | (Blocked, Blocked) => true,

        // Only the running thread exits
        (Running, Zombie) => true,

        // Restart after a forced stop
        (Blocked, Dormant) => true,

        // All other transitions invalid
        _ => false,
    }
}
