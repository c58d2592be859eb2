//! Scheduler Error Handling
//!
//! Typed errors for every nucleus operation. Invalid arguments and resource
//! exhaustion are rejected synchronously by the call that introduced them;
//! timeouts and interruptions are expected outcomes reported through the
//! same type so blocking callers can tell them apart.

use core::fmt;

/// Scheduler error types with detailed context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    // ═══════════════════════════════════════════════════════════════
    // Invalid arguments
    // ═══════════════════════════════════════════════════════════════

    /// Priority outside the range accepted by the target class
    InvalidPriority { value: i32, min: i32, max: i32 },

    /// Malformed scheduling or configuration parameters
    InvalidParam { reason: &'static str },

    /// Unknown or unregistered clock identifier
    InvalidClock { raw: u32 },

    /// Zero interval on a periodic request
    InvalidInterval,

    /// CPU mask selecting no online CPU
    InvalidCpuMask,

    /// CPU not available (offline or doesn't exist)
    CpuNotAvailable { cpu_id: usize },

    /// Thread not found in the thread table
    ThreadNotFound { thread_id: usize },

    /// Timer not found in the timer table
    TimerNotFound { timer_id: usize },

    /// Synchronization object not found
    SynchNotFound { synch_id: usize },

    /// Quota group unknown on this CPU
    QuotaGroupNotFound { cpu_id: usize, tgid: u32 },

    /// Scheduling class not registered with this nucleus
    ClassNotAvailable { class: &'static str },

    /// Thread has no periodic timeline
    NotPeriodic { thread_id: usize },

    // ═══════════════════════════════════════════════════════════════
    // Resource exhaustion
    // ═══════════════════════════════════════════════════════════════

    /// Every external clock slot is in use
    ClockSlotsFull { max: usize },

    /// Every quota group slot is in use on this CPU
    QuotaGroupsFull { cpu_id: usize, max: usize },

    // ═══════════════════════════════════════════════════════════════
    // State conflicts
    // ═══════════════════════════════════════════════════════════════

    /// Thread is not in a state allowing the request (e.g. start twice)
    ThreadBusy { thread_id: usize },

    /// Quota group still has threads attached
    GroupBusy { tgid: u32, threads: usize },

    /// Caller already owns the resource
    Deadlock { thread_id: usize, synch_id: usize },

    /// Caller does not own the resource it tries to release
    NotOwner { thread_id: usize, synch_id: usize },

    /// Operation must run from the target thread's own context
    NotCurrent { thread_id: usize },

    // ═══════════════════════════════════════════════════════════════
    // Expected outcomes of blocking calls
    // ═══════════════════════════════════════════════════════════════

    /// Deadline elapsed before the wait was satisfied
    TimedOut,

    /// Wait broken by cancellation, unblock or a kick
    Interrupted,

    /// The object waited on was deleted
    ObjectRemoved,

    /// Periodic release points were missed
    Overrun { count: u64 },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPriority { value, min, max } => {
                write!(f, "Priority {} out of range [{}, {}]", value, min, max)
            }
            Self::InvalidParam { reason } => write!(f, "Invalid parameter: {}", reason),
            Self::InvalidClock { raw } => write!(f, "Invalid clock id {:#x}", raw),
            Self::ThreadNotFound { thread_id } => {
                write!(f, "Thread {} not found", thread_id)
            }
            Self::CpuNotAvailable { cpu_id } => write!(f, "CPU {} not available", cpu_id),
            Self::ClockSlotsFull { max } => {
                write!(f, "External clock slots full: {}/{}", max, max)
            }
            Self::QuotaGroupsFull { cpu_id, max } => {
                write!(f, "Quota groups full on CPU {}: {}/{}", cpu_id, max, max)
            }
            Self::GroupBusy { tgid, threads } => {
                write!(f, "Quota group {} still has {} thread(s)", tgid, threads)
            }
            Self::Deadlock { thread_id, synch_id } => {
                write!(f, "Deadlock: thread {} already owns synch {}", thread_id, synch_id)
            }
            Self::Overrun { count } => write!(f, "Missed {} release point(s)", count),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl SchedulerError {
    /// Is this a recoverable error?
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Deadlock { .. } | Self::NotOwner { .. })
    }

    /// Is this an expected result of a blocking call rather than a fault?
    pub fn is_wait_outcome(&self) -> bool {
        matches!(
            self,
            Self::TimedOut | Self::Interrupted | Self::ObjectRemoved | Self::Overrun { .. }
        )
    }

    /// Should this error be logged?
    pub fn should_log(&self) -> bool {
        match self {
            Self::ThreadNotFound { .. } => false, // Common during cleanup
            _ => !self.is_wait_outcome(),
        }
    }

    /// Get error severity (0-3)
    pub fn severity(&self) -> u8 {
        match self {
            Self::Deadlock { .. } | Self::NotOwner { .. } => 3,
            Self::ClockSlotsFull { .. } | Self::QuotaGroupsFull { .. } => 2,
            Self::ThreadBusy { .. } | Self::GroupBusy { .. } | Self::NotCurrent { .. } => 1,
            _ => 0,
        }
    }
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Critical scheduler assertion.
///
/// Fatal with debug assertions enabled. In release builds the violation is
/// logged and the enclosing function returns `$ret` without touching state.
#[macro_export]
macro_rules! sched_assert {
    ($cond:expr, $reason:expr) => {
        $crate::sched_assert!($cond, $reason, ())
    };
    ($cond:expr, $reason:expr, $ret:expr) => {
        if !$cond {
            if cfg!(debug_assertions) {
                panic!("[SCHED CRITICAL] Invariant violated: {}", $reason);
            }
            log::error!("[SCHED] invariant violated: {}", $reason);
            return $ret;
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_outcomes_are_not_logged() {
        assert!(!SchedulerError::TimedOut.should_log());
        assert!(!SchedulerError::Interrupted.should_log());
        assert!(SchedulerError::InvalidInterval.should_log());
    }

    #[test]
    fn display_mentions_context() {
        let err = SchedulerError::InvalidPriority { value: 300, min: 0, max: 257 };
        let text = alloc::format!("{}", err);
        assert!(text.contains("300"));
        assert_eq!(SchedulerError::Deadlock { thread_id: 1, synch_id: 2 }.severity(), 3);
    }
}
