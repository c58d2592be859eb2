//! Time management subsystem
//!
//! Nucleus clock, per-CPU timer queues and the host realtime snapshot.
//! Every date handled here is expressed in clock ticks.

pub mod clock;
pub mod host;
pub mod timer;

// Re-exports
pub use clock::{Clock, ClockId, ExternalClock, CLOCK_EXT_FLAG, MAX_EXTERNAL_CLOCKS};
pub use host::HostRealtime;
pub use timer::{TimerEvent, TimerHandler, TimerId, TimerMode, TimerPrio};

/// Clock ticks
pub type Ticks = u64;

/// Signed tick delta
pub type STicks = i64;

/// Nanoseconds per second
pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Timeout of a blocking call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait forever
    Infinite,
    /// Ticks from now on the monotonic clock
    Relative(Ticks),
    /// Absolute monotonic date
    Absolute(Ticks),
    /// Absolute realtime date, follows wall-clock adjustments
    Realtime(Ticks),
}

impl Timeout {
    /// Timer mode and value matching this timeout, `None` if infinite
    pub fn as_timer(self) -> Option<(Ticks, TimerMode)> {
        match self {
            Self::Infinite => None,
            Self::Relative(t) => Some((t, TimerMode::Relative)),
            Self::Absolute(t) => Some((t, TimerMode::Absolute)),
            Self::Realtime(t) => Some((t, TimerMode::Realtime)),
        }
    }
}
