//! Nucleus clock
//!
//! Wraps the raw tick source exposed by the interrupt pipeline. The
//! monotonic view never goes backwards; the realtime view is the monotonic
//! one shifted by a wall-clock offset. Up to [`MAX_EXTERNAL_CLOCKS`]
//! additional clock sources can be registered.

use super::{STicks, Ticks, NSEC_PER_SEC};
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use alloc::boxed::Box;
use alloc::vec::Vec;

/// Flag marking the raw id of an external clock
pub const CLOCK_EXT_FLAG: u32 = 1 << 16;

/// Hard limit on external clock slots
pub const MAX_EXTERNAL_CLOCKS: usize = 16;

const RAW_REALTIME: u32 = 0;
const RAW_MONOTONIC: u32 = 1;
const RAW_MONOTONIC_RAW: u32 = 4;
const RAW_HOST_REALTIME: u32 = 42;

/// Clock identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockId {
    Realtime,
    Monotonic,
    MonotonicRaw,
    /// In-band wall clock, read through a lock-free snapshot
    HostRealtime,
    /// External clock slot
    External(u32),
}

impl ClockId {
    /// Wire representation
    pub const fn raw(self) -> u32 {
        match self {
            Self::Realtime => RAW_REALTIME,
            Self::Monotonic => RAW_MONOTONIC,
            Self::MonotonicRaw => RAW_MONOTONIC_RAW,
            Self::HostRealtime => RAW_HOST_REALTIME,
            Self::External(slot) => slot | CLOCK_EXT_FLAG,
        }
    }

    /// Decode a wire clock id
    pub fn from_raw(raw: u32) -> SchedulerResult<Self> {
        if raw & CLOCK_EXT_FLAG != 0 {
            let slot = raw & !CLOCK_EXT_FLAG;
            if (slot as usize) < MAX_EXTERNAL_CLOCKS {
                return Ok(Self::External(slot));
            }
            return Err(SchedulerError::InvalidClock { raw });
        }
        match raw {
            RAW_REALTIME => Ok(Self::Realtime),
            RAW_MONOTONIC => Ok(Self::Monotonic),
            RAW_MONOTONIC_RAW => Ok(Self::MonotonicRaw),
            RAW_HOST_REALTIME => Ok(Self::HostRealtime),
            _ => Err(SchedulerError::InvalidClock { raw }),
        }
    }

    pub const fn is_external(self) -> bool {
        matches!(self, Self::External(_))
    }
}

/// Additional clock source
pub trait ExternalClock: Send + Sync {
    fn name(&self) -> &str;

    /// Current date of this clock
    fn read(&self) -> Ticks;

    /// Set the clock; sources that cannot be set refuse
    fn set(&self, _date: Ticks) -> SchedulerResult<()> {
        Err(SchedulerError::InvalidParam { reason: "clock cannot be set" })
    }

    /// Resolution in ticks
    fn resolution(&self) -> Ticks {
        1
    }
}

/// Core clock state, protected by the nucleus lock
pub struct Clock {
    freq: u64,
    /// Highest monotonic date handed out so far
    last: Ticks,
    /// realtime = monotonic + offset
    wallclock_offset: STicks,
    external: Vec<Option<Box<dyn ExternalClock>>>,
}

impl Clock {
    pub fn new(freq: u64, max_external: usize) -> Self {
        let slots = max_external.min(MAX_EXTERNAL_CLOCKS);
        let mut external = Vec::with_capacity(slots);
        external.resize_with(slots, || None);
        Self {
            freq,
            last: 0,
            wallclock_offset: 0,
            external,
        }
    }

    /// Ticks per second
    pub fn freq(&self) -> u64 {
        self.freq
    }

    pub fn ns_to_ticks(&self, ns: u64) -> Ticks {
        ((ns as u128 * self.freq as u128) / NSEC_PER_SEC as u128) as Ticks
    }

    pub fn ticks_to_ns(&self, ticks: Ticks) -> u64 {
        ((ticks as u128 * NSEC_PER_SEC as u128) / self.freq as u128) as u64
    }

    /// Fold a raw reading into the monotonic view
    pub fn sample(&mut self, raw: Ticks) -> Ticks {
        if raw > self.last {
            self.last = raw;
        }
        self.last
    }

    /// Last monotonic date handed out
    pub fn monotonic(&self) -> Ticks {
        self.last
    }

    /// Realtime date matching a monotonic one
    pub fn realtime_at(&self, mono: Ticks) -> Ticks {
        (mono as i128 + self.wallclock_offset as i128).max(0) as Ticks
    }

    /// Monotonic date matching a realtime one
    pub fn monotonic_of(&self, realtime: Ticks) -> Ticks {
        (realtime as i128 - self.wallclock_offset as i128).max(0) as Ticks
    }

    pub fn wallclock_offset(&self) -> STicks {
        self.wallclock_offset
    }

    /// Shift the realtime view by `delta`
    pub fn adjust(&mut self, delta: STicks) {
        self.wallclock_offset = self.wallclock_offset.saturating_add(delta);
    }

    /// Step realtime to `date`, returns the applied delta
    pub fn set_realtime(&mut self, date: Ticks) -> STicks {
        let target = date as i128 - self.last as i128;
        let delta = (target - self.wallclock_offset as i128) as STicks;
        self.adjust(delta);
        delta
    }

    /// Register an external clock in the first free slot
    pub fn register(&mut self, clock: Box<dyn ExternalClock>) -> SchedulerResult<ClockId> {
        let max = self.external.len();
        let slot = self
            .external
            .iter()
            .position(Option::is_none)
            .ok_or(SchedulerError::ClockSlotsFull { max })?;
        log::info!("[CLOCK] registered external clock '{}' in slot {}", clock.name(), slot);
        self.external[slot] = Some(clock);
        Ok(ClockId::External(slot as u32))
    }

    /// Release an external clock slot
    pub fn deregister(&mut self, id: ClockId) -> SchedulerResult<()> {
        let slot = self.slot_of(id)?;
        self.external[slot] = None;
        Ok(())
    }

    /// Look up a registered external clock
    pub fn external(&self, id: ClockId) -> SchedulerResult<&dyn ExternalClock> {
        let slot = self.slot_of(id)?;
        match &self.external[slot] {
            Some(clock) => Ok(clock.as_ref()),
            None => Err(SchedulerError::InvalidClock { raw: id.raw() }),
        }
    }

    fn slot_of(&self, id: ClockId) -> SchedulerResult<usize> {
        match id {
            ClockId::External(slot) if (slot as usize) < self.external.len() => Ok(slot as usize),
            _ => Err(SchedulerError::InvalidClock { raw: id.raw() }),
        }
    }
}
