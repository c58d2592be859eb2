//! Nucleus logger
//!
//! Records are formatted into the fixed-size slots of a ring, so logging
//! from real-time context never allocates nor touches a device. The
//! integrator drains the ring from in-band context, e.g. to a serial port.
//! When the ring is full the oldest record is overwritten and counted as
//! dropped.

use log::{Level, LevelFilter, Metadata, Record};
use spin::Mutex;

/// Records kept before the oldest is overwritten
pub const LOG_RING_SLOTS: usize = 128;

/// Longest formatted record, longer ones are truncated
pub const LOG_LINE_MAX: usize = 160;

/// Simple buffer writer for formatting without alloc
pub struct BufferWriter<'a> {
    pub buffer: &'a mut [u8],
    pub pos: usize,
}

impl<'a> core::fmt::Write for BufferWriter<'a> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buffer.len() - self.pos;
        let to_write = bytes.len().min(remaining);

        if to_write > 0 {
            self.buffer[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
            self.pos += to_write;
        }

        Ok(())
    }
}

#[derive(Clone, Copy)]
struct Slot {
    level: Level,
    len: usize,
    buf: [u8; LOG_LINE_MAX],
}

impl Slot {
    const EMPTY: Slot = Slot {
        level: Level::Trace,
        len: 0,
        buf: [0; LOG_LINE_MAX],
    };

    fn text(&self) -> &str {
        let bytes = &self.buf[..self.len];
        // Truncation may split a character: keep the valid prefix.
        match core::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
        }
    }
}

struct Ring {
    slots: [Slot; LOG_RING_SLOTS],
    head: usize,
    len: usize,
    dropped: u64,
}

impl Ring {
    const fn new() -> Self {
        Self {
            slots: [Slot::EMPTY; LOG_RING_SLOTS],
            head: 0,
            len: 0,
            dropped: 0,
        }
    }

    fn push(&mut self, record: &Record) {
        let index = (self.head + self.len) % LOG_RING_SLOTS;
        if self.len == LOG_RING_SLOTS {
            self.head = (self.head + 1) % LOG_RING_SLOTS;
            self.dropped += 1;
        } else {
            self.len += 1;
        }

        let slot = &mut self.slots[index];
        slot.level = record.level();
        let mut writer = BufferWriter {
            buffer: &mut slot.buf,
            pos: 0,
        };
        let _ = core::fmt::write(&mut writer, *record.args());
        slot.len = writer.pos;
    }

    fn pop(&mut self) -> Option<Slot> {
        if self.len == 0 {
            return None;
        }
        let slot = self.slots[self.head];
        self.head = (self.head + 1) % LOG_RING_SLOTS;
        self.len -= 1;
        Some(slot)
    }
}

/// Logger writing into a ring of preformatted records
pub struct RingLogger {
    ring: Mutex<Ring>,
}

impl RingLogger {
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(Ring::new()),
        }
    }

    /// Hand every pending record to `f`, oldest first. Returns how many
    /// were drained.
    pub fn drain(&self, mut f: impl FnMut(Level, &str)) -> usize {
        let mut count = 0;
        // One record at a time: the lock is never held across `f`.
        loop {
            let Some(slot) = self.ring.lock().pop() else {
                break;
            };
            f(slot.level, slot.text());
            count += 1;
        }
        count
    }

    /// Records overwritten before being drained
    pub fn dropped(&self) -> u64 {
        self.ring.lock().dropped
    }
}

impl Default for RingLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl log::Log for RingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.ring.lock().push(record);
        }
    }

    fn flush(&self) {}
}

/// Global logger instance
static LOGGER: RingLogger = RingLogger::new();

/// Install the nucleus logger at `level`
pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Drain the global ring, see [`RingLogger::drain`]
pub fn drain(f: impl FnMut(Level, &str)) -> usize {
    LOGGER.drain(f)
}

pub fn dropped() -> u64 {
    LOGGER.dropped()
}
