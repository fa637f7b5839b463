//! # Programmable Interval Timer (PIT) Busy-Wait
//!
//! Millisecond delays measured against channel 0 of the 8253/8254 PIT.
//!
//! The floppy driver waits with interrupts suppressed (while a command is
//! being issued) as often as with them enabled, so the tick counter bumped
//! by IRQ 0 cannot be trusted here. Instead the channel 0 down-counter is
//! latched and read back directly, accumulating elapsed input clocks across
//! reloads.
//!
//! Channel 0 must already be running with the reload value and [`PitMode`]
//! given to [`PitDelay::new`] (the kernel programs it at boot). In square
//! wave mode the counter steps by two per input clock, so the same count
//! delta is only half the time it is in rate generator mode.

use x86_64::instructions::port::Port;

use super::Delay;

/// PIT I/O ports
const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

/// PIT base frequency (Hz)
pub const PIT_BASE_FREQ: u32 = 1193182;

/// Input clocks per millisecond, rounded up
const CLOCKS_PER_MS: u64 = (PIT_BASE_FREQ as u64 + 999) / 1000;

/// Latch command for channel 0
const CMD_LATCH_CHANNEL0: u8 = 0b00_00_0000;

/// How channel 0 was programmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PitMode {
    /// Mode 2: the counter steps down by one per input clock
    RateGenerator,
    /// Mode 3: the counter steps down by two per input clock
    SquareWave,
}

impl PitMode {
    const fn counts_per_clock(self) -> u64 {
        match self {
            PitMode::RateGenerator => 1,
            PitMode::SquareWave => 2,
        }
    }
}

/// Busy-wait timer built on channel 0
pub struct PitDelay {
    divisor: u16,
    mode: PitMode,
}

impl PitDelay {
    /// `divisor` is the reload value channel 0 was programmed with
    /// (0 means 65536, as on the hardware).
    pub const fn new(divisor: u16, mode: PitMode) -> Self {
        PitDelay { divisor, mode }
    }

    /// Counter steps that make up `ms` milliseconds
    fn target_counts(&self, ms: u32) -> u64 {
        ms as u64 * CLOCKS_PER_MS * self.mode.counts_per_clock()
    }

    fn period(&self) -> u32 {
        if self.divisor == 0 {
            0x10000
        } else {
            self.divisor as u32
        }
    }

    /// Read the current counter value
    fn read_count(&self) -> u16 {
        let mut command: Port<u8> = Port::new(PIT_COMMAND);
        let mut channel0: Port<u8> = Port::new(PIT_CHANNEL0);
        unsafe {
            command.write(CMD_LATCH_CHANNEL0);
            let low = channel0.read() as u16;
            let high = channel0.read() as u16;
            (high << 8) | low
        }
    }
}

impl Delay for PitDelay {
    fn delay_ms(&mut self, ms: u32) {
        let target = self.target_counts(ms);
        let period = self.period();
        let mut elapsed: u64 = 0;
        let mut last = self.read_count() as u32;

        while elapsed < target {
            core::hint::spin_loop();
            let now = self.read_count() as u32;
            elapsed += counts_between(last, now, period) as u64;
            last = now;
        }
    }
}

/// Steps the down-counter took from `last` to `now`, across at most one reload
fn counts_between(last: u32, now: u32, period: u32) -> u32 {
    if now <= last {
        last - now
    } else {
        last + period - now
    }
}
