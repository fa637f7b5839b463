//! # Completion Synchronizer
//!
//! Binds the controller's interrupt line to a monotonically increasing
//! completion counter. The interrupt side ([`CompletionLine`]) is shared with
//! the vector table through an `Arc` and touches only atomics and the
//! interrupt controller. The foreground side ([`Synchronizer`]) arms an
//! expected count before a command and waits for it with a timeout.
//!
//! ## Interrupt storms
//!
//! A line that keeps firing with nobody waiting for it is miswired or shared
//! with something noisy. Once [`STORM_HIGH_WATER`] fires go unacknowledged
//! the handler masks the line at the PIC and raises the `degraded` flag; the
//! controller then finishes the switch to polling in the foreground and never
//! trusts the line again.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::attunement::{Delay, InterruptController, IrqSink};

/// Unacknowledged fires tolerated before interrupt mode is abandoned
pub const STORM_HIGH_WATER: u32 = 0xFFFE;

/// Interrupt-context half: the counter and the storm flag
#[derive(Debug)]
pub struct CompletionLine {
    irq: u8,
    fired: AtomicU32,
    unacknowledged: AtomicU32,
    degraded: AtomicBool,
}

impl CompletionLine {
    pub const fn new(irq: u8) -> Self {
        CompletionLine {
            irq,
            fired: AtomicU32::new(0),
            unacknowledged: AtomicU32::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn irq(&self) -> u8 {
        self.irq
    }

    /// Total interrupts seen since the line was created
    pub fn fired(&self) -> u32 {
        self.fired.load(Ordering::Acquire)
    }

    pub fn degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Forget fires nobody waited for (after a reset, or when arming)
    pub fn acknowledge(&self) {
        self.unacknowledged.store(0, Ordering::Release);
    }
}

impl IrqSink for CompletionLine {
    fn on_irq(&self, pic: &mut dyn InterruptController) {
        pic.end_of_interrupt(self.irq);
        self.fired.fetch_add(1, Ordering::AcqRel);

        let pending = self.unacknowledged.fetch_add(1, Ordering::AcqRel) + 1;
        if pending >= STORM_HIGH_WATER && !self.degraded.swap(true, Ordering::AcqRel) {
            pic.mask(self.irq);
        }
    }
}

/// Foreground state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Armed { expected: u32 },
    Fired,
}

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The completion counter reached the armed value
    Interrupt,
    /// The polling condition became true
    Polled,
    TimedOut,
}

/// Foreground half, owned by one controller
#[derive(Debug)]
pub struct Synchronizer {
    state: SyncState,
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synchronizer {
    pub const fn new() -> Self {
        Synchronizer {
            state: SyncState::Idle,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Expect one more fire than has been seen so far
    ///
    /// Must be the last step before the interrupting command byte goes out,
    /// with CPU interrupts suppressed across both.
    pub fn arm(&mut self, line: &CompletionLine) {
        line.acknowledge();
        self.state = SyncState::Armed {
            expected: line.fired().wrapping_add(1),
        };
    }

    pub fn disarm(&mut self) {
        self.state = SyncState::Idle;
    }

    /// Wait up to `timeout_ms` for completion
    ///
    /// With a healthy armed line the counter decides; `poll` is consulted
    /// only once the line is missing, unarmed or degraded, so a degraded
    /// controller never completes through the counter again.
    pub fn wait<D, F>(
        &mut self,
        hw: &mut D,
        line: Option<&CompletionLine>,
        timeout_ms: u32,
        mut poll: F,
    ) -> WaitResult
    where
        D: Delay + ?Sized,
        F: FnMut(&mut D) -> bool,
    {
        let mut remaining = timeout_ms;
        loop {
            let interrupt_mode = match (line, self.state) {
                (Some(line), SyncState::Armed { expected }) if !line.degraded() => {
                    if counter_reached(line.fired(), expected) {
                        line.acknowledge();
                        self.state = SyncState::Fired;
                        return WaitResult::Interrupt;
                    }
                    true
                }
                _ => false,
            };

            if !interrupt_mode && poll(hw) {
                self.state = SyncState::Fired;
                return WaitResult::Polled;
            }

            if remaining == 0 {
                // A lost interrupt still gets one look at the hardware
                if interrupt_mode && poll(hw) {
                    self.state = SyncState::Fired;
                    return WaitResult::Polled;
                }
                self.state = SyncState::Idle;
                return WaitResult::TimedOut;
            }
            hw.delay_ms(1);
            remaining -= 1;
        }
    }
}

/// Wrapping comparison: has `fired` caught up with `expected`?
fn counter_reached(fired: u32, expected: u32) -> bool {
    fired.wrapping_sub(expected) < u32::MAX / 2
}
