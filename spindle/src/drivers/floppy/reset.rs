//! Reset/Recovery
//!
//! Holding the reset line wipes the controller's command state and the
//! registers behind the mirror, so afterwards the mirror is pushed back out,
//! the per-drive "reset happened" interrupts are drained, and the data path
//! is specified again.

use crate::attunement::Platform;

use super::command::Command;
use super::dma::wait_data_ready_ms;
use super::engine::{transact_polled, Phase, DATA_READY_TIMEOUT_MS};
use super::registers::MainStatus;
use super::Controller;

/// How long the reset line is held
pub const RESET_HOLD_MS: u32 = 1000;

/// One Sense Interrupt Status is owed per drive after a reset
const RESET_INTERRUPTS: usize = 4;

/// Sense Interrupt Status answer when nothing is pending
const NOTHING_PENDING: u8 = 0x80;

impl<P: Platform> Controller<P> {
    /// Reset the controller and bring it back to a known state
    ///
    /// Never fails: whatever the controller does afterwards, the mirror and
    /// the synchronizer end up at the post-reset baseline.
    pub fn reset(&mut self) {
        log::warn!("fdc {:#x}: resetting controller", self.base);

        self.mirror.set_reset_line(&mut self.hw, true);
        self.hw.delay_ms(RESET_HOLD_MS);
        self.mirror.set_reset_line(&mut self.hw, false);

        if !wait_data_ready_ms(&mut self.hw, self.base, DATA_READY_TIMEOUT_MS) {
            log::warn!("fdc {:#x}: not ready after reset", self.base);
        }
        self.main_status = MainStatus::read(&mut self.hw, self.base);
        self.mirror.resync(&mut self.hw);

        self.drain_reset_interrupts();

        if let Some(line) = &self.line {
            line.acknowledge();
        }
        self.sync.disarm();

        self.specified_non_dma = None;
        if let Err(error) = self.specify(!self.use_dma) {
            log::warn!("fdc {:#x}: specify after reset failed: {}", self.base, error);
        }

        self.phase = Phase::Ready;
    }

    fn drain_reset_interrupts(&mut self) {
        let bytes = match Command::SenseInterruptStatus.encode(self.selected_drive(), self.flags) {
            Ok(bytes) => bytes,
            Err(_) => return,
        };
        for _ in 0..RESET_INTERRUPTS {
            match transact_polled(&mut self.hw, self.base, &bytes, 1, 2) {
                Ok(result) if result[0] != NOTHING_PENDING => {
                    log::trace!("fdc {:#x}: drained ST0={:#04x}", self.base, result[0]);
                }
                _ => break,
            }
        }
    }
}
