//! # DMA Transfer Manager
//!
//! Programs one 8-bit ISA channel for a single one-shot transfer and works
//! out afterwards how much actually moved. When DMA is unavailable the
//! payload is stepped through the data FIFO by hand instead
//! ([`pio_transfer`]).

use crate::attunement::{Delay, DmaController, DmaDirection, DmaMode, PortIo};

use super::command::TransferBuffer;
use super::registers::{port, MainStatus};

/// Status polls allowed per byte before the FIFO counts as stalled
pub const BYTE_READY_POLLS: u32 = 1000;

/// A DMA channel owned by one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaChannel {
    channel: u8,
}

impl DmaChannel {
    pub const fn new(channel: u8) -> Self {
        DmaChannel { channel }
    }

    pub fn number(&self) -> u8 {
        self.channel
    }

    /// Arm the channel for `length` bytes at physical `phys`
    ///
    /// Call with CPU interrupts suppressed, immediately before the command
    /// that starts the transfer.
    pub fn begin<D: DmaController + ?Sized>(
        &self,
        hw: &mut D,
        direction: DmaDirection,
        phys: u32,
        length: usize,
    ) {
        hw.mask_channel(self.channel);
        hw.set_mode(self.channel, DmaMode::one_shot(direction));
        hw.load_count(self.channel, length as u32);
        hw.load_address(self.channel, phys);
        hw.unmask_channel(self.channel);
        // Reading status drops any TC left over from the previous transfer
        hw.terminal_count(self.channel);
    }

    /// Bytes moved out of `requested`
    ///
    /// Some 8237 clones reload the original count when they hit terminal
    /// count, so an asserted TC means nothing remains whatever the count
    /// register says.
    pub fn actual_transferred<D: DmaController + ?Sized>(&self, hw: &mut D, requested: usize) -> usize {
        let remaining = hw.remaining_count(self.channel) as usize;
        let remaining = if hw.terminal_count(self.channel) {
            0
        } else {
            remaining.min(requested)
        };
        requested - remaining
    }

    pub fn mask<D: DmaController + ?Sized>(&self, hw: &mut D) {
        hw.mask_channel(self.channel);
    }
}

/// Poll for RQM, up to [`BYTE_READY_POLLS`] reads
pub fn wait_data_ready<P: PortIo + ?Sized>(hw: &mut P, base: u16) -> Option<MainStatus> {
    for _ in 0..BYTE_READY_POLLS {
        let status = MainStatus::read(hw, base);
        if status.data_ready() {
            return Some(status);
        }
    }
    None
}

/// Poll for RQM once a millisecond, for up to `timeout_ms`
pub fn wait_data_ready_ms<P: PortIo + Delay + ?Sized>(hw: &mut P, base: u16, timeout_ms: u32) -> bool {
    wait_status_ms(hw, base, timeout_ms, MainStatus::data_ready)
}

/// Poll the main status once a millisecond until `ready` holds
pub fn wait_status_ms<P, F>(hw: &mut P, base: u16, timeout_ms: u32, ready: F) -> bool
where
    P: PortIo + Delay + ?Sized,
    F: Fn(MainStatus) -> bool,
{
    let mut remaining = timeout_ms.max(1);
    loop {
        if ready(MainStatus::read(hw, base)) {
            return true;
        }
        remaining -= 1;
        if remaining == 0 {
            return false;
        }
        hw.delay_ms(1);
    }
}

/// Move `buffer` through the data FIFO in non-DMA mode
///
/// The buffer variant gives the direction. Each byte must see the non-DMA
/// execution-phase condition for that direction within `byte_timeout_ms`.
/// Stops at the first stall and returns how many bytes made it; a short
/// count is a failed transfer.
pub fn pio_transfer<P: PortIo + Delay + ?Sized>(
    hw: &mut P,
    base: u16,
    mut buffer: TransferBuffer<'_>,
    byte_timeout_ms: u32,
) -> usize {
    let (ready, length): (fn(MainStatus) -> bool, usize) = match &buffer {
        TransferBuffer::Read(destination) => (MainStatus::can_read_non_dma, destination.len()),
        TransferBuffer::Write(source) => (MainStatus::can_write_non_dma, source.len()),
    };

    let mut moved = 0;
    while moved < length {
        if wait_data_ready(hw, base).is_none() {
            break;
        }
        if !wait_status_ms(hw, base, byte_timeout_ms, ready) {
            break;
        }
        match &mut buffer {
            TransferBuffer::Read(destination) => destination[moved] = hw.inb(base + port::DATA),
            TransferBuffer::Write(source) => hw.outb(base + port::DATA, source[moved]),
        }
        moved += 1;
    }
    moved
}
