//! ISA 8237 DMA controller, 8-bit channels 0-3
//!
//! Channel 2 is the one the floppy controller is wired to on every PC,
//! but nothing here assumes it.

use x86_64::instructions::port::Port;

use super::{DmaController, DmaDirection, DmaMode};

const REG_STATUS: u16 = 0x08;
const REG_SINGLE_MASK: u16 = 0x0A;
const REG_MODE: u16 = 0x0B;
const REG_CLEAR_FLIP_FLOP: u16 = 0x0C;

const MASK_SET: u8 = 0x04;

const MODE_TRANSFER_WRITE: u8 = 0b01 << 2; // device -> memory
const MODE_TRANSFER_READ: u8 = 0b10 << 2; // memory -> device
const MODE_AUTO_INIT: u8 = 1 << 4;
const MODE_SINGLE: u8 = 0b01 << 6;
const MODE_BLOCK: u8 = 0b10 << 6;

/// Page registers for channels 0-3
const PAGE_PORTS: [u16; 4] = [0x87, 0x83, 0x81, 0x82];

/// The first (slave, 8-bit) 8237
#[derive(Debug, Default, Clone, Copy)]
pub struct Isa8237;

impl Isa8237 {
    pub const fn new() -> Self {
        Isa8237
    }

    fn write(port: u16, value: u8) {
        unsafe { Port::<u8>::new(port).write(value) }
    }

    fn read(port: u16) -> u8 {
        unsafe { Port::<u8>::new(port).read() }
    }

    fn address_port(channel: u8) -> u16 {
        (channel as u16 & 3) * 2
    }

    fn count_port(channel: u8) -> u16 {
        Self::address_port(channel) + 1
    }

    /// Encode a mode register value
    pub fn mode_byte(channel: u8, mode: DmaMode) -> u8 {
        let transfer = match mode.direction {
            DmaDirection::ToMemory => MODE_TRANSFER_WRITE,
            DmaDirection::FromMemory => MODE_TRANSFER_READ,
        };
        let select = if mode.single { MODE_SINGLE } else { MODE_BLOCK };
        let auto = if mode.auto_init { MODE_AUTO_INIT } else { 0 };
        (channel & 3) | transfer | auto | select
    }
}

impl DmaController for Isa8237 {
    fn mask_channel(&mut self, channel: u8) {
        Self::write(REG_SINGLE_MASK, (channel & 3) | MASK_SET);
    }

    fn unmask_channel(&mut self, channel: u8) {
        Self::write(REG_SINGLE_MASK, channel & 3);
    }

    fn set_mode(&mut self, channel: u8, mode: DmaMode) {
        Self::write(REG_MODE, Self::mode_byte(channel, mode));
    }

    fn load_count(&mut self, channel: u8, bytes: u32) {
        // The 8237 moves count + 1 bytes
        let count = bytes.saturating_sub(1) as u16;
        Self::write(REG_CLEAR_FLIP_FLOP, 0xFF);
        Self::write(Self::count_port(channel), count as u8);
        Self::write(Self::count_port(channel), (count >> 8) as u8);
    }

    fn load_address(&mut self, channel: u8, phys: u32) {
        Self::write(REG_CLEAR_FLIP_FLOP, 0xFF);
        Self::write(Self::address_port(channel), phys as u8);
        Self::write(Self::address_port(channel), (phys >> 8) as u8);
        Self::write(PAGE_PORTS[(channel & 3) as usize], (phys >> 16) as u8);
    }

    fn remaining_count(&mut self, channel: u8) -> u32 {
        Self::write(REG_CLEAR_FLIP_FLOP, 0xFF);
        let low = Self::read(Self::count_port(channel)) as u32;
        let high = Self::read(Self::count_port(channel)) as u32;
        // A finished channel sits at 0xFFFF, which wraps back to zero here
        (((high << 8) | low) + 1) & 0xFFFF
    }

    fn terminal_count(&mut self, channel: u8) -> bool {
        Self::read(REG_STATUS) & (1 << (channel & 3)) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_byte_for_floppy_read() {
        // Channel 2, write-to-memory, single mode
        assert_eq!(Isa8237::mode_byte(2, DmaMode::one_shot(DmaDirection::ToMemory)), 0x46);
    }

    #[test]
    fn test_mode_byte_for_floppy_write() {
        assert_eq!(Isa8237::mode_byte(2, DmaMode::one_shot(DmaDirection::FromMemory)), 0x4A);
    }
}
