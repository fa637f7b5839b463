//! # Programmable Interrupt Controller (PIC)
//!
//! The chained 8259 PICs, remapped so IRQs 0-15 arrive as vectors 32-47.
//! `pic8259` owns the initialization sequence and EOI; per-line masking
//! goes straight to the data ports because the driver only ever touches
//! the one line it owns.

use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::instructions::port::Port;

use super::InterruptController;

/// IRQs 0-15 become interrupts 32-47
pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

const PIC1_DATA: u16 = 0x21;
const PIC2_DATA: u16 = 0xA1;

/// The Guardian - the one `ChainedPics` for the machine
pub static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

/// Remap and initialize both PICs
///
/// # Safety
///
/// Must be called exactly once during system initialization, before any
/// line is unmasked.
pub unsafe fn initialize() {
    PICS.lock().initialize();
}

/// Handle to the legacy PIC pair
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyPic;

impl LegacyPic {
    pub const fn new() -> Self {
        LegacyPic
    }

    fn data_port(irq: u8) -> Port<u8> {
        Port::new(if irq < 8 { PIC1_DATA } else { PIC2_DATA })
    }
}

impl InterruptController for LegacyPic {
    fn mask(&mut self, irq: u8) {
        let mut port = Self::data_port(irq);
        unsafe {
            let value = port.read();
            port.write(value | (1 << (irq % 8)));
        }
    }

    fn unmask(&mut self, irq: u8) {
        let mut port = Self::data_port(irq);
        unsafe {
            let value = port.read();
            port.write(value & !(1 << (irq % 8)));
        }
    }

    fn end_of_interrupt(&mut self, irq: u8) {
        // Interrupt context only: the foreground never holds PICS while
        // interrupts are enabled.
        unsafe {
            PICS.lock().notify_end_of_interrupt(PIC_1_OFFSET + irq);
        }
    }
}
