//! # The Attunement Layer - How the Driver Touches the Machine
//!
//! The floppy driver never reaches for hardware directly. Every port access,
//! delay, PIC operation, DMA channel write and vector installation goes
//! through the traits in this module, bundled together as [`Platform`].
//!
//! On x86_64 the real PC implementations live next to the traits:
//! - [`pic`] - the chained 8259 PICs (via `pic8259`)
//! - [`pit`] - millisecond busy-waits on the 8254 PIT
//! - [`dma`] - the 8237 DMA controller
//! - [`vectors`] - the IRQ dispatch table interrupt stubs call into
//! - [`machine`] - all of the above assembled into one `PcMachine`

use alloc::sync::Arc;

#[cfg(target_arch = "x86_64")]
pub mod dma;
#[cfg(target_arch = "x86_64")]
pub mod machine;
#[cfg(target_arch = "x86_64")]
pub mod pic;
#[cfg(target_arch = "x86_64")]
pub mod pit;
#[cfg(target_arch = "x86_64")]
pub mod vectors;

/// Byte-wide access to absolute I/O port addresses
pub trait PortIo {
    fn inb(&mut self, port: u16) -> u8;
    fn outb(&mut self, port: u16, value: u8);
}

/// Millisecond-granularity busy-wait
pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

/// The interrupt controller the FDC's line is wired through
pub trait InterruptController {
    fn mask(&mut self, irq: u8);
    fn unmask(&mut self, irq: u8);
    fn end_of_interrupt(&mut self, irq: u8);
}

/// Which way a DMA transfer moves bytes, seen from memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Device to memory (an FDC read; the 8237 calls this a "write" transfer)
    ToMemory,
    /// Memory to device (an FDC write; the 8237 calls this a "read" transfer)
    FromMemory,
}

/// Channel mode programmed before each transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaMode {
    pub direction: DmaDirection,
    /// Single-transfer mode (one byte per DREQ) rather than block/demand
    pub single: bool,
    /// Reload the base count and address on terminal count
    pub auto_init: bool,
}

impl DmaMode {
    /// One-shot, single-transfer mode in the given direction
    pub const fn one_shot(direction: DmaDirection) -> Self {
        Self {
            direction,
            single: true,
            auto_init: false,
        }
    }
}

/// A DMA controller channel interface
///
/// Counts and addresses are in bytes. The implementation is responsible for
/// the controller's own off-by-one count encoding.
pub trait DmaController {
    fn mask_channel(&mut self, channel: u8);
    fn unmask_channel(&mut self, channel: u8);
    fn set_mode(&mut self, channel: u8, mode: DmaMode);
    fn load_count(&mut self, channel: u8, bytes: u32);
    fn load_address(&mut self, channel: u8, phys: u32);

    /// Bytes the channel has not yet moved, as read from its count register
    fn remaining_count(&mut self, channel: u8) -> u32;

    /// Whether the channel has reached terminal count.
    ///
    /// Reading the status register clears the latched terminal-count bits,
    /// so this doubles as the "clear TC" operation before a transfer.
    fn terminal_count(&mut self, channel: u8) -> bool;
}

/// Something that can be bound to a hardware interrupt line
///
/// Handlers run in interrupt context: they may touch atomics and the
/// interrupt controller, nothing else.
pub trait IrqSink: Send + Sync {
    fn on_irq(&self, pic: &mut dyn InterruptController);
}

/// Handler installation for hardware interrupt lines
pub trait VectorTable {
    /// Bind `handler` to `irq`, returning whatever was bound before
    fn bind(&mut self, irq: u8, handler: Arc<dyn IrqSink>) -> Option<Arc<dyn IrqSink>>;

    /// Put back the handler `bind` displaced
    fn restore(&mut self, irq: u8, prior: Option<Arc<dyn IrqSink>>);
}

/// The CPU's interrupt-enable flag
pub trait CpuInterrupts {
    /// Disable interrupts, returning whether they were enabled
    fn suppress(&mut self) -> bool;

    /// Re-enable interrupts if `was_enabled`
    fn restore_interrupts(&mut self, was_enabled: bool);
}

/// The ISA-reachable bounce buffer DMA transfers go through
pub trait DmaMemory {
    /// Physical address of the buffer's first byte
    fn dma_phys(&self) -> u32;

    /// The buffer itself, as seen by the CPU
    fn dma_buffer(&mut self) -> &mut [u8];

    fn dma_capacity(&self) -> usize;
}

// A borrowed machine works wherever an owned one does

impl<T: PortIo + ?Sized> PortIo for &mut T {
    fn inb(&mut self, port: u16) -> u8 {
        (**self).inb(port)
    }

    fn outb(&mut self, port: u16, value: u8) {
        (**self).outb(port, value)
    }
}

impl<T: Delay + ?Sized> Delay for &mut T {
    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

impl<T: InterruptController + ?Sized> InterruptController for &mut T {
    fn mask(&mut self, irq: u8) {
        (**self).mask(irq)
    }

    fn unmask(&mut self, irq: u8) {
        (**self).unmask(irq)
    }

    fn end_of_interrupt(&mut self, irq: u8) {
        (**self).end_of_interrupt(irq)
    }
}

impl<T: DmaController + ?Sized> DmaController for &mut T {
    fn mask_channel(&mut self, channel: u8) {
        (**self).mask_channel(channel)
    }

    fn unmask_channel(&mut self, channel: u8) {
        (**self).unmask_channel(channel)
    }

    fn set_mode(&mut self, channel: u8, mode: DmaMode) {
        (**self).set_mode(channel, mode)
    }

    fn load_count(&mut self, channel: u8, bytes: u32) {
        (**self).load_count(channel, bytes)
    }

    fn load_address(&mut self, channel: u8, phys: u32) {
        (**self).load_address(channel, phys)
    }

    fn remaining_count(&mut self, channel: u8) -> u32 {
        (**self).remaining_count(channel)
    }

    fn terminal_count(&mut self, channel: u8) -> bool {
        (**self).terminal_count(channel)
    }
}

impl<T: VectorTable + ?Sized> VectorTable for &mut T {
    fn bind(&mut self, irq: u8, handler: Arc<dyn IrqSink>) -> Option<Arc<dyn IrqSink>> {
        (**self).bind(irq, handler)
    }

    fn restore(&mut self, irq: u8, prior: Option<Arc<dyn IrqSink>>) {
        (**self).restore(irq, prior)
    }
}

impl<T: CpuInterrupts + ?Sized> CpuInterrupts for &mut T {
    fn suppress(&mut self) -> bool {
        (**self).suppress()
    }

    fn restore_interrupts(&mut self, was_enabled: bool) {
        (**self).restore_interrupts(was_enabled)
    }
}

impl<T: DmaMemory + ?Sized> DmaMemory for &mut T {
    fn dma_phys(&self) -> u32 {
        (**self).dma_phys()
    }

    fn dma_buffer(&mut self) -> &mut [u8] {
        (**self).dma_buffer()
    }

    fn dma_capacity(&self) -> usize {
        (**self).dma_capacity()
    }
}

/// Everything the floppy driver needs from the machine
pub trait Platform:
    PortIo + Delay + InterruptController + DmaController + VectorTable + CpuInterrupts + DmaMemory
{
}

impl<T> Platform for T where
    T: PortIo + Delay + InterruptController + DmaController + VectorTable + CpuInterrupts + DmaMemory
{
}

/// Run `f` with CPU interrupts suppressed, restoring the previous state after
pub fn without_interrupts<P, R>(hw: &mut P, f: impl FnOnce(&mut P) -> R) -> R
where
    P: CpuInterrupts + ?Sized,
{
    let was_enabled = hw.suppress();
    let result = f(hw);
    hw.restore_interrupts(was_enabled);
    result
}
