//! The real PC: every attunement trait backed by actual hardware

use alloc::sync::Arc;
use x86_64::instructions::port::Port;

use super::dma::Isa8237;
use super::pic::LegacyPic;
use super::pit::{PitDelay, PitMode};
use super::vectors::{IdtVectors, LocalCpu};
use super::{
    CpuInterrupts, Delay, DmaController, DmaMemory, DmaMode, InterruptController, IrqSink,
    PortIo, VectorTable,
};

/// ISA DMA can only address the first 16 MiB
const ISA_DMA_LIMIT: u64 = 0x100_0000;

/// Bounce buffers must not straddle a 64 KiB page
const ISA_DMA_PAGE: u64 = 0x1_0000;

/// Longest usable bounce buffer. An untouched 0x10000-byte count reads
/// back as zero remaining.
pub const MAX_BOUNCE_LEN: usize = 0xFFFF;

/// Why a bounce buffer was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BounceBufferError {
    #[error("bounce buffer is empty")]
    Empty,
    #[error("bounce buffer is longer than 0xFFFF bytes")]
    TooLong,
    #[error("bounce buffer lies above 16 MiB")]
    AboveIsaLimit,
    #[error("bounce buffer crosses a 64 KiB boundary")]
    CrossesPage,
}

/// Check that `len` bytes at `phys` are reachable by an 8-bit ISA channel
pub fn validate_bounce_buffer(phys: u32, len: usize) -> Result<(), BounceBufferError> {
    if len == 0 {
        return Err(BounceBufferError::Empty);
    }
    if len > MAX_BOUNCE_LEN {
        return Err(BounceBufferError::TooLong);
    }
    let start = phys as u64;
    let end = start + len as u64 - 1;
    if end >= ISA_DMA_LIMIT {
        return Err(BounceBufferError::AboveIsaLimit);
    }
    if start / ISA_DMA_PAGE != end / ISA_DMA_PAGE {
        return Err(BounceBufferError::CrossesPage);
    }
    Ok(())
}

/// A PC with a legacy PIC, PIT, 8237 and an identity-reachable bounce buffer
pub struct PcMachine {
    pic: LegacyPic,
    delay: PitDelay,
    dma: Isa8237,
    vectors: IdtVectors,
    cpu: LocalCpu,
    bounce: &'static mut [u8],
    bounce_phys: u32,
}

impl PcMachine {
    /// Assemble the machine around a DMA bounce buffer
    ///
    /// # Safety
    ///
    /// `bounce` must be mapped at physical address `bounce_phys` and must not
    /// be used by anything else while the machine exists. The PICs must have
    /// been initialized and PIT channel 0 programmed with `pit_divisor` in
    /// `pit_mode`.
    pub unsafe fn new(
        bounce: &'static mut [u8],
        bounce_phys: u32,
        pit_divisor: u16,
        pit_mode: PitMode,
    ) -> Result<Self, BounceBufferError> {
        validate_bounce_buffer(bounce_phys, bounce.len())?;
        Ok(PcMachine {
            pic: LegacyPic::new(),
            delay: PitDelay::new(pit_divisor, pit_mode),
            dma: Isa8237::new(),
            vectors: IdtVectors,
            cpu: LocalCpu,
            bounce,
            bounce_phys,
        })
    }
}

impl PortIo for PcMachine {
    fn inb(&mut self, port: u16) -> u8 {
        unsafe { Port::<u8>::new(port).read() }
    }

    fn outb(&mut self, port: u16, value: u8) {
        unsafe { Port::<u8>::new(port).write(value) }
    }
}

impl Delay for PcMachine {
    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms)
    }
}

impl InterruptController for PcMachine {
    fn mask(&mut self, irq: u8) {
        self.pic.mask(irq)
    }

    fn unmask(&mut self, irq: u8) {
        self.pic.unmask(irq)
    }

    fn end_of_interrupt(&mut self, irq: u8) {
        self.pic.end_of_interrupt(irq)
    }
}

impl DmaController for PcMachine {
    fn mask_channel(&mut self, channel: u8) {
        self.dma.mask_channel(channel)
    }

    fn unmask_channel(&mut self, channel: u8) {
        self.dma.unmask_channel(channel)
    }

    fn set_mode(&mut self, channel: u8, mode: DmaMode) {
        self.dma.set_mode(channel, mode)
    }

    fn load_count(&mut self, channel: u8, bytes: u32) {
        self.dma.load_count(channel, bytes)
    }

    fn load_address(&mut self, channel: u8, phys: u32) {
        self.dma.load_address(channel, phys)
    }

    fn remaining_count(&mut self, channel: u8) -> u32 {
        self.dma.remaining_count(channel)
    }

    fn terminal_count(&mut self, channel: u8) -> bool {
        self.dma.terminal_count(channel)
    }
}

impl VectorTable for PcMachine {
    fn bind(&mut self, irq: u8, handler: Arc<dyn IrqSink>) -> Option<Arc<dyn IrqSink>> {
        self.vectors.bind(irq, handler)
    }

    fn restore(&mut self, irq: u8, prior: Option<Arc<dyn IrqSink>>) {
        self.vectors.restore(irq, prior)
    }
}

impl CpuInterrupts for PcMachine {
    fn suppress(&mut self) -> bool {
        self.cpu.suppress()
    }

    fn restore_interrupts(&mut self, was_enabled: bool) {
        self.cpu.restore_interrupts(was_enabled)
    }
}

impl DmaMemory for PcMachine {
    fn dma_phys(&self) -> u32 {
        self.bounce_phys
    }

    fn dma_buffer(&mut self) -> &mut [u8] {
        &mut *self.bounce
    }

    fn dma_capacity(&self) -> usize {
        self.bounce.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounce_buffer_below_limit() {
        assert_eq!(validate_bounce_buffer(0x8000, 0x8000), Ok(()));
    }

    #[test]
    fn test_bounce_buffer_crossing_page() {
        assert_eq!(
            validate_bounce_buffer(0xF000, 0x2000),
            Err(BounceBufferError::CrossesPage)
        );
    }

    #[test]
    fn test_bounce_buffer_above_limit() {
        assert_eq!(
            validate_bounce_buffer(0xFF_F000, 0x2000),
            Err(BounceBufferError::AboveIsaLimit)
        );
    }

    #[test]
    fn test_full_page_bounce_buffer_rejected() {
        assert_eq!(
            validate_bounce_buffer(0x2_0000, 0x1_0000),
            Err(BounceBufferError::TooLong)
        );
        assert_eq!(validate_bounce_buffer(0x2_0000, MAX_BOUNCE_LEN), Ok(()));
    }

    #[test]
    fn test_bounce_buffer_error_messages() {
        use alloc::string::ToString;
        assert_eq!(
            BounceBufferError::CrossesPage.to_string(),
            "bounce buffer crosses a 64 KiB boundary"
        );
    }
}
