//! # Controller Discovery
//!
//! Probing is the only way to learn what sits at a base address. There is
//! no identification register every controller answers, so discovery reads
//! whatever it can and classifies by what floats high:
//!
//! - Main Status at +4 reading 0xFF means nothing decodes the window at all
//! - Status A/B at +0/+1 both 0xFF means no PS/2 status registers
//! - Digital Input at +7 reading 0xFF means no AT-style DIR/CCR
//! - The Digital Output Register is written with a conservative value and
//!   read back; only some controllers return it
//!
//! Discovery never returns a half-classified controller: it either hands
//! back a complete [`Controller`] or `None`.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::attunement::Platform;

use super::command::CommandFlags;
use super::completion::{CompletionLine, Synchronizer};
use super::dma::DmaChannel;
use super::engine::Phase;
use super::registers::{port, DigitalOutput, MainStatus, RegisterMirror, StatusRegisters};
use super::{Capabilities, Controller};

/// A candidate register window and its wiring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub base: u16,
    pub irq: Option<u8>,
    pub dma: Option<u8>,
}

/// The primary and secondary ISA floppy controllers
pub const STANDARD_CONTROLLERS: [Candidate; 2] = [
    Candidate {
        base: 0x3F0,
        irq: Some(6),
        dma: Some(2),
    },
    Candidate {
        base: 0x370,
        irq: Some(6),
        dma: Some(2),
    },
];

/// Lowest usable IRQ; 0 and 1 belong to the timer and keyboard
const MIN_IRQ: u8 = 2;
const MAX_IRQ: u8 = 15;

/// Only the 8-bit DMA channels can carry FDC bytes
const MAX_DMA_CHANNEL: u8 = 3;

const FLOATING: u8 = 0xFF;

/// Classify whatever answers at `base`
///
/// IRQ and DMA candidates outside the legal ranges are dropped rather than
/// failing the probe; without both the controller runs polled. Nothing is
/// bound or unmasked here.
///
/// The platform is consumed either way. Lend it (`probe(&mut machine, ..)`)
/// to keep an owned machine, and its bounce buffer, when nothing is found.
pub fn probe<P: Platform>(mut hw: P, base: u16, irq: Option<u8>, dma: Option<u8>) -> Option<Controller<P>> {
    if hw.inb(base + port::MAIN_STATUS) == FLOATING {
        log::debug!("fdc {:#x}: nothing present", base);
        return None;
    }

    let irq = irq.filter(|irq| (MIN_IRQ..=MAX_IRQ).contains(irq));
    let dma = dma.filter(|channel| *channel <= MAX_DMA_CHANNEL).map(DmaChannel::new);

    let mut capabilities = Capabilities::empty();
    if hw.inb(base + port::STATUS_A) & hw.inb(base + port::STATUS_B) != FLOATING {
        capabilities |= Capabilities::PS2;
    }
    if hw.inb(base + port::DIGITAL_INPUT) != FLOATING {
        capabilities |= Capabilities::AT;
    }

    // What most BIOSes leave behind: out of reset, motors off, drive A
    let dor = DigitalOutput::conservative(irq.is_some() && dma.is_some());
    let mut mirror = RegisterMirror::new(base, dor);
    mirror.write_digital_output(&mut hw, dor);
    let main_status = MainStatus::read(&mut hw, base);

    if hw.inb(base + port::DIGITAL_OUTPUT) == dor.encode() {
        capabilities |= Capabilities::DOR_READABLE;
    }

    Some(Controller {
        hw,
        base,
        irq,
        dma,
        capabilities,
        mirror,
        status: StatusRegisters::default(),
        main_status,
        cylinder: 0,
        flags: CommandFlags::default(),
        version: None,
        phase: Phase::Ready,
        line: irq.map(|irq| Arc::new(CompletionLine::new(irq))),
        sync: Synchronizer::new(),
        hooked: false,
        prior_vector: None,
        use_dma: false,
        specified_non_dma: None,
        storm_reported: false,
    })
}

/// Probe `base` and make the controller ready for commands
///
/// A controller found busy, or unwilling to take a command byte, is reset.
/// With both an IRQ and a DMA channel the interrupt is hooked and DMA
/// becomes the transfer path.
///
/// Like [`probe`], a `None` drops `hw`; pass `&mut machine` to keep it.
pub fn discover<P: Platform>(hw: P, base: u16, irq: Option<u8>, dma: Option<u8>) -> Option<Controller<P>> {
    let mut controller = probe(hw, base, irq, dma)?;

    let status = controller.main_status();
    if status.busy() || !status.can_write() {
        log::debug!(
            "fdc {:#x}: found in state MSR={:#04x}, resetting",
            base,
            status.bits()
        );
        controller.reset();
    }

    if controller.irq.is_some() && controller.dma.is_some() {
        if let Err(error) = controller.enable_dma(true) {
            log::warn!("fdc {:#x}: staying on polled I/O: {}", base, error);
        }
    }

    log::info!(
        "fdc {:#x}: found (irq {:?}, dma {:?}, {:?}, {})",
        base,
        controller.irq,
        controller.dma_channel(),
        controller.capabilities,
        if controller.use_dma { "DMA" } else { "PIO" }
    );
    Some(controller)
}

/// Probe both standard ISA windows
///
/// `make_platform` is called once per candidate; each controller found owns
/// the platform it was probed with.
pub fn discover_standard<P, F>(mut make_platform: F) -> Vec<Controller<P>>
where
    P: Platform,
    F: FnMut() -> P,
{
    STANDARD_CONTROLLERS
        .iter()
        .filter_map(|candidate| {
            discover(make_platform(), candidate.base, candidate.irq, candidate.dma)
        })
        .collect()
}
