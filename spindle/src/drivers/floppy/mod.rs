//! # Floppy Disk Controller Driver
//!
//! Drives an 82077AA-compatible FDC over its legacy ISA register window:
//! multi-byte commands through the data FIFO, payloads through an 8237 DMA
//! channel or by programmed I/O, completion by interrupt with a polling
//! fallback.
//!
//! ## Structure
//!
//! - [`registers`] - port map, the Register Mirror, status decoding
//! - [`dma`] - DMA Transfer Manager and the PIO byte path
//! - [`completion`] - interrupt counter and timed waits
//! - [`command`] - commands and their byte encodings
//! - `engine` - the command state machine behind [`Controller::execute`]
//! - `reset` - hardware reset and recovery
//! - [`discovery`] - probing base addresses into controllers
//!
//! ## Usage
//!
//! ```ignore
//! let mut fdc = floppy::discover(machine, 0x3F0, Some(6), Some(2)).ok_or(NoController)?;
//! fdc.execute(Command::Recalibrate)?;
//!
//! let mut sector = [0u8; 512];
//! let run = SectorRun { cylinder: 0, head: 0, sector: 1, size_code: 2, count: 1 };
//! fdc.execute_transfer(Command::ReadSector(run), TransferRequest::read(&mut sector))?;
//!
//! let machine = fdc.release();
//! ```
//!
//! A [`Controller`] owns its [`Platform`] and is not reentrant: one command
//! at a time. Only the interrupt handler runs alongside it, and that touches
//! nothing but an atomic counter and the PIC.

pub mod command;
pub mod completion;
pub mod discovery;
pub mod dma;
mod engine;
pub mod error;
pub mod registers;
mod reset;

#[cfg(test)]
mod mock;

use alloc::sync::Arc;

use crate::attunement::{without_interrupts, IrqSink, Platform};

pub use command::{
    Command, CommandFlags, CompletedBy, Completion, Outcome, SectorRun, TransferBuffer,
    TransferRequest,
};
pub use discovery::{discover, discover_standard, probe, STANDARD_CONTROLLERS};
pub use engine::Phase;
pub use error::FdcError;
pub use registers::{
    ControlConfig, DigitalOutput, Drive, MainStatus, RegisterMirror, StatusRegisters,
    TransferRate,
};

use completion::{CompletionLine, Synchronizer};
use dma::DmaChannel;
use registers::port;

bitflags::bitflags! {
    /// What probing found out about a controller
    pub struct Capabilities: u8 {
        /// Status registers A and B respond at +0/+1
        const PS2 = 0x01;
        /// Digital Input / Configuration Control respond at +7
        const AT = 0x02;
        /// The Digital Output Register reads back what was written
        const DOR_READABLE = 0x04;
    }
}

/// One physical floppy disk controller
pub struct Controller<P: Platform> {
    hw: P,
    base: u16,
    irq: Option<u8>,
    dma: Option<DmaChannel>,
    capabilities: Capabilities,
    mirror: RegisterMirror,
    status: StatusRegisters,
    main_status: MainStatus,
    cylinder: u8,
    flags: CommandFlags,
    version: Option<u8>,
    phase: Phase,

    /// Interrupt-side half of the completion counter, if an IRQ was accepted
    line: Option<Arc<CompletionLine>>,
    sync: Synchronizer,
    /// Whether `line` is currently installed in the vector table
    hooked: bool,
    prior_vector: Option<Arc<dyn IrqSink>>,
    /// Interrupt-driven DMA (true) or polled PIO (false)
    use_dma: bool,
    /// Non-DMA bit last sent with Specify; `None` until one succeeds
    specified_non_dma: Option<bool>,
    /// Degradation has been reported in a `Completion::notice`
    storm_reported: bool,
}

impl<P: Platform> Controller<P> {
    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn irq(&self) -> Option<u8> {
        self.irq
    }

    pub fn dma_channel(&self) -> Option<u8> {
        self.dma.map(|channel| channel.number())
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Whether payloads currently move by interrupt-driven DMA
    pub fn dma_enabled(&self) -> bool {
        self.use_dma
    }

    /// Whether an interrupt storm has forced this controller onto polling
    pub fn interrupts_degraded(&self) -> bool {
        self.line.as_ref().is_some_and(|line| line.degraded())
    }

    /// ST0..ST3 from the most recent commands
    pub fn status(&self) -> StatusRegisters {
        self.status
    }

    /// Present cylinder as last reported by the controller
    pub fn cylinder(&self) -> u8 {
        self.cylinder
    }

    /// Version byte, once a `Command::Version` has been run
    pub fn version(&self) -> Option<u8> {
        self.version
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn flags(&self) -> CommandFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: CommandFlags) {
        self.flags = flags;
    }

    /// The Register Mirror, never a fresh hardware read
    pub fn mirror(&self) -> &RegisterMirror {
        &self.mirror
    }

    pub fn digital_output(&self) -> DigitalOutput {
        self.mirror.digital_output()
    }

    pub fn control_config(&self) -> ControlConfig {
        self.mirror.control_config()
    }

    pub fn selected_drive(&self) -> Drive {
        self.mirror.digital_output().drive
    }

    pub fn set_motor(&mut self, drive: Drive, on: bool) {
        self.mirror.set_motor(&mut self.hw, drive, on);
    }

    pub fn select_drive(&mut self, drive: Drive) {
        self.mirror.select_drive(&mut self.hw, drive);
    }

    pub fn set_transfer_rate(&mut self, rate: TransferRate) {
        self.mirror.set_transfer_rate(&mut self.hw, rate);
    }

    /// Fresh Main Status Register read
    pub fn main_status(&mut self) -> MainStatus {
        self.main_status = MainStatus::read(&mut self.hw, self.base);
        self.main_status
    }

    /// Digital Input Register (disk change in bit 7), or 0xFF without one
    pub fn read_digital_input(&mut self) -> u8 {
        if self.capabilities.intersects(Capabilities::AT | Capabilities::PS2) {
            self.hw.inb(self.base + port::DIGITAL_INPUT)
        } else {
            0xFF
        }
    }

    /// PS/2 status registers A and B, or 0xFF/0xFF without them
    pub fn read_ps2_status(&mut self) -> [u8; 2] {
        if self.capabilities.contains(Capabilities::PS2) {
            [
                self.hw.inb(self.base + port::STATUS_A),
                self.hw.inb(self.base + port::STATUS_B),
            ]
        } else {
            [0xFF, 0xFF]
        }
    }

    /// Switch between interrupt-driven DMA and polled PIO
    ///
    /// DMA needs both an IRQ and a DMA channel, and a line that has not
    /// degraded.
    pub fn enable_dma(&mut self, enable: bool) -> Result<(), FdcError> {
        if !enable {
            self.unhook();
            return Ok(());
        }
        if self.dma.is_none() {
            return Err(FdcError::InvalidParameters("no DMA channel"));
        }
        let line = match &self.line {
            Some(line) => line.clone(),
            None => return Err(FdcError::InvalidParameters("no IRQ line")),
        };
        if line.degraded() {
            return Err(FdcError::InterruptStormDegraded { irq: line.irq() });
        }
        if self.use_dma {
            return Ok(());
        }

        let irq = line.irq();
        self.hw.mask(irq);
        self.mirror.enable_dma_irq(&mut self.hw, true);
        let prior = without_interrupts(&mut self.hw, |hw| hw.bind(irq, line.clone()));
        self.prior_vector = prior;
        self.hooked = true;
        line.acknowledge();
        self.hw.unmask(irq);
        self.use_dma = true;
        log::debug!("fdc {:#x}: interrupt-driven DMA on IRQ {}", self.base, irq);
        Ok(())
    }

    /// Mask the line, drop the DOR DMA/IRQ gate and put the old vector back
    fn unhook(&mut self) {
        if let Some(irq) = self.irq {
            if self.hooked {
                self.hw.mask(irq);
            }
        }
        if self.mirror.digital_output().dma_irq_enabled {
            self.mirror.enable_dma_irq(&mut self.hw, false);
        }
        if let (Some(irq), true) = (self.irq, self.hooked) {
            let prior = self.prior_vector.take();
            without_interrupts(&mut self.hw, |hw| hw.restore(irq, prior));
            self.hooked = false;
        }
        if self.use_dma {
            log::debug!("fdc {:#x}: polled I/O", self.base);
        }
        self.use_dma = false;
    }

    /// Finish a storm-triggered switch to polling
    ///
    /// Returns the notice to attach to the next successful completion.
    fn check_degraded(&mut self) -> Option<FdcError> {
        let irq = match &self.line {
            Some(line) if line.degraded() => line.irq(),
            _ => return None,
        };
        if self.use_dma || self.hooked {
            log::warn!(
                "fdc {:#x}: interrupt storm on IRQ {}, switching to polled I/O",
                self.base,
                irq
            );
            self.unhook();
        }
        if self.storm_reported {
            None
        } else {
            Some(FdcError::InterruptStormDegraded { irq })
        }
    }

    /// Hand the machine back in a safe state: motors off, DMA and IRQ
    /// disabled, reset deasserted, vector restored
    pub fn release(mut self) -> P {
        let dor = DigitalOutput {
            motors: [false; 4],
            dma_irq_enabled: false,
            reset_asserted: false,
            drive: self.mirror.digital_output().drive,
        };
        self.mirror.write_digital_output(&mut self.hw, dor);

        if let (Some(irq), true) = (self.irq, self.hooked) {
            self.hw.mask(irq);
            let prior = self.prior_vector.take();
            without_interrupts(&mut self.hw, |hw| hw.restore(irq, prior));
            self.hooked = false;
        }
        if let Some(dma) = self.dma {
            dma.mask(&mut self.hw);
        }
        self.use_dma = false;

        log::debug!("fdc {:#x}: released", self.base);
        self.hw
    }
}
