//! FDC register map, the Register Mirror, and status-register decoding
//!
//! Several FDC ports are write-only or read back unreliably (the Digital
//! Output Register on plain AT controllers, the Configuration Control
//! Register everywhere), so the driver keeps its own copy of every value it
//! writes. The mirror is the single source of truth for drive select, motor,
//! reset and data-rate bits: accessors return the mirror, never a fresh read.

use crate::attunement::PortIo;

/// Port offsets from the controller's base address
pub mod port {
    /// Status Register A (PS/2 only, read)
    pub const STATUS_A: u16 = 0;
    /// Status Register B (PS/2 only, read)
    pub const STATUS_B: u16 = 1;
    /// Digital Output Register
    pub const DIGITAL_OUTPUT: u16 = 2;
    /// Main Status Register (read)
    pub const MAIN_STATUS: u16 = 4;
    /// Data FIFO
    pub const DATA: u16 = 5;
    /// Digital Input Register (read) / Configuration Control Register (write)
    pub const DIGITAL_INPUT: u16 = 7;
    pub const CONFIG_CONTROL: u16 = 7;
}

/// One of the four drives a controller can address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Drive(u8);

impl Drive {
    pub const A: Drive = Drive(0);
    pub const B: Drive = Drive(1);
    pub const C: Drive = Drive(2);
    pub const D: Drive = Drive(3);

    pub const fn new(index: u8) -> Option<Drive> {
        if index < 4 {
            Some(Drive(index))
        } else {
            None
        }
    }

    pub const fn index(self) -> u8 {
        self.0
    }
}

/// Digital Output Register contents
///
/// ```text
/// [7:4] MOTD..MOTA  motor on, drives D..A
/// [3]   DMA         DMA and IRQ enable
/// [2]   !RESET      0 = held in reset, 1 = normal operation
/// [1:0] DSEL        drive select
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DigitalOutput {
    pub motors: [bool; 4],
    pub dma_irq_enabled: bool,
    pub reset_asserted: bool,
    pub drive: Drive,
}

impl DigitalOutput {
    const MOTOR_SHIFT: u8 = 4;
    const DMA_IRQ: u8 = 0x08;
    const NOT_RESET: u8 = 0x04;
    const DRIVE_MASK: u8 = 0x03;

    /// The value most BIOSes leave behind: out of reset, motors off, drive A
    pub const fn conservative(dma_irq_enabled: bool) -> Self {
        DigitalOutput {
            motors: [false; 4],
            dma_irq_enabled,
            reset_asserted: false,
            drive: Drive::A,
        }
    }

    pub fn encode(&self) -> u8 {
        let mut value = self.drive.index() & Self::DRIVE_MASK;
        if !self.reset_asserted {
            value |= Self::NOT_RESET;
        }
        if self.dma_irq_enabled {
            value |= Self::DMA_IRQ;
        }
        for (i, on) in self.motors.iter().enumerate() {
            if *on {
                value |= 1 << (Self::MOTOR_SHIFT + i as u8);
            }
        }
        value
    }

    pub fn decode(value: u8) -> Self {
        let mut motors = [false; 4];
        for (i, on) in motors.iter_mut().enumerate() {
            *on = value & (1 << (Self::MOTOR_SHIFT + i as u8)) != 0;
        }
        DigitalOutput {
            motors,
            dma_irq_enabled: value & Self::DMA_IRQ != 0,
            reset_asserted: value & Self::NOT_RESET == 0,
            drive: Drive(value & Self::DRIVE_MASK),
        }
    }

    pub fn motor_on(&self, drive: Drive) -> bool {
        self.motors[drive.index() as usize]
    }
}

/// Data transfer rate, CCR bits [1:0]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransferRate {
    /// 500 kbit/s (1.2M and 1.44M media)
    #[default]
    Kbps500 = 0b00,
    /// 300 kbit/s (360K media in a 1.2M drive)
    Kbps300 = 0b01,
    /// 250 kbit/s (360K and 720K media)
    Kbps250 = 0b10,
    /// 1 Mbit/s (2.88M media)
    Mbps1 = 0b11,
}

impl TransferRate {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => TransferRate::Kbps500,
            0b01 => TransferRate::Kbps300,
            0b10 => TransferRate::Kbps250,
            _ => TransferRate::Mbps1,
        }
    }
}

/// Configuration Control Register contents (write-only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlConfig {
    pub rate: TransferRate,
}

impl ControlConfig {
    pub fn encode(&self) -> u8 {
        self.rate as u8
    }

    pub fn decode(value: u8) -> Self {
        ControlConfig {
            rate: TransferRate::from_bits(value),
        }
    }
}

/// Shadow copies of the write-state registers
///
/// Every mutator performs exactly one port write and updates the shadow in
/// the same step. `&mut self` keeps mirror operations from interleaving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMirror {
    base: u16,
    dor: DigitalOutput,
    ccr: ControlConfig,
}

impl RegisterMirror {
    /// A mirror for the controller at `base`. Nothing is written until the
    /// first mutator call.
    pub fn new(base: u16, dor: DigitalOutput) -> Self {
        RegisterMirror {
            base,
            dor,
            ccr: ControlConfig::default(),
        }
    }

    pub fn digital_output(&self) -> DigitalOutput {
        self.dor
    }

    pub fn control_config(&self) -> ControlConfig {
        self.ccr
    }

    /// Write a whole Digital Output value
    pub fn write_digital_output<P: PortIo + ?Sized>(&mut self, hw: &mut P, dor: DigitalOutput) {
        self.dor = dor;
        hw.outb(self.base + port::DIGITAL_OUTPUT, dor.encode());
    }

    pub fn set_motor<P: PortIo + ?Sized>(&mut self, hw: &mut P, drive: Drive, on: bool) {
        let mut dor = self.dor;
        dor.motors[drive.index() as usize] = on;
        self.write_digital_output(hw, dor);
    }

    pub fn select_drive<P: PortIo + ?Sized>(&mut self, hw: &mut P, drive: Drive) {
        let mut dor = self.dor;
        dor.drive = drive;
        self.write_digital_output(hw, dor);
    }

    /// Drive the (inverted) reset line
    pub fn set_reset_line<P: PortIo + ?Sized>(&mut self, hw: &mut P, asserted: bool) {
        let mut dor = self.dor;
        dor.reset_asserted = asserted;
        self.write_digital_output(hw, dor);
    }

    pub fn enable_dma_irq<P: PortIo + ?Sized>(&mut self, hw: &mut P, enabled: bool) {
        let mut dor = self.dor;
        dor.dma_irq_enabled = enabled;
        self.write_digital_output(hw, dor);
    }

    pub fn set_transfer_rate<P: PortIo + ?Sized>(&mut self, hw: &mut P, rate: TransferRate) {
        self.ccr = ControlConfig { rate };
        hw.outb(self.base + port::CONFIG_CONTROL, self.ccr.encode());
    }

    /// Push both shadows back to the hardware (after a reset wiped it)
    pub fn resync<P: PortIo + ?Sized>(&mut self, hw: &mut P) {
        hw.outb(self.base + port::DIGITAL_OUTPUT, self.dor.encode());
        hw.outb(self.base + port::CONFIG_CONTROL, self.ccr.encode());
    }
}

bitflags::bitflags! {
    /// Main Status Register
    pub struct MainStatus: u8 {
        /// Data register ready for a transfer
        const RQM  = 0x80;
        /// Data direction: set = controller to CPU
        const DIO  = 0x40;
        /// Execution phase in non-DMA mode
        const NDMA = 0x20;
        /// A command is in progress
        const BUSY = 0x10;
        const ACTD = 0x08;
        const ACTC = 0x04;
        const ACTB = 0x02;
        const ACTA = 0x01;
    }
}

impl MainStatus {
    pub fn read<P: PortIo + ?Sized>(hw: &mut P, base: u16) -> Self {
        MainStatus::from_bits_truncate(hw.inb(base + port::MAIN_STATUS))
    }

    pub fn data_ready(self) -> bool {
        self.contains(MainStatus::RQM)
    }

    pub fn busy(self) -> bool {
        self.contains(MainStatus::BUSY)
    }

    /// RQM set, DIO clear: the controller wants a byte from the CPU
    pub fn can_write(self) -> bool {
        self.bits() & 0xC0 == 0x80
    }

    /// RQM and DIO set: the controller has a byte for the CPU
    pub fn can_read(self) -> bool {
        self.bits() & 0xC0 == 0xC0
    }

    /// Non-DMA execution phase, controller wants a payload byte
    pub fn can_write_non_dma(self) -> bool {
        self.bits() & 0xE0 == 0xA0
    }

    /// Non-DMA execution phase, controller has a payload byte
    pub fn can_read_non_dma(self) -> bool {
        self.bits() & 0xE0 == 0xE0
    }

    /// Whether `drive` is still stepping
    pub fn seeking(self, drive: Drive) -> bool {
        self.bits() & (1 << drive.index()) != 0
    }
}

/// ST0 interrupt code, bits [7:6]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptCode {
    Normal,
    Abnormal,
    InvalidCommand,
    /// Abnormal termination caused by drive polling (ready line changed)
    AbnormalPolling,
}

bitflags::bitflags! {
    pub struct St0: u8 {
        const IC_MASK     = 0xC0;
        const SEEK_END    = 0x20;
        const UNIT_CHECK  = 0x10;
        const NOT_READY   = 0x08;
        const HEAD        = 0x04;
        const DRIVE_MASK  = 0x03;
    }
}

impl St0 {
    pub fn interrupt_code(self) -> InterruptCode {
        match self.bits() >> 6 {
            0 => InterruptCode::Normal,
            1 => InterruptCode::Abnormal,
            2 => InterruptCode::InvalidCommand,
            _ => InterruptCode::AbnormalPolling,
        }
    }
}

bitflags::bitflags! {
    pub struct St1: u8 {
        const END_OF_CYLINDER = 0x80;
        const DATA_ERROR      = 0x20;
        const OVERRUN         = 0x10;
        const NO_DATA         = 0x04;
        const NOT_WRITABLE    = 0x02;
        const NO_ADDRESS_MARK = 0x01;
    }
}

bitflags::bitflags! {
    pub struct St2: u8 {
        const DELETED_MARK   = 0x40;
        const DATA_CRC_ERROR = 0x20;
        const WRONG_CYLINDER = 0x10;
        const SEEK_EQUAL     = 0x08;
        const SEEK_ERROR     = 0x04;
        const BAD_CYLINDER   = 0x02;
        const NO_DATA_MARK   = 0x01;
    }
}

bitflags::bitflags! {
    pub struct St3: u8 {
        const FAULT         = 0x80;
        const WRITE_PROTECT = 0x40;
        const READY         = 0x20;
        const TRACK0        = 0x10;
        const TWO_SIDED     = 0x08;
        const HEAD          = 0x04;
        const DRIVE_MASK    = 0x03;
    }
}

/// ST0..ST3 as last reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusRegisters {
    pub raw: [u8; 4],
}

impl StatusRegisters {
    pub fn st0(&self) -> St0 {
        St0::from_bits_truncate(self.raw[0])
    }

    pub fn st1(&self) -> St1 {
        St1::from_bits_truncate(self.raw[1])
    }

    pub fn st2(&self) -> St2 {
        St2::from_bits_truncate(self.raw[2])
    }

    pub fn st3(&self) -> St3 {
        St3::from_bits_truncate(self.raw[3])
    }
}
