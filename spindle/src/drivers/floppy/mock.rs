//! Simulated PC for driver tests
//!
//! An 82077AA-style controller (command, execution and result phases, Sense
//! Interrupt Status after seeks and resets, PIO execution with NDMA), an
//! 8237 with terminal count, a PIC with mask and latch, the CPU interrupt
//! flag, a vector table and a virtual millisecond clock. IRQs raised while
//! the CPU flag is clear are delivered when it is restored.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::attunement::{
    CpuInterrupts, Delay, DmaController, DmaDirection, DmaMemory, DmaMode, InterruptController,
    IrqSink, PortIo, VectorTable,
};

use super::registers::port;

pub const BASE: u16 = 0x3F0;
pub const IRQ: u8 = 6;
pub const DMA: u8 = 2;
pub const BOUNCE_PHYS: u32 = 0x2_0000;
pub const BOUNCE_SIZE: usize = 4096;

/// Byte an unwritten sector reads back as
pub const FILLER: u8 = 0xF6;

const DOR_NOT_RESET: u8 = 0x04;
const DOR_DMA_GATE: u8 = 0x08;

/// Injected misbehaviour
#[derive(Debug, Default, Clone)]
pub struct Faults {
    /// Drop RQM once this many command bytes have been taken
    pub stall_command_byte: Option<usize>,
    /// Never present the result phase
    pub drop_results: bool,
    /// DMA stops after this many bytes, status still normal
    pub short_dma: Option<usize>,
    /// PIO execution stops after this many bytes
    pub pio_stall_at: Option<usize>,
    /// ST0..ST2 reported by the next data command
    pub abnormal: Option<[u8; 3]>,
    /// The FDC never raises its interrupt
    pub suppress_irq: bool,
    /// The 8237 reloads its count register on terminal count
    pub reload_count_on_tc: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FdcPhase {
    Command,
    /// PIO execution phase of a data command
    Execution(Exec),
    Result,
    /// Waiting for a DMA request that will never be serviced
    Stuck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Exec {
    write: bool,
    data: Vec<u8>,
    pos: usize,
    target: SectorTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SectorTarget {
    drive: u8,
    cylinder: u8,
    head: u8,
    sector: u8,
    size_code: u8,
    last: u8,
}

impl SectorTarget {
    fn sector_bytes(&self) -> usize {
        128 << self.size_code
    }

    fn len(&self) -> usize {
        (self.last as usize + 1).saturating_sub(self.sector as usize) * self.sector_bytes()
    }

    fn result(&self, st: [u8; 3]) -> [u8; 7] {
        [st[0], st[1], st[2], self.cylinder, self.head, self.last, self.size_code]
    }

    fn unit(&self) -> u8 {
        (self.head << 2) | self.drive
    }
}

/// The floppy controller itself
#[derive(Debug)]
pub struct SimFdc {
    pub base: u16,
    pub irq: u8,
    pub present: bool,
    pub ps2: bool,
    pub at: bool,
    pub dor_readable: bool,
    pub dor: u8,
    pub ccr: u8,
    pub non_dma: bool,
    pub cylinders: [u8; 4],
    pub pending: VecDeque<(u8, u8)>,
    /// Commands accepted, first byte of each
    pub commands: Vec<u8>,
    pub resets: usize,
    phase: FdcPhase,
    command: Vec<u8>,
    result: VecDeque<u8>,
    disk: BTreeMap<(u8, u8, u8, u8), Vec<u8>>,
}

impl SimFdc {
    fn new() -> Self {
        SimFdc {
            base: BASE,
            irq: IRQ,
            present: true,
            ps2: false,
            at: true,
            dor_readable: false,
            dor: DOR_NOT_RESET | DOR_DMA_GATE,
            ccr: 0,
            non_dma: false,
            cylinders: [0; 4],
            pending: VecDeque::new(),
            commands: Vec::new(),
            resets: 0,
            phase: FdcPhase::Command,
            command: Vec::new(),
            result: VecDeque::new(),
            disk: BTreeMap::new(),
        }
    }

    fn in_reset(&self) -> bool {
        self.dor & DOR_NOT_RESET == 0
    }

    /// Whether the controller is idle in its command phase
    pub fn idle(&self) -> bool {
        self.phase == FdcPhase::Command && self.command.is_empty() && !self.in_reset()
    }

    fn msr(&self, faults: &Faults) -> u8 {
        if self.in_reset() {
            return 0x00;
        }
        match &self.phase {
            FdcPhase::Command => {
                if faults.stall_command_byte == Some(self.command.len()) {
                    0x10
                } else if self.command.is_empty() {
                    0x80
                } else {
                    0x90
                }
            }
            FdcPhase::Execution(exec) => {
                if faults.pio_stall_at == Some(exec.pos) {
                    0x30
                } else if exec.write {
                    0xB0
                } else {
                    0xF0
                }
            }
            FdcPhase::Result if faults.drop_results => 0x10,
            FdcPhase::Result => 0xD0,
            FdcPhase::Stuck => 0x10,
        }
    }

    fn sector(&self, drive: u8, cylinder: u8, head: u8, sector: u8, size: usize) -> Vec<u8> {
        self.disk
            .get(&(drive, cylinder, head, sector))
            .cloned()
            .unwrap_or_else(|| vec![FILLER; size])
    }

    fn read_run(&self, target: &SectorTarget) -> Vec<u8> {
        let mut data = Vec::new();
        for sector in target.sector..=target.last {
            data.extend(self.sector(
                target.drive,
                target.cylinder,
                target.head,
                sector,
                target.sector_bytes(),
            ));
        }
        data
    }

    fn write_run(&mut self, target: &SectorTarget, data: &[u8]) {
        for (i, chunk) in data.chunks(target.sector_bytes()).enumerate() {
            let sector = target.sector + i as u8;
            self.disk.insert(
                (target.drive, target.cylinder, target.head, sector),
                chunk.to_vec(),
            );
        }
    }

    pub fn stored(&self, drive: u8, cylinder: u8, head: u8, sector: u8) -> Option<&[u8]> {
        self.disk.get(&(drive, cylinder, head, sector)).map(|data| data.as_slice())
    }
}

/// One 8237 channel
#[derive(Debug, Clone, Default)]
pub struct SimChannel {
    pub masked: bool,
    pub mode: Option<DmaMode>,
    pub count: u32,
    pub address: u32,
    pub remaining: u32,
    pub tc: bool,
}

/// The 8259 pair, flattened to 16 lines
#[derive(Debug, Default)]
pub struct SimPic {
    pub masked: u16,
    pub pending: u16,
    pub eois: Vec<u8>,
}

impl InterruptController for SimPic {
    fn mask(&mut self, irq: u8) {
        self.masked |= 1 << irq;
    }

    fn unmask(&mut self, irq: u8) {
        self.masked &= !(1 << irq);
    }

    fn end_of_interrupt(&mut self, irq: u8) {
        self.eois.push(irq);
    }
}

/// The whole simulated machine
pub struct SimMachine {
    pub fdc: SimFdc,
    pub dma: [SimChannel; 4],
    pub pic: SimPic,
    pub vectors: [Option<Arc<dyn IrqSink>>; 16],
    pub interrupts_enabled: bool,
    pub now_ms: u64,
    pub bounce: Vec<u8>,
    pub faults: Faults,
    /// Every FDC port write, in order
    pub port_writes: Vec<(u16, u8)>,
    pub port_reads: usize,
    pub dma_ops: usize,
    pub vector_ops: usize,
}

impl SimMachine {
    pub fn new() -> Self {
        SimMachine {
            fdc: SimFdc::new(),
            dma: core::array::from_fn(|_| SimChannel {
                masked: true,
                ..Default::default()
            }),
            pic: SimPic {
                masked: 0xFFFF,
                ..Default::default()
            },
            vectors: core::array::from_fn(|_| None),
            interrupts_enabled: true,
            now_ms: 0,
            bounce: vec![0; BOUNCE_SIZE],
            faults: Faults::default(),
            port_writes: Vec::new(),
            port_reads: 0,
            dma_ops: 0,
            vector_ops: 0,
        }
    }

    /// Nothing decodes the FDC window
    pub fn absent() -> Self {
        let mut machine = Self::new();
        machine.fdc.present = false;
        machine
    }

    /// Leave a half-read result phase behind, as a crashed previous owner would
    pub fn leave_stale_result(&mut self) {
        self.fdc.result = [0xC0u8, 0x00].into_iter().collect();
        self.fdc.phase = FdcPhase::Result;
    }

    /// Hardware accesses of any kind so far
    pub fn touches(&self) -> usize {
        self.port_writes.len() + self.port_reads + self.dma_ops + self.vector_ops
    }

    /// Last value written to the Digital Output Register
    pub fn last_dor_write(&self) -> Option<u8> {
        let dor = self.fdc.base + port::DIGITAL_OUTPUT;
        self.port_writes
            .iter()
            .rev()
            .find(|(addr, _)| *addr == dor)
            .map(|(_, value)| *value)
    }

    pub fn irq_masked(&self, irq: u8) -> bool {
        self.pic.masked & (1 << irq) != 0
    }

    /// Deliver `count` interrupts nobody asked for
    pub fn fire_spurious(&mut self, irq: u8, count: u32) {
        for _ in 0..count {
            self.pic.pending |= 1 << irq;
            self.deliver();
        }
    }

    fn raise_fdc_irq(&mut self) {
        if self.fdc.dor & DOR_DMA_GATE == 0 || self.faults.suppress_irq {
            return;
        }
        self.pic.pending |= 1 << self.fdc.irq;
        self.deliver();
    }

    fn deliver(&mut self) {
        if !self.interrupts_enabled {
            return;
        }
        for irq in 0..16u8 {
            let bit = 1u16 << irq;
            if self.pic.pending & bit != 0 && self.pic.masked & bit == 0 {
                self.pic.pending &= !bit;
                match self.vectors[irq as usize].clone() {
                    Some(sink) => sink.on_irq(&mut self.pic),
                    None => self.pic.end_of_interrupt(irq),
                }
            }
        }
    }

    fn write_dor(&mut self, value: u8) {
        let was_reset = self.fdc.in_reset();
        self.fdc.dor = value;
        if self.fdc.in_reset() {
            self.fdc.phase = FdcPhase::Command;
            self.fdc.command.clear();
            self.fdc.result.clear();
            self.fdc.pending.clear();
            self.fdc.non_dma = false;
        } else if was_reset {
            // Leaving reset: one pending interrupt per drive
            self.fdc.resets += 1;
            for drive in 0..4u8 {
                let cylinder = self.fdc.cylinders[drive as usize];
                self.fdc.pending.push_back((0xC0 | drive, cylinder));
            }
            self.raise_fdc_irq();
        }
    }

    fn write_data(&mut self, value: u8) {
        if self.fdc.msr(&self.faults) & 0x80 == 0 {
            return;
        }
        match &mut self.fdc.phase {
            FdcPhase::Command => {
                self.fdc.command.push(value);
                if self.fdc.command.len() == command_len(self.fdc.command[0]) {
                    let command = core::mem::take(&mut self.fdc.command);
                    self.fdc.commands.push(command[0]);
                    self.execute(&command);
                }
            }
            FdcPhase::Execution(exec) if exec.write => {
                exec.data[exec.pos] = value;
                exec.pos += 1;
                if exec.pos == exec.data.len() {
                    let exec = exec.clone();
                    self.fdc.write_run(&exec.target, &exec.data);
                    self.finish_pio(&exec.target);
                }
            }
            _ => {}
        }
    }

    fn read_data(&mut self) -> u8 {
        if self.fdc.msr(&self.faults) & 0xC0 != 0xC0 {
            return 0xFF;
        }
        match &mut self.fdc.phase {
            FdcPhase::Execution(exec) => {
                let value = exec.data[exec.pos];
                exec.pos += 1;
                if exec.pos == exec.data.len() {
                    let target = exec.target;
                    self.finish_pio(&target);
                }
                value
            }
            FdcPhase::Result => {
                let value = self.fdc.result.pop_front().unwrap_or(0xFF);
                if self.fdc.result.is_empty() {
                    self.fdc.phase = FdcPhase::Command;
                }
                value
            }
            _ => 0xFF,
        }
    }

    fn respond(&mut self, bytes: &[u8]) {
        self.fdc.result = bytes.iter().copied().collect();
        self.fdc.phase = if bytes.is_empty() {
            FdcPhase::Command
        } else {
            FdcPhase::Result
        };
    }

    /// PIO runs end at EOT without a terminal count
    fn finish_pio(&mut self, target: &SectorTarget) {
        let st = self
            .faults
            .abnormal
            .take()
            .unwrap_or([0x40 | target.unit(), 0x80, 0x00]);
        self.respond(&target.result(st));
    }

    fn seek_done(&mut self, drive: u8, head: u8, cylinder: u8) {
        self.fdc.cylinders[drive as usize] = cylinder;
        self.fdc.pending.push_back((0x20 | (head << 2) | drive, cylinder));
        self.respond(&[]);
        self.raise_fdc_irq();
    }

    fn execute(&mut self, command: &[u8]) {
        let drive = command.get(1).map_or(0, |unit| unit & 3);
        let head = command.get(1).map_or(0, |unit| (unit >> 2) & 1);
        match command[0] {
            0x03 => {
                self.fdc.non_dma = command[2] & 1 != 0;
                self.respond(&[]);
            }
            0x04 => {
                let mut st3 = 0x20 | 0x08 | (head << 2) | drive;
                if self.fdc.cylinders[drive as usize] == 0 {
                    st3 |= 0x10;
                }
                self.respond(&[st3]);
            }
            0x07 => self.seek_done(drive, 0, 0),
            0x08 => match self.fdc.pending.pop_front() {
                Some((st0, cylinder)) => self.respond(&[st0, cylinder]),
                None => self.respond(&[0x80]),
            },
            op if op & 0xBF == 0x0A => {
                let cylinder = self.fdc.cylinders[drive as usize];
                self.respond(&[(head << 2) | drive, 0, 0, cylinder, head, 1, 2]);
            }
            0x0F => self.seek_done(drive, head, command[2]),
            op if op & 0xBF == 0x8F => {
                let current = self.fdc.cylinders[drive as usize];
                let cylinder = if op & 0x40 != 0 {
                    current.saturating_sub(command[2])
                } else {
                    current.saturating_add(command[2])
                };
                self.seek_done(drive, 0, cylinder);
            }
            0x10 => self.respond(&[0x90]),
            op if matches!(op & 0x1F, 0x05 | 0x06) => {
                let target = SectorTarget {
                    drive,
                    cylinder: command[2],
                    head: command[3],
                    sector: command[4],
                    size_code: command[5],
                    last: command[6],
                };
                self.data_command(op & 0x1F == 0x05, target);
            }
            _ => self.respond(&[0x80]),
        }
    }

    fn data_command(&mut self, write: bool, target: SectorTarget) {
        if self.fdc.non_dma {
            let data = if write {
                vec![0; target.len()]
            } else {
                self.fdc.read_run(&target)
            };
            self.fdc.phase = FdcPhase::Execution(Exec {
                write,
                data,
                pos: 0,
                target,
            });
            return;
        }

        let channel = DMA as usize;
        let expected = if write {
            DmaDirection::FromMemory
        } else {
            DmaDirection::ToMemory
        };
        let ready = {
            let ch = &self.dma[channel];
            !ch.masked && ch.mode.map(|mode| mode.direction) == Some(expected)
        };
        if self.fdc.dor & DOR_DMA_GATE == 0 || !ready {
            self.fdc.phase = FdcPhase::Stuck;
            return;
        }

        let ch = &self.dma[channel];
        let offset = ch.address.wrapping_sub(BOUNCE_PHYS) as usize;
        let mut moved = target.len().min(ch.count as usize);
        if let Some(limit) = self.faults.short_dma {
            moved = moved.min(limit);
        }

        if write {
            let data = self.bounce[offset..offset + moved].to_vec();
            self.fdc.write_run(&target, &data);
        } else {
            let data = self.fdc.read_run(&target);
            self.bounce[offset..offset + moved].copy_from_slice(&data[..moved]);
        }

        let ch = &mut self.dma[channel];
        ch.remaining = ch.count - moved as u32;
        ch.tc = ch.remaining == 0;

        let st = self.faults.abnormal.take().unwrap_or([target.unit(), 0, 0]);
        self.respond(&target.result(st));
        self.raise_fdc_irq();
    }
}

fn command_len(first: u8) -> usize {
    match first & 0x1F {
        0x03 => 3,
        0x04 | 0x07 | 0x0A => 2,
        0x05 | 0x06 => 9,
        0x0F => 3,
        _ => 1,
    }
}

impl PortIo for SimMachine {
    fn inb(&mut self, addr: u16) -> u8 {
        self.port_reads += 1;
        if !self.fdc.present || !(self.fdc.base..self.fdc.base + 8).contains(&addr) {
            return 0xFF;
        }
        match addr - self.fdc.base {
            port::STATUS_A | port::STATUS_B if self.fdc.ps2 => 0x00,
            port::DIGITAL_OUTPUT if self.fdc.dor_readable => self.fdc.dor,
            port::MAIN_STATUS => self.fdc.msr(&self.faults),
            port::DATA => self.read_data(),
            port::DIGITAL_INPUT if self.fdc.at || self.fdc.ps2 => 0x00,
            _ => 0xFF,
        }
    }

    fn outb(&mut self, addr: u16, value: u8) {
        self.port_writes.push((addr, value));
        if !self.fdc.present || !(self.fdc.base..self.fdc.base + 8).contains(&addr) {
            return;
        }
        match addr - self.fdc.base {
            port::DIGITAL_OUTPUT => self.write_dor(value),
            port::DATA => self.write_data(value),
            port::CONFIG_CONTROL => self.fdc.ccr = value,
            _ => {}
        }
    }
}

impl Delay for SimMachine {
    fn delay_ms(&mut self, ms: u32) {
        self.now_ms += ms as u64;
    }
}

impl InterruptController for SimMachine {
    fn mask(&mut self, irq: u8) {
        self.pic.mask(irq);
    }

    fn unmask(&mut self, irq: u8) {
        self.pic.unmask(irq);
        self.deliver();
    }

    fn end_of_interrupt(&mut self, irq: u8) {
        self.pic.end_of_interrupt(irq);
    }
}

impl DmaController for SimMachine {
    fn mask_channel(&mut self, channel: u8) {
        self.dma_ops += 1;
        self.dma[channel as usize].masked = true;
    }

    fn unmask_channel(&mut self, channel: u8) {
        self.dma_ops += 1;
        self.dma[channel as usize].masked = false;
    }

    fn set_mode(&mut self, channel: u8, mode: DmaMode) {
        self.dma_ops += 1;
        self.dma[channel as usize].mode = Some(mode);
    }

    fn load_count(&mut self, channel: u8, bytes: u32) {
        self.dma_ops += 1;
        let ch = &mut self.dma[channel as usize];
        ch.count = bytes;
        ch.remaining = bytes;
    }

    fn load_address(&mut self, channel: u8, phys: u32) {
        self.dma_ops += 1;
        self.dma[channel as usize].address = phys;
    }

    fn remaining_count(&mut self, channel: u8) -> u32 {
        self.dma_ops += 1;
        let ch = &self.dma[channel as usize];
        if ch.tc && self.faults.reload_count_on_tc {
            ch.count
        } else {
            ch.remaining
        }
    }

    fn terminal_count(&mut self, channel: u8) -> bool {
        self.dma_ops += 1;
        core::mem::take(&mut self.dma[channel as usize].tc)
    }
}

impl VectorTable for SimMachine {
    fn bind(&mut self, irq: u8, handler: Arc<dyn IrqSink>) -> Option<Arc<dyn IrqSink>> {
        self.vector_ops += 1;
        self.vectors[irq as usize].replace(handler)
    }

    fn restore(&mut self, irq: u8, prior: Option<Arc<dyn IrqSink>>) {
        self.vector_ops += 1;
        self.vectors[irq as usize] = prior;
    }
}

impl CpuInterrupts for SimMachine {
    fn suppress(&mut self) -> bool {
        core::mem::replace(&mut self.interrupts_enabled, false)
    }

    fn restore_interrupts(&mut self, was_enabled: bool) {
        if was_enabled {
            self.interrupts_enabled = true;
            self.deliver();
        }
    }
}

impl DmaMemory for SimMachine {
    fn dma_phys(&self) -> u32 {
        BOUNCE_PHYS
    }

    fn dma_buffer(&mut self) -> &mut [u8] {
        &mut self.bounce
    }

    fn dma_capacity(&self) -> usize {
        self.bounce.len()
    }
}
