//! # Command Protocol Engine
//!
//! Every command runs the same cycle:
//!
//! ```text
//! Ready -> Sending -> [AwaitingCompletion] -> ReceivingResult -> Done
//!    \________\______________\____________________\______-> Faulted
//! ```
//!
//! Seek-class commands and DMA transfers wait on the completion counter
//! (with polling as the fallback); everything else goes straight from the
//! command phase to the result phase. A Seek, SeekRelative or Recalibrate
//! has no result phase of its own, so the engine follows it with a Sense
//! Interrupt Status to collect the new cylinder and clear the interrupt.
//!
//! Every failure after validation goes through [`Controller::fault`], which
//! resets the controller before handing the original error back. The engine
//! never retries on its own.

use heapless::Vec;

use crate::attunement::{without_interrupts, DmaDirection, Platform};

use super::command::{
    Command, CommandBytes, CommandClass, CompletedBy, Completion, Outcome, SectorRun,
    TransferBuffer, TransferRequest, MAX_RESULT_BYTES,
};
use super::completion::WaitResult;
use super::dma::{pio_transfer, wait_data_ready, wait_data_ready_ms, wait_status_ms, DmaChannel};
use super::error::FdcError;
use super::registers::{port, Drive, InterruptCode, MainStatus, St0, St1};
use super::Controller;

/// Seek-class completion wait
pub const SEEK_TIMEOUT_MS: u32 = 1000;

/// DMA transfer completion wait
pub const TRANSFER_TIMEOUT_MS: u32 = 10_000;

/// Wait for the result phase of an immediate command
pub const DATA_READY_TIMEOUT_MS: u32 = 1000;

/// Wait for BUSY to drop after the result phase
pub const BUSY_CLEAR_TIMEOUT_MS: u32 = 1000;

/// Motor spin-up before touching the media
pub const MOTOR_SPIN_UP_MS: u32 = 500;

/// Per-byte wait in the PIO execution phase
pub const PIO_BYTE_TIMEOUT_MS: u32 = 1000;

/// Wait for each sector's PIO execution phase to begin
pub const PIO_SECTOR_TIMEOUT_MS: u32 = 10_000;

/// Status polls after the result phase before checking BUSY
const TERMINATE_POLLS: u32 = 20;

/// Where the engine is in the current command
///
/// How far a failed send got is carried by [`FdcError::WriteTimeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Ready,
    Sending,
    AwaitingCompletion,
    ReceivingResult,
    Done,
    Faulted,
}

/// Result bytes read back from the controller
pub(crate) type ResultBytes = Vec<u8, MAX_RESULT_BYTES>;

/// Write command bytes through the FIFO
///
/// Each byte gets up to 1000 status polls to see RQM with DIO clear.
pub(crate) fn send_bytes<P: Platform + ?Sized>(hw: &mut P, base: u16, bytes: &[u8]) -> Result<(), FdcError> {
    for (written, byte) in bytes.iter().enumerate() {
        match wait_data_ready(hw, base) {
            Some(status) if status.can_write() => hw.outb(base + port::DATA, *byte),
            _ => {
                return Err(FdcError::WriteTimeout {
                    written,
                    total: bytes.len(),
                })
            }
        }
    }
    Ok(())
}

/// Read result bytes until the controller leaves the result phase
///
/// Stops at `max`, or when RQM comes back with DIO clear. Fewer than `min`
/// bytes is a `ResultTimeout`.
pub(crate) fn read_results<P: Platform + ?Sized>(
    hw: &mut P,
    base: u16,
    min: usize,
    max: usize,
) -> Result<ResultBytes, FdcError> {
    let mut result = ResultBytes::new();
    while result.len() < max.min(MAX_RESULT_BYTES) {
        match wait_data_ready(hw, base) {
            Some(status) if status.can_read() => {
                let byte = hw.inb(base + port::DATA);
                // Cannot overflow, the loop is bounded by capacity
                let _ = result.push(byte);
            }
            _ => break,
        }
    }
    if result.len() < min {
        return Err(FdcError::ResultTimeout);
    }
    Ok(result)
}

/// The command should now be over: BUSY must drop within a second
pub(crate) fn wait_terminated<P: Platform + ?Sized>(hw: &mut P, base: u16) -> Result<(), FdcError> {
    for _ in 0..TERMINATE_POLLS {
        if MainStatus::read(hw, base).data_ready() {
            break;
        }
    }
    if wait_status_ms(hw, base, BUSY_CLEAR_TIMEOUT_MS, |status| !status.busy()) {
        Ok(())
    } else {
        Err(FdcError::ResultTimeout)
    }
}

/// Send a command that needs no interrupt and collect its result
pub(crate) fn transact_polled<P: Platform + ?Sized>(
    hw: &mut P,
    base: u16,
    bytes: &[u8],
    min: usize,
    max: usize,
) -> Result<ResultBytes, FdcError> {
    without_interrupts(hw, |hw| send_bytes(hw, base, bytes))?;
    if max > 0 && !wait_data_ready_ms(hw, base, DATA_READY_TIMEOUT_MS) {
        return Err(FdcError::ResultTimeout);
    }
    let result = without_interrupts(hw, |hw| read_results(hw, base, min, max))?;
    wait_terminated(hw, base)?;
    Ok(result)
}

/// How the completion of a seek-class command is recognised by polling:
/// RQM set and the drive no longer stepping
fn seek_settled(status: MainStatus, drive: Drive) -> bool {
    status.data_ready() && !status.seeking(drive)
}

/// Whether ST0..ST2 describe a failed command
///
/// A data command that ran to the last sector without a terminal count
/// (always the case under PIO) ends "abnormally" with only End of Cylinder
/// set. That is how a successful run looks, not an error.
fn abnormal(status: [u8; 3], class: CommandClass) -> bool {
    let st0 = St0::from_bits_truncate(status[0]);
    match st0.interrupt_code() {
        InterruptCode::Normal => false,
        InterruptCode::Abnormal => {
            let end_of_cylinder_only = status[1] == St1::END_OF_CYLINDER.bits() && status[2] == 0;
            !(class == CommandClass::Transfer && end_of_cylinder_only)
        }
        InterruptCode::InvalidCommand | InterruptCode::AbnormalPolling => true,
    }
}

impl<P: Platform> Controller<P> {
    /// Run a command that carries no payload
    pub fn execute(&mut self, command: Command) -> Outcome {
        self.submit(command, None)
    }

    /// Run ReadSector or WriteSector with its payload
    pub fn execute_transfer(&mut self, command: Command, request: TransferRequest<'_>) -> Outcome {
        self.submit(command, Some(request))
    }

    fn submit(&mut self, command: Command, mut request: Option<TransferRequest<'_>>) -> Outcome {
        // Nothing below may touch hardware until the request is known good
        match (command.transfer(), &request) {
            (Some(_), None) => return Err(FdcError::InvalidParameters("data command without a buffer")),
            (None, Some(_)) => return Err(FdcError::InvalidParameters("buffer given to a command without data")),
            (Some(_), Some(request)) => request.validate(&command, self.hw.dma_capacity())?,
            (None, None) => {}
        }
        let drive = self.selected_drive();
        let bytes = command.encode(drive, self.flags)?;

        let notice = self.check_degraded();
        self.phase = Phase::Ready;
        log::trace!("fdc {:#x}: {:?} on drive {}", self.base, command, drive.index());

        match self.run(command, &bytes, request.as_mut()) {
            Ok(mut completion) => {
                self.phase = Phase::Done;
                let notice = notice.or_else(|| self.check_degraded());
                if notice.is_some() {
                    self.storm_reported = true;
                }
                completion.notice = notice;
                Ok(completion)
            }
            Err(error) => Err(self.fault(command, error)),
        }
    }

    /// The single recovery entry point for a failed command
    pub(crate) fn fault(&mut self, command: Command, error: FdcError) -> FdcError {
        log::warn!("fdc {:#x}: {:?} failed: {}", self.base, command, error);
        if let Some(dma) = self.dma {
            dma.mask(&mut self.hw);
        }
        self.sync.disarm();
        self.reset();
        self.phase = Phase::Faulted;
        error
    }

    fn run(
        &mut self,
        command: Command,
        bytes: &CommandBytes,
        request: Option<&mut TransferRequest<'_>>,
    ) -> Outcome {
        let drive = self.selected_drive();
        let class = command.class();

        if command.needs_motor() {
            self.spin_up(drive);
        }
        self.ensure_accepting();

        // `submit` pairs every data command with its request
        if let (Some((run, _)), Some(request)) = (command.transfer(), request) {
            self.ensure_specified(!self.use_dma)?;
            return self.run_transfer(bytes, run, request);
        }

        let interrupting = self.use_dma && class == CommandClass::Seek;
        self.send(bytes, interrupting, None)?;

        let completed_by = match class {
            CommandClass::Seek => {
                self.phase = Phase::AwaitingCompletion;
                self.await_completion(SEEK_TIMEOUT_MS, move |status| seek_settled(status, drive))?
            }
            _ => {
                let (_, max) = command.result_len();
                if max > 0 && !wait_data_ready_ms(&mut self.hw, self.base, DATA_READY_TIMEOUT_MS) {
                    return Err(FdcError::ResultTimeout);
                }
                CompletedBy::Polling
            }
        };

        let (min, max) = command.result_len();
        let mut result = self.receive(min, max)?;
        wait_terminated(&mut self.hw, self.base)?;

        match command {
            Command::Recalibrate | Command::Seek(_) | Command::SeekRelative(_) => {
                result = self.sense_after_seek()?;
            }
            Command::SenseInterruptStatus => {
                self.status.raw[0] = result[0];
                if let Some(cylinder) = result.get(1) {
                    self.cylinder = *cylinder;
                }
            }
            Command::SenseDriveStatus => self.status.raw[3] = result[0],
            Command::ReadSectorID { .. } => {
                self.absorb_transfer_status(&result);
                if abnormal([result[0], result[1], result[2]], class) {
                    return Err(FdcError::AbnormalTermination {
                        st0: result[0],
                        st1: result[1],
                        st2: result[2],
                    });
                }
            }
            Command::Version => self.version = Some(result[0]),
            Command::Specify { non_dma, .. } => self.specified_non_dma = Some(non_dma),
            Command::ReadSector(_) | Command::WriteSector(_) => {}
        }

        Ok(Completion {
            result,
            status: self.status,
            transferred: 0,
            completed_by,
            notice: None,
        })
    }

    /// Issue the Sense Interrupt Status a seek leaves owing
    fn sense_after_seek(&mut self) -> Result<ResultBytes, FdcError> {
        let bytes = Command::SenseInterruptStatus.encode(self.selected_drive(), self.flags)?;
        let result = transact_polled(&mut self.hw, self.base, &bytes, 2, 2)?;
        self.status.raw[0] = result[0];
        self.cylinder = result[1];
        if abnormal([result[0], 0, 0], CommandClass::Seek) {
            return Err(FdcError::AbnormalTermination {
                st0: result[0],
                st1: 0,
                st2: 0,
            });
        }
        Ok(result)
    }

    fn run_transfer(
        &mut self,
        bytes: &CommandBytes,
        run: SectorRun,
        request: &mut TransferRequest<'_>,
    ) -> Outcome {
        let length = request.length;
        let direction = request.direction();

        let (completed_by, moved) = match self.dma.filter(|_| self.use_dma) {
            Some(channel) => {
                if let TransferBuffer::Write(source) = &request.buffer {
                    self.hw.dma_buffer()[..length].copy_from_slice(&source[..length]);
                }
                let phys = self.hw.dma_phys();
                self.send(bytes, true, Some((channel, direction, phys, length)))?;

                self.phase = Phase::AwaitingCompletion;
                let completed_by = self.await_completion(TRANSFER_TIMEOUT_MS, |status| status.can_read())?;
                if !wait_data_ready_ms(&mut self.hw, self.base, DATA_READY_TIMEOUT_MS) {
                    return Err(FdcError::ResultTimeout);
                }
                (completed_by, None)
            }
            None => {
                self.send(bytes, false, None)?;
                self.phase = Phase::AwaitingCompletion;
                let moved = self.pio_sectors(run, request);
                if moved != length {
                    return Err(FdcError::ShortTransfer {
                        expected: length,
                        actual: moved,
                    });
                }
                (CompletedBy::Polling, Some(moved))
            }
        };

        let result = self.receive(MAX_RESULT_BYTES, MAX_RESULT_BYTES)?;
        wait_terminated(&mut self.hw, self.base)?;
        self.absorb_transfer_status(&result);

        let transferred = match (moved, self.dma) {
            (Some(moved), _) => moved,
            (None, Some(channel)) => {
                let actual = channel.actual_transferred(&mut self.hw, length);
                if let TransferBuffer::Read(destination) = &mut request.buffer {
                    destination[..actual].copy_from_slice(&self.hw.dma_buffer()[..actual]);
                }
                actual
            }
            (None, None) => 0,
        };

        if abnormal([result[0], result[1], result[2]], CommandClass::Transfer) {
            return Err(FdcError::AbnormalTermination {
                st0: result[0],
                st1: result[1],
                st2: result[2],
            });
        }
        if transferred < length {
            return Err(FdcError::ShortTransfer {
                expected: length,
                actual: transferred,
            });
        }

        log::debug!(
            "fdc {:#x}: {} bytes {} C/H/S {}/{}/{}",
            self.base,
            transferred,
            match direction {
                DmaDirection::ToMemory => "read",
                DmaDirection::FromMemory => "written",
            },
            run.cylinder,
            run.head,
            run.sector
        );

        Ok(Completion {
            result,
            status: self.status,
            transferred,
            completed_by,
            notice: None,
        })
    }

    /// Step each sector through the FIFO; returns bytes moved before the
    /// first stall
    fn pio_sectors(&mut self, run: SectorRun, request: &mut TransferRequest<'_>) -> usize {
        let base = self.base;
        let length = request.length;
        let sector_bytes = run.sector_bytes();
        let mut moved = 0;

        while moved + sector_bytes <= length {
            wait_data_ready_ms(&mut self.hw, base, PIO_SECTOR_TIMEOUT_MS);

            let chunk = moved..moved + sector_bytes;
            let sector = match &mut request.buffer {
                TransferBuffer::Read(destination) => TransferBuffer::Read(&mut destination[chunk]),
                TransferBuffer::Write(source) => TransferBuffer::Write(&source[chunk]),
            };
            let count = without_interrupts(&mut self.hw, |hw| {
                pio_transfer(hw, base, sector, PIO_BYTE_TIMEOUT_MS)
            });

            moved += count;
            if count != sector_bytes {
                break;
            }
        }
        moved
    }

    /// Put command bytes on the wire, arming DMA and the completion counter
    /// in the same interrupts-off window when the command will interrupt
    fn send(
        &mut self,
        bytes: &CommandBytes,
        interrupting: bool,
        dma: Option<(DmaChannel, DmaDirection, u32, usize)>,
    ) -> Result<(), FdcError> {
        self.phase = Phase::Sending;
        let base = self.base;
        let sync = &mut self.sync;
        let line = self.line.as_deref();

        without_interrupts(&mut self.hw, |hw| {
            if let Some((channel, direction, phys, length)) = dma {
                channel.begin(hw, direction, phys, length);
            }
            if interrupting {
                if let Some(line) = line {
                    sync.arm(line);
                }
            }
            send_bytes(hw, base, bytes)
        })
    }

    fn await_completion<F>(&mut self, timeout_ms: u32, ready: F) -> Result<CompletedBy, FdcError>
    where
        F: Fn(MainStatus) -> bool,
    {
        let base = self.base;
        let line = if self.use_dma { self.line.as_deref() } else { None };
        let waited = self.sync.wait(&mut self.hw, line, timeout_ms, |hw| {
            ready(MainStatus::read(hw, base))
        });
        match waited {
            WaitResult::Interrupt => Ok(CompletedBy::Interrupt),
            WaitResult::Polled => Ok(CompletedBy::Polling),
            WaitResult::TimedOut => Err(FdcError::ResultTimeout),
        }
    }

    fn receive(&mut self, min: usize, max: usize) -> Result<ResultBytes, FdcError> {
        self.phase = Phase::ReceivingResult;
        let base = self.base;
        without_interrupts(&mut self.hw, |hw| read_results(hw, base, min, max))
    }

    fn absorb_transfer_status(&mut self, result: &[u8]) {
        self.status.raw[..3].copy_from_slice(&result[..3]);
        self.cylinder = result[3];
    }

    /// Start the drive motor if it is off and give it time to come up to speed
    fn spin_up(&mut self, drive: Drive) {
        if !self.mirror.digital_output().motor_on(drive) {
            log::debug!("fdc {:#x}: spinning up drive {}", self.base, drive.index());
            self.mirror.set_motor(&mut self.hw, drive, true);
            self.hw.delay_ms(MOTOR_SPIN_UP_MS);
        }
    }

    /// A controller that is busy or will not take a byte gets reset first
    fn ensure_accepting(&mut self) {
        let status = self.main_status();
        if !status.can_write() || status.busy() {
            log::debug!(
                "fdc {:#x}: not accepting commands (MSR={:#04x}), resetting",
                self.base,
                status.bits()
            );
            self.reset();
        }
    }

    /// Tell the controller which data path to use, if it does not know yet
    fn ensure_specified(&mut self, non_dma: bool) -> Result<(), FdcError> {
        if self.specified_non_dma == Some(non_dma) {
            return Ok(());
        }
        self.specify(non_dma)
    }

    pub(crate) fn specify(&mut self, non_dma: bool) -> Result<(), FdcError> {
        let bytes = Command::standard_specify(non_dma).encode(self.selected_drive(), self.flags)?;
        transact_polled(&mut self.hw, self.base, &bytes, 0, 0)?;
        self.specified_non_dma = Some(non_dma);
        Ok(())
    }
}
