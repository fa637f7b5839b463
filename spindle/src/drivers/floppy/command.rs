//! Commands, transfer requests and their outcomes
//!
//! Building a [`Command`] never touches hardware. [`Command::encode`] turns
//! it into the exact byte sequence the controller expects for the selected
//! drive, rejecting parameters that cannot be encoded.

use crate::attunement::DmaDirection;

use super::error::FdcError;
use super::registers::{Drive, StatusRegisters};

/// Longest command (Read/Write Data)
pub const MAX_COMMAND_BYTES: usize = 9;

/// Longest result phase (Read/Write Data, Read ID)
pub const MAX_RESULT_BYTES: usize = 7;

/// Command opcodes, low five bits of the first byte
mod opcode {
    pub const SPECIFY: u8 = 0x03;
    pub const SENSE_DRIVE_STATUS: u8 = 0x04;
    pub const WRITE_DATA: u8 = 0x05;
    pub const READ_DATA: u8 = 0x06;
    pub const RECALIBRATE: u8 = 0x07;
    pub const SENSE_INTERRUPT: u8 = 0x08;
    pub const READ_ID: u8 = 0x0A;
    pub const SEEK: u8 = 0x0F;
    pub const VERSION: u8 = 0x10;
    /// Seek with the RS bit set; bit 6 selects stepping towards cylinder 0
    pub const RELATIVE_SEEK: u8 = 0x8F;
    pub const RELATIVE_SEEK_OUTWARD: u8 = 0x40;

    pub const MULTI_TRACK: u8 = 0x80;
    pub const MFM: u8 = 0x40;
}

/// GAP3 length for 3.5" and 5.25" MFM media
pub const GAP3_LENGTH: u8 = 0x1B;

/// Data length, ignored whenever the size code is non-zero
pub const DATA_LENGTH_UNUSED: u8 = 0xFF;

/// Largest size code the controller accepts (16 KiB sectors)
pub const MAX_SIZE_CODE: u8 = 7;

/// Per-controller encoding toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFlags {
    /// Continue from head 0 onto head 1 within one data command
    pub multi_track: bool,
    /// MFM (double density) rather than FM
    pub mfm: bool,
}

impl Default for CommandFlags {
    fn default() -> Self {
        CommandFlags {
            multi_track: true,
            mfm: true,
        }
    }
}

/// Where on the disk a data command starts, and how far it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRun {
    pub cylinder: u8,
    pub head: u8,
    /// First sector, 1-based
    pub sector: u8,
    /// Sector size as `128 << size_code` bytes
    pub size_code: u8,
    pub count: u8,
}

impl SectorRun {
    /// Saturates for size codes no controller accepts
    pub fn sector_bytes(&self) -> usize {
        128usize
            .checked_shl(self.size_code as u32)
            .unwrap_or(usize::MAX)
    }

    /// Total payload for the run
    pub fn byte_len(&self) -> usize {
        (self.count as usize).saturating_mul(self.sector_bytes())
    }

    /// Sector number the controller stops after
    fn last_sector(&self) -> Result<u8, FdcError> {
        u8::try_from(self.sector as u16 + self.count as u16 - 1)
            .map_err(|_| FdcError::InvalidParameters("sector run past sector 255"))
    }

    fn validate(&self) -> Result<(), FdcError> {
        if self.head > 1 {
            return Err(FdcError::InvalidParameters("head must be 0 or 1"));
        }
        if self.sector == 0 {
            return Err(FdcError::InvalidParameters("sectors are numbered from 1"));
        }
        if self.count == 0 {
            return Err(FdcError::InvalidParameters("sector count is zero"));
        }
        if self.size_code > MAX_SIZE_CODE {
            return Err(FdcError::InvalidParameters("size code above 7"));
        }
        self.last_sector().map(|_| ())
    }
}

/// A controller command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Step the head out to cylinder 0
    Recalibrate,
    Seek(u8),
    /// Step by a signed number of cylinders (negative is towards cylinder 0)
    SeekRelative(i16),
    SenseInterruptStatus,
    SenseDriveStatus,
    ReadSectorID { head: u8 },
    ReadSector(SectorRun),
    WriteSector(SectorRun),
    /// Step rate, head unload and head load times in controller units
    Specify {
        step_rate: u8,
        head_unload: u8,
        head_load: u8,
        non_dma: bool,
    },
    Version,
}

/// Encoded command bytes
pub type CommandBytes = heapless::Vec<u8, MAX_COMMAND_BYTES>;

/// Command class, which decides the completion path and its timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Moves the head; interrupts, then needs a Sense Interrupt Status
    Seek,
    /// Reads or writes sector data
    Transfer,
    /// Answers from the result phase straight away
    Immediate,
}

impl Command {
    /// Specify values for a 1.44M drive at 500 kbit/s
    pub const fn standard_specify(non_dma: bool) -> Command {
        Command::Specify {
            step_rate: 0x0D,
            head_unload: 0x0F,
            head_load: 0x01,
            non_dma,
        }
    }

    pub fn class(&self) -> CommandClass {
        match self {
            Command::Recalibrate | Command::Seek(_) | Command::SeekRelative(_) => CommandClass::Seek,
            Command::ReadSector(_) | Command::WriteSector(_) => CommandClass::Transfer,
            _ => CommandClass::Immediate,
        }
    }

    /// The sector run and data direction of a data command
    pub fn transfer(&self) -> Option<(SectorRun, DmaDirection)> {
        match *self {
            Command::ReadSector(run) => Some((run, DmaDirection::ToMemory)),
            Command::WriteSector(run) => Some((run, DmaDirection::FromMemory)),
            _ => None,
        }
    }

    /// Whether the drive motor must be spinning first
    pub fn needs_motor(&self) -> bool {
        matches!(self.class(), CommandClass::Seek | CommandClass::Transfer)
    }

    /// Fewest and most result bytes this command produces
    pub fn result_len(&self) -> (usize, usize) {
        match self {
            Command::Recalibrate
            | Command::Seek(_)
            | Command::SeekRelative(_)
            | Command::Specify { .. } => (0, 0),
            // A lone 0x80 means nothing was pending
            Command::SenseInterruptStatus => (1, 2),
            Command::SenseDriveStatus | Command::Version => (1, 1),
            Command::ReadSectorID { .. } | Command::ReadSector(_) | Command::WriteSector(_) => {
                (MAX_RESULT_BYTES, MAX_RESULT_BYTES)
            }
        }
    }

    /// Check parameters without encoding
    pub fn validate(&self) -> Result<(), FdcError> {
        match self {
            Command::SeekRelative(offset) if offset.unsigned_abs() > u8::MAX as u16 => {
                Err(FdcError::InvalidParameters("relative seek beyond 255 cylinders"))
            }
            Command::ReadSectorID { head } if *head > 1 => {
                Err(FdcError::InvalidParameters("head must be 0 or 1"))
            }
            Command::ReadSector(run) | Command::WriteSector(run) => run.validate(),
            Command::Specify {
                step_rate,
                head_unload,
                head_load,
                ..
            } if *step_rate > 0x0F || *head_unload > 0x0F || *head_load > 0x7F => {
                Err(FdcError::InvalidParameters("specify timing out of range"))
            }
            _ => Ok(()),
        }
    }

    /// Byte sequence addressed to `drive`
    pub fn encode(&self, drive: Drive, flags: CommandFlags) -> Result<CommandBytes, FdcError> {
        self.validate()?;

        let unit = |head: u8| drive.index() | ((head & 1) << 2);
        let data_header = |op: u8| {
            let mut header = op;
            if flags.multi_track {
                header |= opcode::MULTI_TRACK;
            }
            if flags.mfm {
                header |= opcode::MFM;
            }
            header
        };

        let mut bytes = CommandBytes::new();
        let mut push = |slice: &[u8]| {
            bytes
                .extend_from_slice(slice)
                .map_err(|_| FdcError::InvalidParameters("command too long"))
        };

        match *self {
            Command::Recalibrate => push(&[opcode::RECALIBRATE, drive.index()])?,
            Command::Seek(cylinder) => push(&[opcode::SEEK, unit(0), cylinder])?,
            Command::SeekRelative(offset) => {
                let mut op = opcode::RELATIVE_SEEK;
                if offset < 0 {
                    op |= opcode::RELATIVE_SEEK_OUTWARD;
                }
                push(&[op, drive.index(), offset.unsigned_abs() as u8])?
            }
            Command::SenseInterruptStatus => push(&[opcode::SENSE_INTERRUPT])?,
            Command::SenseDriveStatus => push(&[opcode::SENSE_DRIVE_STATUS, unit(0)])?,
            Command::ReadSectorID { head } => {
                let op = if flags.mfm {
                    opcode::READ_ID | opcode::MFM
                } else {
                    opcode::READ_ID
                };
                push(&[op, unit(head)])?
            }
            Command::ReadSector(run) | Command::WriteSector(run) => {
                let op = if matches!(self, Command::ReadSector(_)) {
                    opcode::READ_DATA
                } else {
                    opcode::WRITE_DATA
                };
                push(&[
                    data_header(op),
                    unit(run.head),
                    run.cylinder,
                    run.head,
                    run.sector,
                    run.size_code,
                    run.last_sector()?,
                    GAP3_LENGTH,
                    DATA_LENGTH_UNUSED,
                ])?
            }
            Command::Specify {
                step_rate,
                head_unload,
                head_load,
                non_dma,
            } => push(&[
                opcode::SPECIFY,
                (step_rate << 4) | head_unload,
                (head_load << 1) | non_dma as u8,
            ])?,
            Command::Version => push(&[opcode::VERSION])?,
        }

        Ok(bytes)
    }
}

/// Caller-owned payload for a data command
#[derive(Debug)]
pub enum TransferBuffer<'a> {
    /// Destination of a ReadSector
    Read(&'a mut [u8]),
    /// Source of a WriteSector
    Write(&'a [u8]),
}

/// Payload description for ReadSector and WriteSector
#[derive(Debug)]
pub struct TransferRequest<'a> {
    /// Bytes to move; the buffer may be longer
    pub length: usize,
    pub buffer: TransferBuffer<'a>,
}

impl<'a> TransferRequest<'a> {
    /// Read into the whole of `buffer`
    pub fn read(buffer: &'a mut [u8]) -> Self {
        TransferRequest {
            length: buffer.len(),
            buffer: TransferBuffer::Read(buffer),
        }
    }

    /// Write the whole of `buffer`
    pub fn write(buffer: &'a [u8]) -> Self {
        TransferRequest {
            length: buffer.len(),
            buffer: TransferBuffer::Write(buffer),
        }
    }

    pub fn direction(&self) -> DmaDirection {
        match self.buffer {
            TransferBuffer::Read(_) => DmaDirection::ToMemory,
            TransferBuffer::Write(_) => DmaDirection::FromMemory,
        }
    }

    fn buffer_len(&self) -> usize {
        match &self.buffer {
            TransferBuffer::Read(buffer) => buffer.len(),
            TransferBuffer::Write(buffer) => buffer.len(),
        }
    }

    /// Check the request against the command it accompanies and the bounce
    /// buffer it must fit through
    pub fn validate(&self, command: &Command, capacity: usize) -> Result<(), FdcError> {
        command.validate()?;
        let (run, direction) = command
            .transfer()
            .ok_or(FdcError::InvalidParameters("command carries no data"))?;
        if direction != self.direction() {
            return Err(FdcError::InvalidParameters("buffer direction does not match command"));
        }
        if self.length != run.byte_len() {
            return Err(FdcError::InvalidParameters("length is not count * sector size"));
        }
        if self.length > self.buffer_len() {
            return Err(FdcError::InvalidParameters("buffer shorter than length"));
        }
        if self.length > capacity {
            return Err(FdcError::InvalidParameters("length exceeds DMA buffer"));
        }
        Ok(())
    }
}

/// How a command's completion was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedBy {
    Interrupt,
    Polling,
}

/// A successfully completed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Result-phase bytes (for seeks, the Sense Interrupt Status answer)
    pub result: heapless::Vec<u8, MAX_RESULT_BYTES>,
    /// ST0..ST3 after this command
    pub status: StatusRegisters,
    /// Payload bytes moved
    pub transferred: usize,
    pub completed_by: CompletedBy,
    /// Something the caller should know that did not stop the command
    pub notice: Option<FdcError>,
}

/// What `execute` hands back
pub type Outcome = Result<Completion, FdcError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn run(sector: u8, count: u8) -> SectorRun {
        SectorRun {
            cylinder: 0,
            head: 0,
            sector,
            size_code: 2,
            count,
        }
    }

    #[test]
    fn test_read_sector_encoding() {
        let bytes = Command::ReadSector(run(1, 2))
            .encode(Drive::A, CommandFlags::default())
            .unwrap();
        assert_eq!(bytes.as_slice(), &[0xC6, 0x00, 0, 0, 1, 2, 2, 0x1B, 0xFF]);
    }

    #[test]
    fn test_single_sector_stops_at_itself() {
        let bytes = Command::WriteSector(SectorRun {
            cylinder: 5,
            head: 1,
            sector: 9,
            size_code: 2,
            count: 1,
        })
        .encode(Drive::B, CommandFlags { multi_track: false, mfm: true })
        .unwrap();
        assert_eq!(bytes.as_slice(), &[0x45, 0x05, 5, 1, 9, 2, 9, 0x1B, 0xFF]);
    }

    #[test]
    fn test_seek_encodings() {
        let flags = CommandFlags::default();
        assert_eq!(Command::Seek(40).encode(Drive::C, flags).unwrap().as_slice(), &[0x0F, 0x02, 40]);
        assert_eq!(Command::SeekRelative(3).encode(Drive::A, flags).unwrap().as_slice(), &[0x8F, 0, 3]);
        assert_eq!(Command::SeekRelative(-3).encode(Drive::A, flags).unwrap().as_slice(), &[0xCF, 0, 3]);
        assert_eq!(Command::Recalibrate.encode(Drive::D, flags).unwrap().as_slice(), &[0x07, 3]);
    }

    #[test]
    fn test_specify_encoding() {
        let bytes = Command::standard_specify(true)
            .encode(Drive::A, CommandFlags::default())
            .unwrap();
        assert_eq!(bytes.as_slice(), &[0x03, 0xDF, 0x03]);
    }

    #[test]
    fn test_relative_seek_range() {
        assert!(Command::SeekRelative(255).validate().is_ok());
        assert!(matches!(
            Command::SeekRelative(-256).validate(),
            Err(FdcError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_run_past_sector_255_rejected() {
        assert!(matches!(
            Command::ReadSector(run(250, 10)).validate(),
            Err(FdcError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_request_length_must_match_run() {
        let mut buffer = [0u8; 1000];
        let request = TransferRequest::read(&mut buffer);
        assert!(matches!(
            request.validate(&Command::ReadSector(run(1, 2)), 4096),
            Err(FdcError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_request_direction_must_match() {
        let buffer = [0u8; 1024];
        let request = TransferRequest::write(&buffer);
        assert!(request.validate(&Command::WriteSector(run(1, 2)), 4096).is_ok());
        assert!(request.validate(&Command::ReadSector(run(1, 2)), 4096).is_err());
        assert!(request.validate(&Command::WriteSector(run(1, 2)), 512).is_err());
    }

    #[test]
    fn test_oversized_size_code_rejected() {
        let huge = SectorRun {
            size_code: 64,
            ..run(1, 1)
        };
        assert_eq!(huge.sector_bytes(), usize::MAX);
        assert_eq!(huge.byte_len(), usize::MAX);

        let mut buffer = [0u8; 512];
        let request = TransferRequest::read(&mut buffer);
        assert!(matches!(
            request.validate(&Command::ReadSector(huge), 4096),
            Err(FdcError::InvalidParameters(_))
        ));
    }
}
