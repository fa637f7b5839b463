//! Floppy driver failures

use thiserror::Error;

/// Why a command did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FdcError {
    /// The controller never became ready to accept a command byte
    #[error("controller not ready for command byte {written} of {total}")]
    WriteTimeout { written: usize, total: usize },

    /// The command was accepted but its result never became ready
    #[error("controller did not produce a result")]
    ResultTimeout,

    /// Fewer payload bytes moved than requested
    #[error("short transfer: {actual} of {expected} bytes")]
    ShortTransfer { expected: usize, actual: usize },

    /// The controller reported a failure in its status bytes
    #[error("abnormal termination (ST0={st0:#04x} ST1={st1:#04x} ST2={st2:#04x})")]
    AbnormalTermination { st0: u8, st1: u8, st2: u8 },

    /// Interrupt-driven operation was disabled after a storm on `irq`
    #[error("interrupt storm on IRQ {irq}, falling back to polling")]
    InterruptStormDegraded { irq: u8 },

    /// The command or transfer request was rejected before touching hardware
    #[error("invalid parameters: {0}")]
    InvalidParameters(&'static str),
}

impl FdcError {
    /// Whether this error left the controller reset
    pub fn caused_reset(&self) -> bool {
        !matches!(
            self,
            FdcError::InvalidParameters(_) | FdcError::InterruptStormDegraded { .. }
        )
    }
}
