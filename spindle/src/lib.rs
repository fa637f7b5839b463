//! # Spindle - Floppy Disk Controller Driver
//!
//! A `no_std` driver for the PC's 82077AA-compatible floppy disk controller.
//! The driver itself only knows the traits in [`attunement`]; on x86_64 the
//! same module also provides the real PC hardware behind them.
//!
//! The embedding kernel supplies the global allocator and the interrupt
//! stubs that call [`attunement::vectors::dispatch`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod attunement;
pub mod drivers;
#[cfg(target_arch = "x86_64")]
pub mod logger;

pub use drivers::floppy::{
    discover, discover_standard, probe, Command, Completion, Controller, FdcError, Outcome,
    SectorRun, TransferRequest,
};
