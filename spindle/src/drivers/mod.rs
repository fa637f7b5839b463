//! Hardware device drivers

pub mod floppy;
#[cfg(target_arch = "x86_64")]
pub mod serial;

pub use floppy::Controller;
