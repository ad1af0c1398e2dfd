//! Architecture support
//!
//! The hypervisor runs at AArch64 EL2. `arm64` holds the control plane,
//! the trap dispatcher and the interrupt controller backends; `arm32` holds
//! the coprocessor emulation for AArch32 guests. Both are built on every
//! host so the logic can be unit-tested; instructions that only exist on
//! aarch64 are gated inside the modules.

pub mod arm32;
pub mod arm64;

use core::fmt;

/// Architecture-specific error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Interrupt id out of range for the operation
    InvalidIrq(u32),
    /// Interrupt controller not usable in the requested mode
    UnsupportedGic,
    /// Stage-2 setup failed in the paging collaborator
    Stage2,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidIrq(irq) => write!(f, "invalid irq {}", irq),
            Error::UnsupportedGic => f.write_str("unsupported interrupt controller"),
            Error::Stage2 => f.write_str("stage-2 setup failed"),
        }
    }
}
