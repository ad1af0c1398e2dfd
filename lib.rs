//! Cellvisor - control core of a static partitioning hypervisor
//!
//! The machine is split into cells, each owning a fixed set of physical
//! cores. This crate holds the code that runs on every core when it leaves
//! guest execution:
//!
//! - the per-core control state machine (suspend, resume, park, reset)
//! - the trap dispatcher and its CP15, HVC and SMC emulation
//! - the PSCI power emulator
//! - the virtual interrupt controller on top of a GICv2 or GICv3
//!
//! Stage-2 paging, the boot trampoline, configuration parsing and console
//! drivers are collaborators reached through the traits in
//! [`arch::arm64::mmu`], [`arch::arm64::psci::smccc`] and [`utils::log`].

#![cfg_attr(not(test), no_std)]

// Core modules
pub mod utils;
pub mod config;

// Architecture-specific code
pub mod arch;

// Hypervisor-wide state: locks, cells, the control plane aggregate
pub mod kernel;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use arch::arm64::cpu::{ExitAction, ExitReason, GuestRegisters, LocalCpu};
pub use config::{GicConfig, HypervisorConfig, SystemConfig};
pub use kernel::vmm::{CellConfig, CellId, GuestMode, Hypervisor, Platform, ROOT_CELL};

/// Cellvisor version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common error type for Cellvisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Invalid argument
    InvalidArgument,
    /// Not found
    NotFound,
    /// Permission denied
    PermissionDenied,
    /// Resource busy
    ResourceBusy,
    /// Resource unavailable
    ResourceUnavailable,
    /// Not initialized
    NotInitialized,
    /// Invalid state
    InvalidState,
    /// Architecture-specific error
    ArchError(arch::Error),
}

impl From<arch::Error> for Error {
    fn from(err: arch::Error) -> Self {
        Error::ArchError(err)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidArgument => f.write_str("invalid argument"),
            Error::NotFound => f.write_str("not found"),
            Error::PermissionDenied => f.write_str("permission denied"),
            Error::ResourceBusy => f.write_str("resource busy"),
            Error::ResourceUnavailable => f.write_str("resource unavailable"),
            Error::NotInitialized => f.write_str("not initialized"),
            Error::InvalidState => f.write_str("invalid state"),
            Error::ArchError(err) => write!(f, "arch: {}", err),
        }
    }
}

/// Result type alias
pub type Result<T> = core::result::Result<T, Error>;
