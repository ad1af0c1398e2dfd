//! ARM64 (AArch64) architecture support
//!
//! The hypervisor runs at EL2. This module provides:
//! - the per-core control blocks and the control state machine
//! - exit handling and the trap dispatcher
//! - the PSCI emulator and the SMCCC pass-through
//! - the GICv2 and GICv3 backends with the virtual interrupt layer
//! - the stage-2 paging contract
//!
//! ## References
//! - [ARM Architecture Reference Manual ARMv8-A](https://developer.arm.com/documentation/ddi0487/latest)
//! - [ARM Generic Interrupt Controller Architecture Specification](https://developer.arm.com/documentation/ihi0069/latest)
//! - [Arm Power State Coordination Interface](https://developer.arm.com/documentation/den0022/latest)

pub mod cpu;
pub mod interrupt;
pub mod mmu;
pub mod psci;

pub use cpu::{Checkpoint, ExitAction, ExitReason, GuestRegisters, LocalCpu, PerCpu};
pub use interrupt::{IrqChip, Signal};
pub use mmu::{Stage2Context, Stage2Paging};
pub use psci::Firmware;

/// Architecture name
pub const ARCH_VERSION: &str = "arm64";
