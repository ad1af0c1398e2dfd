//! CPU module for ARM64
//!
//! This module provides the per-core side of the hypervisor:
//! - Per-core control blocks and the control state machine
//! - Guest register file and guest state reset
//! - System register access
//! - Exit and trap handling

pub mod control;
pub mod percpu;
pub mod regs;
pub mod reset;
pub mod sysreg;
pub mod vcpu;

pub use control::Checkpoint;
pub use percpu::{CpuStat, LifecycleState, PerCpu};
pub use regs::GuestRegisters;
pub use sysreg::{SysReg, SysRegs};
pub use vcpu::{ExitAction, ExitReason, TrapContext, TrapReturn};

/// State owned by the calling core while it handles an exit
///
/// The vector code saves the guest registers and hands them over together
/// with the system-register capability of the core. Nothing here is
/// visible to other cores.
pub struct LocalCpu<'a> {
    /// Physical id of the calling core
    pub id: usize,
    pub regs: &'a mut GuestRegisters,
    pub sysregs: &'a mut dyn SysRegs,
}

impl<'a> LocalCpu<'a> {
    pub fn new(id: usize, regs: &'a mut GuestRegisters, sysregs: &'a mut dyn SysRegs) -> Self {
        Self { id, regs, sysregs }
    }
}
