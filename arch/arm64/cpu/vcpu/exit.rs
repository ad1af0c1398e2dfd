//! Guest exit handling
//!
//! Entry point from the low-level vector code after the guest state has
//! been saved. Interrupt exits drain the acknowledge loop of the
//! interrupt controller; synchronous traps go to the trap dispatcher; the
//! remaining exit kinds are fatal for the guest of the core.

use super::context::TrapContext;
use crate::arch::arm64::cpu::control::Checkpoint;
use crate::arch::arm64::cpu::percpu::CpuStat;
use crate::arch::arm64::cpu::LocalCpu;
use crate::arch::arm64::interrupt::gic::is_sgi;
use crate::arch::arm64::interrupt::vgic::Signal;
use crate::kernel::vmm::Hypervisor;

/// Why the core left the guest, as reported by the vector code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Irq,
    Trap,
    Undef,
    DataAbort,
    PrefetchAbort,
    /// HVC issued by the hypervisor itself
    Hvc,
    Fiq,
    Unknown(u64),
}

impl ExitReason {
    /// Decode the exit code pushed by the vectors
    pub const fn from_raw(code: u64) -> Self {
        match code {
            1 => ExitReason::Undef,
            2 => ExitReason::Hvc,
            3 => ExitReason::PrefetchAbort,
            4 => ExitReason::DataAbort,
            5 => ExitReason::Trap,
            6 => ExitReason::Irq,
            7 => ExitReason::Fiq,
            other => ExitReason::Unknown(other),
        }
    }
}

/// What the core does after an exit has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// Return to the guest
    Resume,
    /// Enter the parking loop until the next power-on
    Park,
    /// Leave the hypervisor
    Shutdown,
    /// The guest was stopped after a fatal error; the core is parked
    Halt,
}

impl From<Checkpoint> for ExitAction {
    fn from(checkpoint: Checkpoint) -> Self {
        match checkpoint {
            // Guest state already points at the new entry.
            Checkpoint::Resume | Checkpoint::Reset { .. } => ExitAction::Resume,
            Checkpoint::Parked => ExitAction::Park,
            Checkpoint::Shutdown => ExitAction::Shutdown,
        }
    }
}

impl Hypervisor<'_> {
    /// Handle one guest exit on the calling core
    pub fn handle_exit(&self, local: &mut LocalCpu<'_>, reason: ExitReason) -> ExitAction {
        let cpu = self.cpu(local.id);
        cpu.count(CpuStat::VmExitsTotal);

        match reason {
            ExitReason::Irq => {
                cpu.count(CpuStat::VmExitsIrq);
                self.handle_irq(local)
            }
            ExitReason::Trap => self.handle_trap(TrapContext::new(local.id, local.regs, local.sysregs)),
            fatal => {
                log::error!("FATAL: unexpected exit {:?} on cpu {}", fatal, local.id);
                TrapContext::new(local.id, local.regs, local.sysregs).dump();
                self.halt_self(local.id, local.regs, local.sysregs)
            }
        }
    }

    fn handle_irq(&self, local: &mut LocalCpu<'_>) -> ExitAction {
        let mut action = ExitAction::Resume;

        while let Some(irq) = self.acknowledge(local.id) {
            let deactivate = if is_sgi(irq) {
                action = self.handle_sgi(local, irq);
                true
            } else {
                self.handle_phys_irq(local.id, irq)
            };
            self.acknowledge_and_complete(local.id, irq, deactivate);

            if action != ExitAction::Resume {
                break;
            }
        }
        action
    }

    fn handle_sgi(&self, local: &mut LocalCpu<'_>, irq: u32) -> ExitAction {
        let cpu = self.cpu(local.id);
        match Signal::from_irq(irq) {
            Some(Signal::InjectPending) => {
                cpu.count(CpuStat::VmExitsVsgi);
                self.inject_pending(local.id);
                ExitAction::Resume
            }
            Some(Signal::Management) | Some(Signal::CoreOff) => {
                cpu.count(CpuStat::VmExitsManagement);
                self.checkpoint(local).into()
            }
            None => {
                log::warn!("cpu {}: spurious SGI {}", local.id, irq);
                ExitAction::Resume
            }
        }
    }

    /// Returns true if the interrupt must be deactivated by the hypervisor
    fn handle_phys_irq(&self, cpu: usize, irq: u32) -> bool {
        if irq == self.config().gic.maintenance_irq {
            self.cpu(cpu).count(CpuStat::VmExitsMaintenance);
            self.inject_pending(cpu);
            return true;
        }
        // The guest deactivates it through the hardware-backed slot.
        self.cpu(cpu).count(CpuStat::VmExitsVirq);
        self.set_pending(cpu, cpu, irq);
        false
    }
}
