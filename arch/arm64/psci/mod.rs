//! PSCI (Power State Coordination Interface) emulation for ARM64
//!
//! Guests turn their cores on and off through PSCI calls, trapped as SMC
//! or HVC. The emulator maps them onto control requests against the
//! physical cores of the calling cell. Reference: ARM DEN 0022D.
//!
//! Only the calls needed to bring secondary cores up and down are
//! emulated:
//! - PSCI_VERSION
//! - CPU_OFF
//! - CPU_ON
//! - AFFINITY_INFO
//!
//! Everything else returns NOT_SUPPORTED. Target cores are named by
//! virtual MPIDR and resolved only within the caller's cell.

pub mod smccc;

pub use smccc::{is_psci_call, Firmware};

use crate::arch::arm64::cpu::percpu::{ControlRequests, CpuStat};
use crate::arch::arm64::cpu::vcpu::TrapContext;
use crate::kernel::vmm::Hypervisor;

/// PSCI v0.2 function base
pub const PSCI_0_2_FN_BASE: u32 = 0x84000000;

/// PSCI v0.2 64-bit function offset
pub const PSCI_0_2_64BIT: u32 = 0x40000000;

/// PSCI v0.2 64-bit function base
pub const PSCI_0_2_FN64_BASE: u32 = PSCI_0_2_FN_BASE + PSCI_0_2_64BIT;

/// PSCI function ID constructor
pub const fn psci_0_2_fn(n: u32) -> u32 {
    PSCI_0_2_FN_BASE + n
}

/// PSCI 64-bit function ID constructor
pub const fn psci_0_2_fn64(n: u32) -> u32 {
    PSCI_0_2_FN64_BASE + n
}

pub const PSCI_0_2_FN_PSCI_VERSION: u32 = psci_0_2_fn(0);
pub const PSCI_0_2_FN_CPU_SUSPEND: u32 = psci_0_2_fn(1);
pub const PSCI_0_2_FN_CPU_OFF: u32 = psci_0_2_fn(2);
pub const PSCI_0_2_FN_CPU_ON: u32 = psci_0_2_fn(3);
pub const PSCI_0_2_FN_AFFINITY_INFO: u32 = psci_0_2_fn(4);
pub const PSCI_0_2_FN_SYSTEM_OFF: u32 = psci_0_2_fn(8);
pub const PSCI_0_2_FN_SYSTEM_RESET: u32 = psci_0_2_fn(9);

pub const PSCI_0_2_FN64_CPU_ON: u32 = psci_0_2_fn64(3);
pub const PSCI_0_2_FN64_AFFINITY_INFO: u32 = psci_0_2_fn64(4);

// PSCI v0.1 function IDs as used by U-Boot
pub const PSCI_FN_BASE: u32 = 0x95c1ba5e;
pub const fn psci_fn(n: u32) -> u32 {
    PSCI_FN_BASE + n
}
pub const PSCI_FN_CPU_OFF: u32 = psci_fn(1);
pub const PSCI_FN_CPU_ON: u32 = psci_fn(2);

/// PSCI version decoding
pub const PSCI_VERSION_MAJOR_SHIFT: u32 = 16;

pub const fn psci_version(major: u32, minor: u32) -> u32 {
    (major << PSCI_VERSION_MAJOR_SHIFT) | minor
}

/// Version reported to guests
pub const PSCI_EMULATED_VERSION: u32 = psci_version(0, 2);

/// AFFINITY_INFO results
pub const PSCI_CPU_IS_ON: i64 = 0;
pub const PSCI_CPU_IS_OFF: i64 = 1;

/// Entry address marking "no entry point"
pub const PSCI_INVALID_ADDRESS: u64 = u64::MAX;

/// Affinity fields of an MPIDR value
const MPIDR_AFFINITY_MASK: u64 = 0xff_00ff_ffff;
/// Aff0, holding the virtual core id
const MPIDR_AFF0_MASK: u64 = 0xff;

/// PSCI return values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum PsciReturn {
    Success = 0,
    NotSupported = -1,
    InvalidParams = -2,
    Denied = -3,
    AlreadyOn = -4,
    OnPending = -5,
    InternalFailure = -6,
    NotPresent = -7,
    Disabled = -8,
}

impl PsciReturn {
    pub fn to_i64(self) -> i64 {
        self as i64
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::NotSupported => "Not supported",
            Self::InvalidParams => "Invalid parameters",
            Self::Denied => "Denied",
            Self::AlreadyOn => "Already on",
            Self::OnPending => "On pending",
            Self::InternalFailure => "Internal failure",
            Self::NotPresent => "Not present",
            Self::Disabled => "Disabled",
        }
    }
}

/// Virtual core id named by an MPIDR argument
///
/// Guests only ever see Aff0, anything in the upper affinity levels names
/// a core that does not exist.
fn mpidr_to_virtual_id(mpidr: u64) -> Option<u32> {
    if mpidr & MPIDR_AFFINITY_MASK & !MPIDR_AFF0_MASK != 0 {
        return None;
    }
    Some((mpidr & MPIDR_AFF0_MASK) as u32)
}

impl Hypervisor<'_> {
    /// Emulate the PSCI call in the trap context, returning the value for x0
    pub(crate) fn psci_dispatch(&self, ctx: &mut TrapContext<'_>) -> i64 {
        let function_id = ctx.arg(0) as u32;
        self.cpu(ctx.cpu).count(CpuStat::VmExitsPsci);

        match function_id {
            PSCI_0_2_FN_PSCI_VERSION => PSCI_EMULATED_VERSION as i64,
            PSCI_0_2_FN_CPU_OFF | PSCI_FN_CPU_OFF => {
                self.park_self(ctx.cpu, ctx.regs, ctx.sysregs);
                PsciReturn::Success.to_i64()
            }
            PSCI_0_2_FN_CPU_ON | PSCI_0_2_FN64_CPU_ON | PSCI_FN_CPU_ON => {
                self.psci_cpu_on(ctx.cpu, ctx.arg(1), ctx.arg(2), ctx.arg(3)).to_i64()
            }
            PSCI_0_2_FN_AFFINITY_INFO | PSCI_0_2_FN64_AFFINITY_INFO => self.psci_affinity_info(ctx.cpu, ctx.arg(1)),
            _ => {
                log::debug!("PSCI: function {:#010x} not supported", function_id);
                PsciReturn::NotSupported.to_i64()
            }
        }
    }

    /// Physical core behind `mpidr` in the cell of `caller`
    fn psci_target(&self, caller: usize, mpidr: u64) -> Option<usize> {
        let virtual_id = mpidr_to_virtual_id(mpidr)?;
        self.virt2phys(self.cpu(caller).cell(), virtual_id)
    }

    fn psci_cpu_on(&self, caller: usize, mpidr: u64, entry: u64, context: u64) -> PsciReturn {
        let Some(cpu) = self.psci_target(caller, mpidr) else {
            return PsciReturn::Denied;
        };

        let result = {
            let mut state = self.cpu(cpu).control.lock();
            if state.halted {
                PsciReturn::Denied
            } else if !state.wait_for_poweron {
                PsciReturn::AlreadyOn
            } else {
                state.power_on_entry = entry;
                state.power_on_context = context;
                state.requests.insert(ControlRequests::RESET);
                PsciReturn::Success
            }
        };

        if result == PsciReturn::Success {
            self.kick(cpu);
        }
        log::debug!(
            "PSCI: CPU_ON cpu {} -> cpu {} entry {:#x}: {}",
            caller,
            cpu,
            entry,
            result.as_str()
        );
        result
    }

    fn psci_affinity_info(&self, caller: usize, mpidr: u64) -> i64 {
        match self.psci_target(caller, mpidr) {
            Some(cpu) if self.cpu(cpu).is_waiting_for_poweron() => PSCI_CPU_IS_OFF,
            Some(_) => PSCI_CPU_IS_ON,
            None => PsciReturn::Denied.to_i64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::arm64::cpu::control::Checkpoint;
    use crate::arch::arm64::cpu::percpu::LifecycleState;
    use crate::arch::arm64::cpu::regs::mode;
    use crate::arch::arm64::cpu::sysreg::SysReg;
    use crate::arch::arm64::interrupt::vgic::Signal;
    use crate::kernel::vmm::{CellId, GuestMode};
    use crate::testing::{TestBed, TestCpu};
    use crate::utils::CpuSet;
    use test_case::test_case;

    const CELL_X: CellId = CellId(1);

    /// Four cores, cores 2 and 3 form a started cell X with virtual ids 0 and 1
    fn bed_with_cell() -> TestBed {
        TestBed::with_cell(4, CELL_X, CpuSet::from_bits(0b1100), GuestMode::Aarch64)
    }

    fn call(bed: &TestBed, cpu: &mut TestCpu, args: [u64; 4]) -> i64 {
        let hv = bed.hypervisor();
        cpu.sysregs.set(SysReg::SpsrEl2, mode::EL1H);
        cpu.regs.x[..4].copy_from_slice(&args);
        hv.psci_dispatch(&mut cpu.trap_context())
    }

    #[test_case(0x84000000, true ; "psci 32-bit")]
    #[test_case(0xc4000003, true ; "psci 64-bit")]
    #[test_case(0x95c1ba60, true ; "u-boot")]
    #[test_case(0x82000001, false ; "sip")]
    fn test_psci_classification(function_id: u32, psci: bool) {
        assert_eq!(is_psci_call(function_id), psci);
    }

    #[test]
    fn test_mpidr_to_virtual_id() {
        assert_eq!(mpidr_to_virtual_id(1), Some(1));
        assert_eq!(mpidr_to_virtual_id(0x8000_0002), Some(2));
        assert_eq!(mpidr_to_virtual_id(0x100), None);
        assert_eq!(mpidr_to_virtual_id(0x1_0000_0000), None);
    }

    #[test]
    fn test_version() {
        let bed = TestBed::new(1);
        let mut cpu = TestCpu::new(0);
        assert_eq!(call(&bed, &mut cpu, [PSCI_0_2_FN_PSCI_VERSION as u64, 0, 0, 0]), 2);
        assert_eq!(bed.hypervisor().cpu(0).stat(CpuStat::VmExitsPsci), 1);
    }

    #[test_case(PSCI_0_2_FN_CPU_SUSPEND)]
    #[test_case(PSCI_0_2_FN_SYSTEM_OFF)]
    #[test_case(PSCI_0_2_FN_SYSTEM_RESET)]
    #[test_case(0x8400_00ff)]
    fn test_unsupported_functions(function_id: u32) {
        let bed = TestBed::new(1);
        let mut cpu = TestCpu::new(0);
        assert_eq!(call(&bed, &mut cpu, [function_id as u64, 0, 0, 0]), PsciReturn::NotSupported.to_i64());
    }

    #[test]
    fn test_cpu_on_scenario() {
        let bed = bed_with_cell();
        let hv = bed.hypervisor();
        assert_eq!(hv.cpu(3).virtual_id(), 1);

        // core B has no entry point yet and parks as the cell starts
        let mut b = TestCpu::new(3);
        assert_eq!(hv.checkpoint(&mut b.local()), Checkpoint::Parked);
        assert_eq!(hv.cpu(3).lifecycle_state(), LifecycleState::WaitingForPowerOn);

        // core A boots, then calls CPU_ON for virtual id 1
        let mut a = TestCpu::new(2);
        assert_eq!(hv.checkpoint(&mut a.local()), Checkpoint::Reset { entry: 0, context: 0 });
        let ret = call(&bed, &mut a, [PSCI_0_2_FN64_CPU_ON as u64, 1, 0x1000, 0x2]);
        assert_eq!(ret, PsciReturn::Success.to_i64());
        assert_eq!(hv.cpu(3).lifecycle_state(), LifecycleState::ResetRequested);
        assert_eq!(hv.cpu(3).power_on_entry(), (0x1000, 0x2));
        assert!(bed.chip.sent_signals().contains(&(CpuSet::single(3), Signal::Management as u32)));

        assert_eq!(
            hv.checkpoint(&mut b.local()),
            Checkpoint::Reset {
                entry: 0x1000,
                context: 0x2
            }
        );
        assert_eq!(b.sysregs.get(SysReg::ElrEl2), 0x1000);
        assert_eq!(b.regs.x[0], 0x2);
        assert_eq!(b.sysregs.get(SysReg::VmpidrEl2), 0x8000_0001);
        assert_eq!(hv.cpu(3).lifecycle_state(), LifecycleState::Running);
    }

    #[test]
    fn test_cpu_on_already_on() {
        let bed = bed_with_cell();
        let hv = bed.hypervisor();
        // core A itself is virtual id 0 and running
        let mut a = TestCpu::new(2);
        hv.checkpoint(&mut a.local());
        let sent = bed.chip.sent_signals().len();

        let ret = call(&bed, &mut a, [PSCI_0_2_FN_CPU_ON as u64, 0, 0x1000, 0x2]);
        assert_eq!(ret, PsciReturn::AlreadyOn.to_i64());
        assert_eq!(hv.cpu(2).lifecycle_state(), LifecycleState::Running);
        assert_ne!(hv.cpu(2).power_on_entry(), (0x1000, 0x2));
        assert_eq!(bed.chip.sent_signals().len(), sent);
    }

    #[test]
    fn test_cpu_on_before_wakeup_takes_latest_entry() {
        let bed = bed_with_cell();
        let hv = bed.hypervisor();
        let mut b = TestCpu::new(3);
        hv.checkpoint(&mut b.local());

        let mut a = TestCpu::new(2);
        assert_eq!(call(&bed, &mut a, [PSCI_FN_CPU_ON as u64, 1, 0x1000, 0]), 0);
        // core 3 has not reached its checkpoint yet
        assert!(hv.cpu(3).is_waiting_for_poweron());
        assert_eq!(call(&bed, &mut a, [PSCI_FN_CPU_ON as u64, 1, 0x2000, 7]), 0);
        assert_eq!(hv.cpu(3).power_on_entry(), (0x2000, 7));

        assert_eq!(
            hv.checkpoint(&mut b.local()),
            Checkpoint::Reset {
                entry: 0x2000,
                context: 7
            }
        );
    }

    // 2 and 3 are physical ids of cell X cores, 0 and 1 exist in the root cell
    #[test_case(2)]
    #[test_case(3)]
    #[test_case(0xff)]
    #[test_case(0x100)]
    fn test_foreign_virtual_ids_denied(target: u64) {
        let bed = bed_with_cell();
        let mut a = TestCpu::new(2);
        let denied = PsciReturn::Denied.to_i64();
        assert_eq!(call(&bed, &mut a, [PSCI_0_2_FN_CPU_ON as u64, target, 0x1000, 0]), denied);
        assert_eq!(call(&bed, &mut a, [PSCI_0_2_FN_AFFINITY_INFO as u64, target, 0, 0]), denied);
    }

    #[test]
    fn test_root_cell_ids_not_reachable_from_cell() {
        let bed = bed_with_cell();
        let hv = bed.hypervisor();
        // virtual id 0 resolves to core 2, never to root cell core 0
        assert_eq!(hv.virt2phys(CELL_X, 0), Some(2));
        let mut root = TestCpu::new(0);
        let on = call(&bed, &mut root, [PSCI_0_2_FN_AFFINITY_INFO as u64, 2, 0, 0]);
        assert_eq!(on, PsciReturn::Denied.to_i64());
    }

    #[test]
    fn test_affinity_info() {
        let bed = bed_with_cell();
        let hv = bed.hypervisor();
        let mut b = TestCpu::new(3);
        hv.checkpoint(&mut b.local());

        let mut a = TestCpu::new(2);
        hv.checkpoint(&mut a.local());
        assert_eq!(call(&bed, &mut a, [PSCI_0_2_FN64_AFFINITY_INFO as u64, 1, 0, 0]), PSCI_CPU_IS_OFF);
        assert_eq!(call(&bed, &mut a, [PSCI_0_2_FN_AFFINITY_INFO as u64, 0, 0, 0]), PSCI_CPU_IS_ON);
    }

    #[test]
    fn test_cpu_off_parks_caller() {
        let bed = TestBed::new(2);
        let hv = bed.hypervisor();
        let mut cpu = TestCpu::new(1);
        assert_eq!(call(&bed, &mut cpu, [PSCI_0_2_FN_CPU_OFF as u64, 0, 0, 0]), 0);
        assert!(hv.cpu(1).is_waiting_for_poweron());

        let mut other = TestCpu::new(0);
        assert_eq!(call(&bed, &mut other, [PSCI_0_2_FN_AFFINITY_INFO as u64, 1, 0, 0]), PSCI_CPU_IS_OFF);
    }

    #[test]
    fn test_cpu_on_refused_for_halted_core() {
        let bed = TestBed::new(2);
        let hv = bed.hypervisor();
        let mut cpu = TestCpu::new(1);
        hv.halt_self(1, &mut cpu.regs, &mut cpu.sysregs);

        let mut other = TestCpu::new(0);
        let ret = call(&bed, &mut other, [PSCI_0_2_FN_CPU_ON as u64, 1, 0x1000, 0]);
        assert_eq!(ret, PsciReturn::Denied.to_i64());
    }
}
