//! Guest state reset
//!
//! Puts the guest-visible state of a core back to its architectural reset
//! values before the core is handed to a new guest or parked, so nothing
//! leaks from one cell to the next.
//!
//! Floating-point, debug and PMU state other than PMCR_EL0 is not wiped.

use super::regs::GuestRegisters;
use super::sysreg::{SysReg, SysRegs};

/// SCTLR_EL1 with only the RES1 bits set: MMU and caches off
pub const SCTLR_EL1_RES1: u64 = 0x30d0_0800;

/// MPIDR.MP, set in the virtual MPIDR of every guest core
pub const MPIDR_MP_BIT: u64 = 1 << 31;

/// EL1/EL0 registers cleared on every reset
///
/// ACTLR_EL1 is left alone: it carries coherency bits the hypervisor set
/// up and guests may not change.
const EL1_RESET_CLEAR: &[SysReg] = &[
    SysReg::CpacrEl1,
    SysReg::Ttbr0El1,
    SysReg::Ttbr1El1,
    SysReg::TcrEl1,
    SysReg::EsrEl1,
    SysReg::FarEl1,
    SysReg::Afsr0El1,
    SysReg::Afsr1El1,
    SysReg::MairEl1,
    SysReg::AmairEl1,
    SysReg::ContextidrEl1,
    SysReg::ParEl1,
    SysReg::CsselrEl1,
    SysReg::VbarEl1,
    SysReg::SpEl0,
    SysReg::SpEl1,
    SysReg::SpsrEl1,
    SysReg::TpidrEl0,
    SysReg::TpidrroEl0,
    SysReg::TpidrEl1,
    SysReg::CntkctlEl1,
    SysReg::CntpCtlEl0,
    SysReg::CntpCvalEl0,
    SysReg::CntvCtlEl0,
    SysReg::CntvCvalEl0,
    SysReg::PmcrEl0,
    SysReg::Dacr32El2,
    SysReg::Ifsr32El2,
];

/// Where a reset guest starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetTarget {
    pub psr: u64,
    pub entry: u64,
    /// Handed to the guest in r0/x0
    pub context: u64,
    pub virtual_id: u32,
}

/// Wipe the guest register file and EL1 state, then load `target`
pub fn reset_guest_state(regs: &mut GuestRegisters, sysregs: &mut dyn SysRegs, target: ResetTarget) {
    regs.clear();
    for &reg in EL1_RESET_CLEAR {
        sysregs.write(reg, 0);
    }
    sysregs.write(SysReg::SctlrEl1, SCTLR_EL1_RES1);

    sysregs.write(SysReg::SpsrEl2, target.psr);
    sysregs.write(SysReg::ElrEl2, target.entry);
    regs.x[0] = target.context;
    sysregs.write(SysReg::VmpidrEl2, target.virtual_id as u64 | MPIDR_MP_BIT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::arm64::cpu::regs::RESET_PSR_AARCH32;
    use crate::testing::MockSysRegs;

    #[test]
    fn test_reset_wipes_and_loads_entry() {
        let mut regs = GuestRegisters::new();
        regs.x.iter_mut().for_each(|r| *r = 0x5a5a);
        let mut sysregs = MockSysRegs::new();
        sysregs.set(SysReg::Ttbr0El1, 0x8000_0000);
        sysregs.set(SysReg::ContextidrEl1, 7);
        sysregs.set(SysReg::SctlrEl1, 0x30d0_0805);
        sysregs.set(SysReg::CntvCtlEl0, 1);

        reset_guest_state(
            &mut regs,
            &mut sysregs,
            ResetTarget {
                psr: RESET_PSR_AARCH32,
                entry: 0x1000,
                context: 0x2,
                virtual_id: 1,
            },
        );

        assert_eq!(regs.x[0], 0x2);
        assert!(regs.x[1..].iter().all(|&r| r == 0));
        assert_eq!(sysregs.get(SysReg::Ttbr0El1), 0);
        assert_eq!(sysregs.get(SysReg::ContextidrEl1), 0);
        assert_eq!(sysregs.get(SysReg::CntvCtlEl0), 0);
        assert_eq!(sysregs.get(SysReg::SctlrEl1), SCTLR_EL1_RES1);
        assert_eq!(sysregs.get(SysReg::ElrEl2), 0x1000);
        assert_eq!(sysregs.get(SysReg::SpsrEl2), RESET_PSR_AARCH32);
        assert_eq!(sysregs.get(SysReg::VmpidrEl2), 0x8000_0001);
    }

    #[test]
    fn test_reset_preserves_actlr() {
        let mut regs = GuestRegisters::new();
        let mut sysregs = MockSysRegs::new();
        sysregs.set(SysReg::ActlrEl1, 0x40);

        reset_guest_state(
            &mut regs,
            &mut sysregs,
            ResetTarget {
                psr: RESET_PSR_AARCH32,
                entry: 0,
                context: 0,
                virtual_id: 0,
            },
        );
        assert_eq!(sysregs.get(SysReg::ActlrEl1), 0x40);
    }
}
