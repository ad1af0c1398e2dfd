//! Hardware system register access (aarch64 only)

use aarch64_cpu::registers::{Readable, Writeable, ELR_EL2, ESR_EL2, FAR_EL2, SPSR_EL2};

use super::{SysReg, SysRegs};

macro_rules! mrs {
    ($name:literal) => {{
        let value: u64;
        // SAFETY: reading an EL1/EL2 register from EL2 has no side effects.
        unsafe {
            core::arch::asm!(concat!("mrs {}, ", $name), out(reg) value, options(nomem, nostack));
        }
        value
    }};
}

macro_rules! msr {
    ($name:literal, $value:expr) => {{
        let value: u64 = $value;
        // SAFETY: the register belongs to the trapped guest, EL2 state is untouched.
        unsafe {
            core::arch::asm!(concat!("msr ", $name, ", {}"), in(reg) value, options(nomem, nostack));
        }
    }};
}

/// Banked registers of the calling core
#[derive(Debug, Default)]
pub struct HwSysRegs;

impl SysRegs for HwSysRegs {
    fn read(&self, reg: SysReg) -> u64 {
        match reg {
            SysReg::ElrEl2 => ELR_EL2.get(),
            SysReg::SpsrEl2 => SPSR_EL2.get(),
            SysReg::EsrEl2 => ESR_EL2.get(),
            SysReg::FarEl2 => FAR_EL2.get(),
            SysReg::HpfarEl2 => mrs!("hpfar_el2"),
            SysReg::VmpidrEl2 => mrs!("vmpidr_el2"),
            SysReg::SctlrEl1 => mrs!("sctlr_el1"),
            SysReg::ActlrEl1 => mrs!("actlr_el1"),
            SysReg::CpacrEl1 => mrs!("cpacr_el1"),
            SysReg::Ttbr0El1 => mrs!("ttbr0_el1"),
            SysReg::Ttbr1El1 => mrs!("ttbr1_el1"),
            SysReg::TcrEl1 => mrs!("tcr_el1"),
            SysReg::EsrEl1 => mrs!("esr_el1"),
            SysReg::FarEl1 => mrs!("far_el1"),
            SysReg::Afsr0El1 => mrs!("afsr0_el1"),
            SysReg::Afsr1El1 => mrs!("afsr1_el1"),
            SysReg::MairEl1 => mrs!("mair_el1"),
            SysReg::AmairEl1 => mrs!("amair_el1"),
            SysReg::ContextidrEl1 => mrs!("contextidr_el1"),
            SysReg::ParEl1 => mrs!("par_el1"),
            SysReg::CsselrEl1 => mrs!("csselr_el1"),
            SysReg::VbarEl1 => mrs!("vbar_el1"),
            SysReg::SpEl0 => mrs!("sp_el0"),
            SysReg::SpEl1 => mrs!("sp_el1"),
            SysReg::SpsrEl1 => mrs!("spsr_el1"),
            SysReg::TpidrEl0 => mrs!("tpidr_el0"),
            SysReg::TpidrroEl0 => mrs!("tpidrro_el0"),
            SysReg::TpidrEl1 => mrs!("tpidr_el1"),
            SysReg::CntkctlEl1 => mrs!("cntkctl_el1"),
            SysReg::CntpCtlEl0 => mrs!("cntp_ctl_el0"),
            SysReg::CntpCvalEl0 => mrs!("cntp_cval_el0"),
            SysReg::CntvCtlEl0 => mrs!("cntv_ctl_el0"),
            SysReg::CntvCvalEl0 => mrs!("cntv_cval_el0"),
            SysReg::PmcrEl0 => mrs!("pmcr_el0"),
            SysReg::Dacr32El2 => mrs!("dacr32_el2"),
            SysReg::Ifsr32El2 => mrs!("ifsr32_el2"),
        }
    }

    fn write(&mut self, reg: SysReg, value: u64) {
        match reg {
            SysReg::ElrEl2 => ELR_EL2.set(value),
            SysReg::SpsrEl2 => SPSR_EL2.set(value),
            SysReg::EsrEl2 => ESR_EL2.set(value),
            SysReg::FarEl2 => FAR_EL2.set(value),
            SysReg::HpfarEl2 => msr!("hpfar_el2", value),
            SysReg::VmpidrEl2 => msr!("vmpidr_el2", value),
            SysReg::SctlrEl1 => msr!("sctlr_el1", value),
            SysReg::ActlrEl1 => msr!("actlr_el1", value),
            SysReg::CpacrEl1 => msr!("cpacr_el1", value),
            SysReg::Ttbr0El1 => msr!("ttbr0_el1", value),
            SysReg::Ttbr1El1 => msr!("ttbr1_el1", value),
            SysReg::TcrEl1 => msr!("tcr_el1", value),
            SysReg::EsrEl1 => msr!("esr_el1", value),
            SysReg::FarEl1 => msr!("far_el1", value),
            SysReg::Afsr0El1 => msr!("afsr0_el1", value),
            SysReg::Afsr1El1 => msr!("afsr1_el1", value),
            SysReg::MairEl1 => msr!("mair_el1", value),
            SysReg::AmairEl1 => msr!("amair_el1", value),
            SysReg::ContextidrEl1 => msr!("contextidr_el1", value),
            SysReg::ParEl1 => msr!("par_el1", value),
            SysReg::CsselrEl1 => msr!("csselr_el1", value),
            SysReg::VbarEl1 => msr!("vbar_el1", value),
            SysReg::SpEl0 => msr!("sp_el0", value),
            SysReg::SpEl1 => msr!("sp_el1", value),
            SysReg::SpsrEl1 => msr!("spsr_el1", value),
            SysReg::TpidrEl0 => msr!("tpidr_el0", value),
            SysReg::TpidrroEl0 => msr!("tpidrro_el0", value),
            SysReg::TpidrEl1 => msr!("tpidr_el1", value),
            SysReg::CntkctlEl1 => msr!("cntkctl_el1", value),
            SysReg::CntpCtlEl0 => msr!("cntp_ctl_el0", value),
            SysReg::CntpCvalEl0 => msr!("cntp_cval_el0", value),
            SysReg::CntvCtlEl0 => msr!("cntv_ctl_el0", value),
            SysReg::CntvCvalEl0 => msr!("cntv_cval_el0", value),
            SysReg::PmcrEl0 => msr!("pmcr_el0", value),
            SysReg::Dacr32El2 => msr!("dacr32_el2", value),
            SysReg::Ifsr32El2 => msr!("ifsr32_el2", value),
        }
    }
}
