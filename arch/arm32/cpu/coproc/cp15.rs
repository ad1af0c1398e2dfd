//! CP15 (system control coprocessor) trap emulation
//!
//! AArch32 guests run with HCR_EL2.TVM set, so writes to the translation
//! and fault registers trap to EL2. The write is replayed into the guest's
//! banked EL1 copy; the hypervisor never acts on the value itself. ACTLR
//! is trapped by HCR_EL2.TAC so that the guest cannot turn off coherency.
//!
//! The AArch32 registers are reached through their AArch64 counterparts,
//! see ARM DDI 0487, G8.2 "AArch32 System register descriptions".

use tock_registers::LocalRegisterCopy;

use crate::arch::arm64::cpu::sysreg::{RegHalf, SysReg};
use crate::arch::arm64::cpu::vcpu::context::{TrapContext, ISS_MCR, ISS_MCRR};
use crate::arch::arm64::cpu::vcpu::TrapReturn;
use crate::kernel::vmm::Hypervisor;

/// CP15 register encoding for coprocessor instructions
///
/// The encoding format is: MCR/MRC p15, <opc1>, <Rt>, <CRn>, <CRm>, <opc2>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cp15Encoding {
    /// Operand 1 (0-7)
    pub opc1: u8,
    /// Operand 2 (0-7)
    pub opc2: u8,
    /// Coprocessor Register N (0-15)
    pub crn: u8,
    /// Coprocessor Register M (0-15)
    pub crm: u8,
}

impl Cp15Encoding {
    pub const fn new(crn: u8, opc1: u8, crm: u8, opc2: u8) -> Self {
        Self { opc1, opc2, crn, crm }
    }

    /// Decode from the ISS of an MCR/MRC trap
    pub fn from_iss(iss: &LocalRegisterCopy<u32, ISS_MCR::Register>) -> Self {
        Self {
            opc1: iss.read(ISS_MCR::OPC1) as u8,
            opc2: iss.read(ISS_MCR::OPC2) as u8,
            crn: iss.read(ISS_MCR::CRN) as u8,
            crm: iss.read(ISS_MCR::CRM) as u8,
        }
    }
}

const ACTLR: Cp15Encoding = Cp15Encoding::new(1, 0, 0, 1);

/// 32-bit registers whose writes are replayed, with the register they alias
const CP15_32_WRITES: [(Cp15Encoding, SysReg, RegHalf); 14] = [
    (Cp15Encoding::new(1, 0, 0, 0), SysReg::SctlrEl1, RegHalf::Low),
    (Cp15Encoding::new(2, 0, 0, 0), SysReg::Ttbr0El1, RegHalf::Low),
    (Cp15Encoding::new(2, 0, 0, 1), SysReg::Ttbr1El1, RegHalf::Low),
    // TTBCR
    (Cp15Encoding::new(2, 0, 0, 2), SysReg::TcrEl1, RegHalf::Low),
    (Cp15Encoding::new(3, 0, 0, 0), SysReg::Dacr32El2, RegHalf::Low),
    // DFSR
    (Cp15Encoding::new(5, 0, 0, 0), SysReg::EsrEl1, RegHalf::Low),
    (Cp15Encoding::new(5, 0, 0, 1), SysReg::Ifsr32El2, RegHalf::Low),
    // DFAR and IFAR share FAR_EL1
    (Cp15Encoding::new(6, 0, 0, 0), SysReg::FarEl1, RegHalf::Low),
    (Cp15Encoding::new(6, 0, 0, 2), SysReg::FarEl1, RegHalf::High),
    // ADFSR, AIFSR
    (Cp15Encoding::new(5, 0, 1, 0), SysReg::Afsr0El1, RegHalf::Low),
    (Cp15Encoding::new(5, 0, 1, 1), SysReg::Afsr1El1, RegHalf::Low),
    // PRRR/MAIR0, NMRR/MAIR1
    (Cp15Encoding::new(10, 0, 2, 0), SysReg::MairEl1, RegHalf::Low),
    (Cp15Encoding::new(10, 0, 2, 1), SysReg::MairEl1, RegHalf::High),
    (Cp15Encoding::new(13, 0, 0, 1), SysReg::ContextidrEl1, RegHalf::Low),
];

/// MCRR p15, <opc1>, <Rt>, <Rt2>, c2: TTBR0 (opc1 0) and TTBR1 (opc1 1)
const CRM_TTBR: u32 = 2;
/// MCRR p15, 0, <Rt>, <Rt2>, c12
const CRM_ICC_SGI1R: u32 = 12;

fn lookup_write(enc: Cp15Encoding) -> Option<(SysReg, RegHalf)> {
    CP15_32_WRITES
        .iter()
        .find(|(e, _, _)| *e == enc)
        .map(|&(_, reg, half)| (reg, half))
}

/// Emulate a trapped MCR/MRC on p15
pub fn handle_cp15_32(_hv: &Hypervisor<'_>, ctx: &mut TrapContext<'_>) -> TrapReturn {
    let iss: LocalRegisterCopy<u32, ISS_MCR::Register> = LocalRegisterCopy::new(ctx.iss());
    let enc = Cp15Encoding::from_iss(&iss);
    let rt = iss.read(ISS_MCR::RT) as usize;
    let read = iss.is_set(ISS_MCR::DIRECTION);

    if enc == ACTLR {
        if read {
            let value = ctx.sysregs.read(SysReg::ActlrEl1) & 0xffff_ffff;
            ctx.write_reg(rt, value);
        } else {
            log::debug!("CP15: ignoring ACTLR write on cpu {}", ctx.cpu);
        }
    } else if read {
        // Everything else is only trapped on writes.
        return TrapReturn::Unhandled;
    } else {
        let Some((reg, half)) = lookup_write(enc) else {
            log::warn!("CP15: unhandled write to {:?} on cpu {}", enc, ctx.cpu);
            return TrapReturn::Unhandled;
        };
        let value = ctx.read_reg(rt);
        ctx.sysregs.write_half(reg, half, value);
    }

    ctx.skip_instruction();
    TrapReturn::Handled
}

/// Emulate a trapped MCRR/MRRC on p15
pub fn handle_cp15_64(hv: &Hypervisor<'_>, ctx: &mut TrapContext<'_>) -> TrapReturn {
    let iss: LocalRegisterCopy<u32, ISS_MCRR::Register> = LocalRegisterCopy::new(ctx.iss());
    if iss.is_set(ISS_MCRR::DIRECTION) {
        return TrapReturn::Unhandled;
    }

    let lo = ctx.read_reg(iss.read(ISS_MCRR::RT) as usize) & 0xffff_ffff;
    let hi = ctx.read_reg(iss.read(ISS_MCRR::RT2) as usize) & 0xffff_ffff;
    let value = (hi << 32) | lo;

    let ret = match (iss.read(ISS_MCRR::OPC1), iss.read(ISS_MCRR::CRM)) {
        (0, CRM_ICC_SGI1R) => hv.handle_sgir_write(ctx.cpu, value),
        (0, CRM_TTBR) => {
            ctx.sysregs.write(SysReg::Ttbr0El1, value);
            TrapReturn::Handled
        }
        (1, CRM_TTBR) => {
            ctx.sysregs.write(SysReg::Ttbr1El1, value);
            TrapReturn::Handled
        }
        _ => TrapReturn::Unhandled,
    };

    if ret == TrapReturn::Handled {
        ctx.skip_instruction();
    }
    ret
}
