//! Guest register file and processor-state encoding
//!
//! A guest exit saves X0-X30 of the trapped core into [`GuestRegisters`].
//! For AArch32 guests the banked registers of every mode live in fixed
//! slots of the same file (ARM DDI 0487, D1.20.1 "Mapping of the AArch32
//! registers to AArch64"), so emulation code only has to pick the right
//! index for the guest's current mode.

use bitflags::bitflags;

/// Number of general-purpose registers saved on exit
pub const NUM_GPRS: usize = 31;

/// Saved general-purpose registers of the trapped guest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestRegisters {
    pub x: [u64; NUM_GPRS],
}

impl Default for GuestRegisters {
    fn default() -> Self {
        Self { x: [0; NUM_GPRS] }
    }
}

impl GuestRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every register
    pub fn clear(&mut self) {
        self.x = [0; NUM_GPRS];
    }
}

bitflags! {
    /// SPSR_EL2 bits shared by both guest execution states
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PsrFlags: u64 {
        /// M[4]: the guest was executing in AArch32
        const AARCH32 = 1 << 4;
        /// Thumb state (AArch32)
        const T = 1 << 5;
        const F = 1 << 6;
        const I = 1 << 7;
        const A = 1 << 8;
        /// Debug mask (AArch64)
        const D = 1 << 9;
        const V = 1 << 28;
        const C = 1 << 29;
        const Z = 1 << 30;
        const N = 1 << 31;
    }
}

/// Mode field of the PSR
pub const PSR_MODE_MASK: u64 = 0x1f;

/// AArch32 modes
pub mod mode {
    pub const USR: u64 = 0x10;
    pub const FIQ: u64 = 0x11;
    pub const IRQ: u64 = 0x12;
    pub const SVC: u64 = 0x13;
    pub const MON: u64 = 0x16;
    pub const ABT: u64 = 0x17;
    pub const HYP: u64 = 0x1a;
    pub const UND: u64 = 0x1b;
    pub const SYS: u64 = 0x1f;
    /// AArch64 EL1 using SP_EL1
    pub const EL1H: u64 = 0x05;
}

/// AArch32 guest start state: SVC mode, asynchronous exceptions masked
pub const RESET_PSR_AARCH32: u64 = PsrFlags::A.bits() | PsrFlags::I.bits() | PsrFlags::F.bits() | mode::SVC;

/// AArch64 guest start state: EL1h, all exceptions masked
pub const RESET_PSR_AARCH64: u64 =
    PsrFlags::D.bits() | PsrFlags::A.bits() | PsrFlags::I.bits() | PsrFlags::F.bits() | mode::EL1H;

/// True if `psr` describes an AArch32 guest
#[inline]
pub const fn is_aarch32(psr: u64) -> bool {
    psr & PsrFlags::AARCH32.bits() != 0
}

/// Storage behind an AArch32 register number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestReg {
    /// Slot in [`GuestRegisters::x`]
    Gpr(usize),
    /// r15
    Pc,
}

/// Resolve AArch32 register `reg` as seen from `psr`'s mode
///
/// Returns `None` for register numbers above 15 and for banked r13/r14 in
/// modes a guest cannot be trapped from.
pub fn aarch32_reg(psr: u64, reg: usize) -> Option<GuestReg> {
    let m = psr & PSR_MODE_MASK;
    let slot = match reg {
        0..=7 => reg,
        8..=12 if m == mode::FIQ => reg + 16,
        8..=12 => reg,
        13 => match m {
            mode::USR | mode::SYS => 13,
            mode::HYP => 15,
            mode::IRQ => 17,
            mode::SVC => 19,
            mode::ABT => 21,
            mode::UND => 23,
            mode::FIQ => 29,
            _ => return None,
        },
        14 => match m {
            mode::USR | mode::SYS => 14,
            mode::IRQ => 16,
            mode::SVC => 18,
            mode::ABT => 20,
            mode::UND => 22,
            mode::FIQ => 30,
            _ => return None,
        },
        15 => return Some(GuestReg::Pc),
        _ => return None,
    };
    Some(GuestReg::Gpr(slot))
}
