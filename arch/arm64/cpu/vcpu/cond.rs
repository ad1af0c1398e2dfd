//! Condition-code check for trapped AArch32 instructions
//!
//! A conditional instruction can trap even when its condition fails. The
//! syndrome carries the condition (CV/COND), otherwise it comes from the
//! Thumb IT state. The result is looked up in a table with one 16-bit row
//! per condition; bit `NZCV` of the row is set when the condition passes.

use super::context::{psr_it, ESR};
use tock_registers::LocalRegisterCopy;

/// Pass/fail table indexed by condition, then by the NZCV nibble
pub const CC_MAP: [u16; 16] = [
    0xF0F0, // EQ == Z set
    0x0F0F, // NE
    0xCCCC, // CS == C set
    0x3333, // CC
    0xFF00, // MI == N set
    0x00FF, // PL
    0xAAAA, // VS == V set
    0x5555, // VC
    0x0C0C, // HI == C set && Z clear
    0xF3F3, // LS == C clear || Z set
    0xAA55, // GE == (N==V)
    0x55AA, // LT == (N!=V)
    0x0A05, // GT == (!Z && (N==V))
    0xF5FA, // LE == (Z || (N!=V))
    0xFFFF, // AL always
    0,      // NV
];

/// Evaluate `cond` against the flags held in `psr[31:28]`
#[inline]
pub fn condition_passes(cond: u32, psr: u64) -> bool {
    let flags = (psr >> 28) & 0xf;
    (CC_MAP[(cond & 0xf) as usize] >> flags) & 1 != 0
}

/// True if the trapped instruction must be skipped as not executed
pub fn failed_condition(esr: LocalRegisterCopy<u32, ESR::Register>, psr: u64) -> bool {
    let class = esr.read(ESR::EC);
    // Only exception classes 0x01-0x0f report conditional instructions.
    if class & 0x30 != 0 || class == 0 {
        return false;
    }
    let cond = if esr.is_set(ESR::CV) {
        esr.read(ESR::COND)
    } else {
        let it = psr_it(psr);
        if it == 0 {
            return false;
        }
        (it >> 4) as u32
    };
    !condition_passes(cond, psr)
}
