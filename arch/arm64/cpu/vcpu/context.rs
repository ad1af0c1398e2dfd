//! Trap context
//!
//! Snapshot of the trapped guest taken on exit: PC, PSR, syndrome, plus
//! borrowed access to the saved register file and the banked system
//! registers. Handlers edit the snapshot; [`TrapContext::restore`] writes
//! PC and PSR back before the guest is resumed.

use tock_registers::{register_bitfields, LocalRegisterCopy};

use crate::arch::arm64::cpu::regs::{aarch32_reg, is_aarch32, GuestReg, GuestRegisters, PsrFlags, NUM_GPRS};
use crate::arch::arm64::cpu::sysreg::{SysReg, SysRegs};

register_bitfields! [u32,
    /// Exception syndrome (low word of ESR_EL2)
    pub ESR [
        /// Exception class
        EC OFFSET(26) NUMBITS(6) [],
        /// 32-bit instruction
        IL OFFSET(25) NUMBITS(1) [],
        /// COND is valid
        CV OFFSET(24) NUMBITS(1) [],
        COND OFFSET(20) NUMBITS(4) []
    ],
    /// ISS of a trapped MCR/MRC
    pub ISS_MCR [
        OPC2 OFFSET(17) NUMBITS(3) [],
        OPC1 OFFSET(14) NUMBITS(3) [],
        CRN OFFSET(10) NUMBITS(4) [],
        RT OFFSET(5) NUMBITS(5) [],
        CRM OFFSET(1) NUMBITS(4) [],
        /// Set for reads (MRC)
        DIRECTION OFFSET(0) NUMBITS(1) []
    ],
    /// ISS of a trapped MCRR/MRRC
    pub ISS_MCRR [
        OPC1 OFFSET(16) NUMBITS(4) [],
        RT2 OFFSET(10) NUMBITS(5) [],
        RT OFFSET(5) NUMBITS(5) [],
        CRM OFFSET(1) NUMBITS(4) [],
        /// Set for reads (MRRC)
        DIRECTION OFFSET(0) NUMBITS(1) []
    ]
];

/// IT[1:0] in PSR[26:25], IT[7:2] in PSR[15:10]
const PSR_IT_MASK: u64 = (0x3 << 25) | (0x3f << 10);

/// Extract the Thumb IT state from a PSR
#[inline]
pub const fn psr_it(psr: u64) -> u64 {
    ((psr >> 25) & 0x3) | ((psr >> 8) & 0xfc)
}

/// Place an IT state into the PSR layout
#[inline]
pub const fn psr_it_bits(it: u64) -> u64 {
    ((it & 0x3) << 25) | ((it & 0xfc) << 8)
}

/// Step the IT block past one instruction
///
/// Outside Thumb state or an IT block the PSR is returned unchanged.
pub fn advance_itstate(psr: u64) -> u64 {
    let it = psr_it(psr);
    if psr & PsrFlags::T.bits() == 0 || it == 0 {
        return psr;
    }
    let next = if it & 0x7 == 0 {
        0
    } else {
        (it & 0xe0) | ((it << 1) & 0x1f)
    };
    (psr & !PSR_IT_MASK) | psr_it_bits(next)
}

/// State of one synchronous trap
pub struct TrapContext<'a> {
    /// Physical id of the trapping core
    pub cpu: usize,
    pub pc: u64,
    pub psr: u64,
    pub esr: LocalRegisterCopy<u32, ESR::Register>,
    pub regs: &'a mut GuestRegisters,
    pub sysregs: &'a mut dyn SysRegs,
}

impl<'a> TrapContext<'a> {
    /// Capture the trap state of the calling core
    pub fn new(cpu: usize, regs: &'a mut GuestRegisters, sysregs: &'a mut dyn SysRegs) -> Self {
        let pc = sysregs.read(SysReg::ElrEl2);
        let psr = sysregs.read(SysReg::SpsrEl2);
        let esr = LocalRegisterCopy::new(sysregs.read(SysReg::EsrEl2) as u32);
        Self {
            cpu,
            pc,
            psr,
            esr,
            regs,
            sysregs,
        }
    }

    /// Write PC and PSR back to the exception return registers
    pub fn restore(&mut self) {
        self.sysregs.write(SysReg::ElrEl2, self.pc);
        self.sysregs.write(SysReg::SpsrEl2, self.psr);
    }

    pub fn exception_class(&self) -> u32 {
        self.esr.read(ESR::EC)
    }

    /// ISS field of the syndrome
    pub fn iss(&self) -> u32 {
        self.esr.get() & 0x01ff_ffff
    }

    pub fn is_aarch32(&self) -> bool {
        is_aarch32(self.psr)
    }

    /// Length of the trapped instruction in bytes
    pub fn instruction_length(&self) -> u64 {
        if self.esr.is_set(ESR::IL) {
            4
        } else {
            2
        }
    }

    /// Resume after the trapped instruction
    pub fn skip_instruction(&mut self) {
        if self.is_aarch32() {
            self.psr = advance_itstate(self.psr);
        }
        self.pc = self.pc.wrapping_add(self.instruction_length());
    }

    /// Read guest register `reg` as the trapping instruction named it
    pub fn read_reg(&self, reg: usize) -> u64 {
        if !self.is_aarch32() {
            return match reg {
                r if r < NUM_GPRS => self.regs.x[r],
                // XZR
                31 => 0,
                _ => {
                    log::error!("Trap: invalid register x{} read on cpu {}", reg, self.cpu);
                    0
                }
            };
        }
        match aarch32_reg(self.psr, reg) {
            Some(GuestReg::Gpr(slot)) => self.regs.x[slot] & 0xffff_ffff,
            Some(GuestReg::Pc) => {
                log::warn!("Trap: guest accessing PC via register access on cpu {}", self.cpu);
                self.pc
            }
            None => {
                log::error!(
                    "Trap: invalid register r{} read in mode {:#x} on cpu {}",
                    reg,
                    self.psr & 0x1f,
                    self.cpu
                );
                0
            }
        }
    }

    /// Write guest register `reg` as the trapping instruction named it
    pub fn write_reg(&mut self, reg: usize, value: u64) {
        if !self.is_aarch32() {
            match reg {
                r if r < NUM_GPRS => self.regs.x[r] = value,
                31 => {}
                _ => log::error!("Trap: invalid register x{} write on cpu {}", reg, self.cpu),
            }
            return;
        }
        match aarch32_reg(self.psr, reg) {
            Some(GuestReg::Gpr(slot)) => self.regs.x[slot] = value & 0xffff_ffff,
            Some(GuestReg::Pc) => {
                log::warn!("Trap: guest accessing PC via register access on cpu {}", self.cpu);
                self.pc = value & 0xffff_ffff;
            }
            None => log::error!(
                "Trap: invalid register r{} write in mode {:#x} on cpu {}",
                reg,
                self.psr & 0x1f,
                self.cpu
            ),
        }
    }

    /// Call argument `n` in the SMC/HVC calling convention
    pub fn arg(&self, n: usize) -> u64 {
        let value = self.regs.x[n];
        if self.is_aarch32() {
            value & 0xffff_ffff
        } else {
            value
        }
    }

    /// Store a call result in r0/x0
    pub fn set_return(&mut self, value: u64) {
        self.regs.x[0] = if self.is_aarch32() {
            value & 0xffff_ffff
        } else {
            value
        };
    }

    /// Log the trap state, used on the fatal path
    pub fn dump(&self) {
        log::error!(
            "cpu {}: pc={:#018x} psr={:#010x} esr={:#010x} ec={:#04x}",
            self.cpu,
            self.pc,
            self.psr,
            self.esr.get(),
            self.exception_class()
        );
        for (n, pair) in self.regs.x.chunks(2).enumerate() {
            match pair {
                [a, b] => log::error!("x{:<2}={:#018x} x{:<2}={:#018x}", 2 * n, a, 2 * n + 1, b),
                [a] => log::error!("x{:<2}={:#018x}", 2 * n, a),
                _ => {}
            }
        }
    }
}
