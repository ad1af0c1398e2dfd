//! System register access capability
//!
//! Everything the control plane and the trap handlers do to the banked
//! registers of the executing core goes through [`SysRegs`]. The hardware
//! implementation issues `mrs`/`msr` on the calling core; unit tests swap
//! in an in-memory register file.
//!
//! AArch32 EL1 registers are reached through their AArch64 counterparts
//! (DFAR is `FAR_EL1[31:0]`, IFAR is `FAR_EL1[63:32]`, and so on).
//! Reference: ARM DDI 0487, G8.2 "AArch32 System register descriptions".

cfg_if::cfg_if! {
    if #[cfg(target_arch = "aarch64")] {
        mod hw;
        pub use hw::HwSysRegs;
    }
}

/// Registers reachable through [`SysRegs`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum SysReg {
    // EL2 exception state of the trapped guest
    ElrEl2,
    SpsrEl2,
    EsrEl2,
    FarEl2,
    HpfarEl2,
    VmpidrEl2,
    // Guest EL1/EL0 state
    SctlrEl1,
    ActlrEl1,
    CpacrEl1,
    Ttbr0El1,
    Ttbr1El1,
    TcrEl1,
    EsrEl1,
    FarEl1,
    Afsr0El1,
    Afsr1El1,
    MairEl1,
    AmairEl1,
    ContextidrEl1,
    ParEl1,
    CsselrEl1,
    VbarEl1,
    SpEl0,
    SpEl1,
    SpsrEl1,
    TpidrEl0,
    TpidrroEl0,
    TpidrEl1,
    CntkctlEl1,
    CntpCtlEl0,
    CntpCvalEl0,
    CntvCtlEl0,
    CntvCvalEl0,
    PmcrEl0,
    // AArch32-only state kept in EL2 registers
    Dacr32El2,
    Ifsr32El2,
}

impl SysReg {
    /// Number of registers, for tables indexed by `SysReg as usize`
    pub const COUNT: usize = SysReg::Ifsr32El2 as usize + 1;

    pub const fn name(self) -> &'static str {
        match self {
            SysReg::ElrEl2 => "ELR_EL2",
            SysReg::SpsrEl2 => "SPSR_EL2",
            SysReg::EsrEl2 => "ESR_EL2",
            SysReg::FarEl2 => "FAR_EL2",
            SysReg::HpfarEl2 => "HPFAR_EL2",
            SysReg::VmpidrEl2 => "VMPIDR_EL2",
            SysReg::SctlrEl1 => "SCTLR_EL1",
            SysReg::ActlrEl1 => "ACTLR_EL1",
            SysReg::CpacrEl1 => "CPACR_EL1",
            SysReg::Ttbr0El1 => "TTBR0_EL1",
            SysReg::Ttbr1El1 => "TTBR1_EL1",
            SysReg::TcrEl1 => "TCR_EL1",
            SysReg::EsrEl1 => "ESR_EL1",
            SysReg::FarEl1 => "FAR_EL1",
            SysReg::Afsr0El1 => "AFSR0_EL1",
            SysReg::Afsr1El1 => "AFSR1_EL1",
            SysReg::MairEl1 => "MAIR_EL1",
            SysReg::AmairEl1 => "AMAIR_EL1",
            SysReg::ContextidrEl1 => "CONTEXTIDR_EL1",
            SysReg::ParEl1 => "PAR_EL1",
            SysReg::CsselrEl1 => "CSSELR_EL1",
            SysReg::VbarEl1 => "VBAR_EL1",
            SysReg::SpEl0 => "SP_EL0",
            SysReg::SpEl1 => "SP_EL1",
            SysReg::SpsrEl1 => "SPSR_EL1",
            SysReg::TpidrEl0 => "TPIDR_EL0",
            SysReg::TpidrroEl0 => "TPIDRRO_EL0",
            SysReg::TpidrEl1 => "TPIDR_EL1",
            SysReg::CntkctlEl1 => "CNTKCTL_EL1",
            SysReg::CntpCtlEl0 => "CNTP_CTL_EL0",
            SysReg::CntpCvalEl0 => "CNTP_CVAL_EL0",
            SysReg::CntvCtlEl0 => "CNTV_CTL_EL0",
            SysReg::CntvCvalEl0 => "CNTV_CVAL_EL0",
            SysReg::PmcrEl0 => "PMCR_EL0",
            SysReg::Dacr32El2 => "DACR32_EL2",
            SysReg::Ifsr32El2 => "IFSR32_EL2",
        }
    }
}

/// Part of a 64-bit register an AArch32 register aliases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegHalf {
    Full,
    Low,
    High,
}

impl RegHalf {
    /// Extract the aliased part of `full`
    pub const fn extract(self, full: u64) -> u64 {
        match self {
            RegHalf::Full => full,
            RegHalf::Low => full & 0xffff_ffff,
            RegHalf::High => full >> 32,
        }
    }

    /// Replace the aliased part of `full` with `value`
    pub const fn insert(self, full: u64, value: u64) -> u64 {
        match self {
            RegHalf::Full => value,
            RegHalf::Low => (full & !0xffff_ffff) | (value & 0xffff_ffff),
            RegHalf::High => (full & 0xffff_ffff) | (value << 32),
        }
    }
}

/// Banked register access for the executing core
pub trait SysRegs {
    fn read(&self, reg: SysReg) -> u64;
    fn write(&mut self, reg: SysReg, value: u64);

    /// Read-modify-write of an aliased half
    fn write_half(&mut self, reg: SysReg, half: RegHalf, value: u64) {
        let full = self.read(reg);
        self.write(reg, half.insert(full, value));
    }
}
