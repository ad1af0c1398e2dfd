//! GICv3 backend
//!
//! The distributor and the redistributors are memory mapped; the CPU
//! interface (ICC_*) and the virtual interface control (ICH_*) are system
//! registers of the calling core, reached through [`GicSysRegs`].
//!
//! Cores are addressed by affinity. Each core records its MPIDR and locates
//! its redistributor during per-core init.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use cfg_if::cfg_if;
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs, LocalRegisterCopy};

use super::gic::{InjectionSlot, IrqChip, SlotFlags, NUM_SGIS, SPURIOUS_IRQ};
use crate::arch;
use crate::config::{GicVersion, MAX_CPUS, MAX_INJECTION_SLOTS};
use crate::utils::CpuSet;
use crate::Result;

register_bitfields! [u32,
    GICD_CTLR [
        /// Affinity routing enabled for the non-secure state
        ARE_NS OFFSET(4) NUMBITS(1) []
    ]
];

register_bitfields! [u64,
    GICR_TYPER [
        LAST OFFSET(4) NUMBITS(1) [],
        AFFINITY OFFSET(32) NUMBITS(32) []
    ],
    /// List register layout
    ICH_LR [
        VINTID OFFSET(0) NUMBITS(32) [],
        PINTID OFFSET(32) NUMBITS(10) [],
        PRIORITY OFFSET(48) NUMBITS(8) [],
        GROUP OFFSET(60) NUMBITS(1) [],
        HW OFFSET(61) NUMBITS(1) [],
        PENDING OFFSET(62) NUMBITS(1) [],
        ACTIVE OFFSET(63) NUMBITS(1) []
    ],
    ICC_SGI1R [
        TARGETLIST OFFSET(0) NUMBITS(16) [],
        AFF1 OFFSET(16) NUMBITS(8) [],
        INTID OFFSET(24) NUMBITS(4) [],
        AFF2 OFFSET(32) NUMBITS(8) [],
        /// Interrupt routing mode: 1 targets every core but the sender
        IRM OFFSET(40) NUMBITS(1) [],
        AFF3 OFFSET(48) NUMBITS(8) []
    ]
];

register_structs! {
    GicDistributor {
        (0x0000 => ctlr: ReadWrite<u32, GICD_CTLR::Register>),
        (0x0004 => _reserved0),
        (0x6000 => irouter: [ReadWrite<u64>; 1020]),
        (0x7fe0 => _reserved1),
        (0x8000 => @END),
    }
}

// RD_base frame followed by the SGI_base frame
register_structs! {
    GicRedistributor {
        (0x00000 => _reserved),
        (0x00008 => typer: ReadOnly<u64, GICR_TYPER::Register>),
        (0x00010 => _reserved0),
        (0x10100 => isenabler0: ReadWrite<u32>),
        (0x10104 => _reserved1),
        (0x10180 => icenabler0: ReadWrite<u32>),
        (0x10184 => _reserved2),
        (0x10300 => isactiver0: ReadWrite<u32>),
        (0x10304 => _reserved3),
        (0x20000 => @END),
    }
}

/// Size of one redistributor (RD_base + SGI_base)
const GICR_STRIDE: usize = 0x20000;

const ICC_CTLR_EOIMODE: u64 = 1 << 1;
const ICC_IGRPEN1_EN: u64 = 1 << 0;
const ICC_PMR_DEFAULT: u64 = 0xf0;
const ICC_PMR_MASK: u64 = 0xff;

const ICH_HCR_EN: u64 = 1 << 0;
const ICH_HCR_UIE: u64 = 1 << 1;
const ICH_VTR_LISTREGS_MASK: u64 = 0x1f;
const ICH_VMCR_VENG1: u64 = 1 << 1;
const ICH_VMCR_VEOIM: u64 = 1 << 9;
const ICH_VMCR_VPMR_SHIFT: u64 = 24;

const INTID_MASK: u64 = 0xff_ffff;

/// IROUTER.Interrupt_Routing_Mode: any participating core
const IROUTER_IRM: u64 = 1 << 31;

/// Aff3.Aff2.Aff1.Aff0 of an MPIDR, in MPIDR/IROUTER layout
const MPIDR_AFF_MASK: u64 = 0xff_00ff_ffff;

/// Affinity packed as in GICR_TYPER: Aff3 in the top byte
const fn packed_affinity(mpidr: u64) -> u64 {
    ((mpidr >> 32) & 0xff) << 24 | (mpidr & 0xff_ffff)
}

/// Interface registers of the calling core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GicReg {
    IchHcr,
    IchVtr,
    IchVmcr,
    IchElrsr,
    IchAp1r0,
    IccCtlr,
    IccPmr,
    IccIgrpen1,
    IccIar1,
    IccEoir1,
    IccDir,
    IccSgi1r,
    Mpidr,
}

/// Access to the GICv3 system registers of the calling core
///
/// `cpu` is always the calling core; hardware implementations ignore it.
pub trait GicSysRegs: Sync {
    fn read(&self, cpu: usize, reg: GicReg) -> u64;
    fn write(&self, cpu: usize, reg: GicReg, value: u64);
    fn read_lr(&self, cpu: usize, n: usize) -> u64;
    fn write_lr(&self, cpu: usize, n: usize, value: u64);
}

fn encode_lr(slot: &InjectionSlot) -> u64 {
    let mut lr = LocalRegisterCopy::<u64, ICH_LR::Register>::new(0);
    // Group 1 so the guest takes it as IRQ.
    lr.modify(ICH_LR::VINTID.val(slot.virq as u64) + ICH_LR::GROUP::SET);
    if slot.flags.contains(SlotFlags::HW) {
        lr.modify(ICH_LR::HW::SET + ICH_LR::PINTID.val(slot.phys_irq as u64));
    }
    if slot.flags.contains(SlotFlags::PENDING) {
        lr.modify(ICH_LR::PENDING::SET);
    }
    if slot.flags.contains(SlotFlags::ACTIVE) {
        lr.modify(ICH_LR::ACTIVE::SET);
    }
    lr.get()
}

fn decode_lr(value: u64) -> InjectionSlot {
    let lr = LocalRegisterCopy::<u64, ICH_LR::Register>::new(value);
    let mut flags = SlotFlags::empty();
    flags.set(SlotFlags::PENDING, lr.is_set(ICH_LR::PENDING));
    flags.set(SlotFlags::ACTIVE, lr.is_set(ICH_LR::ACTIVE));
    flags.set(SlotFlags::HW, lr.is_set(ICH_LR::HW));
    InjectionSlot {
        virq: lr.read(ICH_LR::VINTID) as u32,
        phys_irq: if flags.contains(SlotFlags::HW) {
            lr.read(ICH_LR::PINTID) as u32
        } else {
            0
        },
        flags,
    }
}

/// Build an ICC_SGI1R value for `targets` (Aff0 bits) in one cluster
pub fn sgi1r_value(cluster_mpidr: u64, targets: u16, sgi: u32) -> u64 {
    let mut sgi1r = LocalRegisterCopy::<u64, ICC_SGI1R::Register>::new(0);
    sgi1r.modify(
        ICC_SGI1R::TARGETLIST.val(targets as u64)
            + ICC_SGI1R::AFF1.val((cluster_mpidr >> 8) & 0xff)
            + ICC_SGI1R::AFF2.val((cluster_mpidr >> 16) & 0xff)
            + ICC_SGI1R::AFF3.val((cluster_mpidr >> 32) & 0xff)
            + ICC_SGI1R::INTID.val(sgi as u64),
    );
    sgi1r.get()
}

/// Decoded ICC_SGI1R write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sgi1r {
    /// Aff0 bits of the targeted cores
    pub target_list: u16,
    /// Aff3.Aff2.Aff1 of the targeted cluster, in MPIDR layout
    pub cluster: u64,
    pub sgi: u32,
    /// Every core but the sender, target list ignored
    pub broadcast: bool,
}

impl Sgi1r {
    pub fn decode(value: u64) -> Self {
        let sgi1r = LocalRegisterCopy::<u64, ICC_SGI1R::Register>::new(value);
        Self {
            target_list: sgi1r.read(ICC_SGI1R::TARGETLIST) as u16,
            cluster: sgi1r.read(ICC_SGI1R::AFF3) << 32
                | sgi1r.read(ICC_SGI1R::AFF2) << 16
                | sgi1r.read(ICC_SGI1R::AFF1) << 8,
            sgi: sgi1r.read(ICC_SGI1R::INTID) as u32,
            broadcast: sgi1r.is_set(ICC_SGI1R::IRM),
        }
    }
}

/// GICv3 with system-register CPU interface
pub struct Gicv3 {
    gicd_base: usize,
    gicr_base: usize,
    maintenance_irq: u32,
    sysregs: &'static dyn GicSysRegs,
    num_lrs: AtomicUsize,
    /// MPIDR affinity of each core, valid once the core is online
    mpidr: [AtomicU64; MAX_CPUS],
    /// Redistributor of each core
    redist: [AtomicUsize; MAX_CPUS],
    online: AtomicU64,
}

impl Gicv3 {
    pub fn new(
        gicd_base: usize,
        gicr_base: usize,
        maintenance_irq: u32,
        sysregs: &'static dyn GicSysRegs,
    ) -> Result<Self> {
        if gicd_base == 0 || gicr_base == 0 {
            log::error!("GICv3: missing register frame");
            return Err(arch::Error::UnsupportedGic.into());
        }
        Ok(Self {
            gicd_base,
            gicr_base,
            maintenance_irq,
            sysregs,
            num_lrs: AtomicUsize::new(0),
            mpidr: core::array::from_fn(|_| AtomicU64::new(0)),
            redist: core::array::from_fn(|_| AtomicUsize::new(0)),
            online: AtomicU64::new(0),
        })
    }

    fn gicd(&self) -> &GicDistributor {
        // SAFETY: the base was handed over as the mapped distributor frame
        // and stays mapped for the lifetime of the hypervisor.
        unsafe { &*(self.gicd_base as *const GicDistributor) }
    }

    fn redistributor(&self, base: usize) -> &GicRedistributor {
        // SAFETY: `base` lies within the mapped redistributor region, on a
        // frame boundary found by walking GICR_TYPER.
        unsafe { &*(base as *const GicRedistributor) }
    }

    /// Redistributor of `cpu`, `None` before its per-core init
    fn local_redist(&self, cpu: usize) -> Option<&GicRedistributor> {
        let base = self.redist.get(cpu)?.load(Ordering::Acquire);
        (base != 0).then(|| self.redistributor(base))
    }

    fn online_cpus(&self) -> CpuSet {
        CpuSet::from_bits(self.online.load(Ordering::Acquire))
    }

    fn cpu_mpidr(&self, cpu: usize) -> Option<u64> {
        if !self.online_cpus().contains(cpu) {
            return None;
        }
        self.mpidr.get(cpu).map(|mpidr| mpidr.load(Ordering::Acquire))
    }

    fn find_redistributor(&self, mpidr: u64) -> Option<usize> {
        let affinity = packed_affinity(mpidr);
        let mut base = self.gicr_base;
        // Walk at most one frame per supported core.
        for _ in 0..MAX_CPUS {
            let typer = self.redistributor(base).typer.extract();
            if typer.read(GICR_TYPER::AFFINITY) == affinity {
                return Some(base);
            }
            if typer.is_set(GICR_TYPER::LAST) {
                break;
            }
            base += GICR_STRIDE;
        }
        None
    }

    fn sgi_and_maintenance_mask(&self) -> u32 {
        0x0000_ffff | (1 << self.maintenance_irq)
    }

    fn clear_lrs(&self, cpu: usize) {
        for n in 0..self.num_lrs.load(Ordering::Relaxed) {
            self.sysregs.write_lr(cpu, n, 0);
        }
    }
}

impl IrqChip for Gicv3 {
    fn version(&self) -> GicVersion {
        GicVersion::V3
    }

    fn init(&self) -> Result<()> {
        if !self.gicd().ctlr.is_set(GICD_CTLR::ARE_NS) {
            log::error!("GICv3: affinity routing disabled");
            return Err(arch::Error::UnsupportedGic.into());
        }
        log::info!("GICv3: distributor at {:#x}", self.gicd_base);
        Ok(())
    }

    fn per_core_init(&self, cpu: usize) -> Result<()> {
        let regs = self.sysregs;
        let (Some(mpidr_slot), Some(redist_slot)) = (self.mpidr.get(cpu), self.redist.get(cpu)) else {
            return Err(crate::Error::InvalidArgument);
        };

        let mpidr = regs.read(cpu, GicReg::Mpidr) & MPIDR_AFF_MASK;
        let Some(redist) = self.find_redistributor(mpidr) else {
            log::error!("GICv3: no redistributor for cpu {} (mpidr {:#x})", cpu, mpidr);
            return Err(arch::Error::UnsupportedGic.into());
        };
        mpidr_slot.store(mpidr, Ordering::Release);
        redist_slot.store(redist, Ordering::Release);

        self.redistributor(redist).isenabler0.set(self.sgi_and_maintenance_mask());

        // Hand the interface state the root cell had over to the virtual interface.
        let cell_ctlr = regs.read(cpu, GicReg::IccCtlr);
        let cell_pmr = regs.read(cpu, GicReg::IccPmr);
        let cell_igrpen1 = regs.read(cpu, GicReg::IccIgrpen1);

        regs.write(cpu, GicReg::IccCtlr, ICC_CTLR_EOIMODE);
        regs.write(cpu, GicReg::IccPmr, ICC_PMR_DEFAULT);
        regs.write(cpu, GicReg::IccIgrpen1, ICC_IGRPEN1_EN);

        let num_lrs = ((regs.read(cpu, GicReg::IchVtr) & ICH_VTR_LISTREGS_MASK) as usize + 1).min(MAX_INJECTION_SLOTS);
        self.num_lrs.store(num_lrs, Ordering::Relaxed);

        let mut vmcr = (cell_pmr & ICC_PMR_MASK) << ICH_VMCR_VPMR_SHIFT;
        if cell_igrpen1 & ICC_IGRPEN1_EN != 0 {
            vmcr |= ICH_VMCR_VENG1;
        }
        if cell_ctlr & ICC_CTLR_EOIMODE != 0 {
            vmcr |= ICH_VMCR_VEOIM;
        }
        regs.write(cpu, GicReg::IchVmcr, vmcr);
        regs.write(cpu, GicReg::IchHcr, ICH_HCR_EN);

        self.clear_lrs(cpu);

        self.online.fetch_or(1 << cpu, Ordering::AcqRel);
        log::debug!("GICv3: cpu {} mpidr {:#x}, {} list registers", cpu, mpidr, num_lrs);
        Ok(())
    }

    fn per_core_reset(&self, cpu: usize, is_shutdown: bool) {
        let regs = self.sysregs;
        self.clear_lrs(cpu);

        if let Some(redist) = self.local_redist(cpu) {
            let active = redist.isactiver0.get();
            for irq in NUM_SGIS..32 {
                if active & (1 << irq) != 0 {
                    regs.write(cpu, GicReg::IccDir, irq as u64);
                }
            }
            redist.isenabler0.set(self.sgi_and_maintenance_mask());
            // Only root cell cores shut down; their PPIs stay as Linux left them.
            if !is_shutdown {
                redist.icenabler0.set(0xffff_0000 & !(1 << self.maintenance_irq));
            }
        }

        regs.write(cpu, GicReg::IchAp1r0, 0);

        if is_shutdown {
            regs.write(cpu, GicReg::IchHcr, 0);

            let vmcr = regs.read(cpu, GicReg::IchVmcr);
            let ctlr = if vmcr & ICH_VMCR_VEOIM != 0 { ICC_CTLR_EOIMODE } else { 0 };
            regs.write(cpu, GicReg::IccCtlr, ctlr);
            regs.write(cpu, GicReg::IccPmr, (vmcr >> ICH_VMCR_VPMR_SHIFT) & ICC_PMR_MASK);
            let igrpen1 = if vmcr & ICH_VMCR_VENG1 != 0 { ICC_IGRPEN1_EN } else { 0 };
            regs.write(cpu, GicReg::IccIgrpen1, igrpen1);
        }
    }

    fn send_sgi(&self, targets: CpuSet, sgi: u32) -> Result<()> {
        if sgi >= NUM_SGIS {
            return Err(arch::Error::InvalidIrq(sgi).into());
        }
        let Some(sender) = self.online_cpus().first() else {
            return Err(crate::Error::NotInitialized);
        };

        let mut remaining = targets;
        while let Some(first) = remaining.first() {
            let Some(leader) = self.cpu_mpidr(first) else {
                log::warn!("GICv3: SGI {} to offline cpu {}", sgi, first);
                return Err(crate::Error::InvalidArgument);
            };
            let cluster = leader & !0xff;
            let mut list = 0u16;
            for cpu in remaining.iter() {
                let Some(mpidr) = self.cpu_mpidr(cpu) else {
                    continue;
                };
                let aff0 = mpidr & 0xff;
                // The target list only covers Aff0 0-15.
                if mpidr & !0xff == cluster && aff0 < 16 {
                    list |= 1 << aff0;
                    remaining.remove(cpu);
                }
            }
            if list == 0 {
                log::warn!("GICv3: cpu {} not reachable by SGI", first);
                return Err(arch::Error::UnsupportedGic.into());
            }
            self.sysregs.write(sender, GicReg::IccSgi1r, sgi1r_value(cluster, list, sgi));
        }
        Ok(())
    }

    fn read_iar(&self, cpu: usize) -> u32 {
        let irq = self.sysregs.read(cpu, GicReg::IccIar1) & INTID_MASK;
        // Special INTIDs 1020-1023 all read as spurious.
        irq.min(SPURIOUS_IRQ as u64) as u32
    }

    fn eoi_irq(&self, cpu: usize, irq: u32, deactivate: bool) {
        self.sysregs.write(cpu, GicReg::IccEoir1, irq as u64);
        if deactivate {
            self.sysregs.write(cpu, GicReg::IccDir, irq as u64);
        }
    }

    fn num_slots(&self, _cpu: usize) -> usize {
        self.num_lrs.load(Ordering::Relaxed)
    }

    fn read_slot(&self, cpu: usize, slot: usize) -> Option<InjectionSlot> {
        if slot >= self.num_slots(cpu) {
            return None;
        }
        if self.sysregs.read(cpu, GicReg::IchElrsr) & (1 << slot) != 0 {
            return None;
        }
        Some(decode_lr(self.sysregs.read_lr(cpu, slot)))
    }

    fn write_slot(&self, cpu: usize, slot: usize, entry: Option<InjectionSlot>) {
        if slot >= self.num_slots(cpu) {
            return;
        }
        self.sysregs.write_lr(cpu, slot, entry.as_ref().map_or(0, encode_lr));
    }

    fn enable_maint_irq(&self, cpu: usize, enable: bool) {
        let hcr = self.sysregs.read(cpu, GicReg::IchHcr);
        let hcr = if enable { hcr | ICH_HCR_UIE } else { hcr & !ICH_HCR_UIE };
        self.sysregs.write(cpu, GicReg::IchHcr, hcr);
    }

    fn irq_targets(&self, irq: u32) -> CpuSet {
        let Some(router) = self.gicd().irouter.get(irq as usize) else {
            return CpuSet::empty();
        };
        let route = router.get();
        if route & IROUTER_IRM != 0 {
            return self.online_cpus();
        }
        let mut cpus = CpuSet::empty();
        for cpu in self.online_cpus().iter() {
            if self.cpu_mpidr(cpu) == Some(route & MPIDR_AFF_MASK) {
                cpus.insert(cpu);
            }
        }
        cpus
    }

    fn set_irq_target(&self, irq: u32, cpu: usize) {
        let (Some(router), Some(mpidr)) = (self.gicd().irouter.get(irq as usize), self.cpu_mpidr(cpu)) else {
            return;
        };
        router.set(mpidr);
    }
}

cfg_if! {
    if #[cfg(target_arch = "aarch64")] {
        macro_rules! read_gic_reg {
            ($name:literal) => {{
                let value: u64;
                // SAFETY: GIC interface registers of the calling core, accessed at EL2.
                unsafe {
                    core::arch::asm!(concat!("mrs {}, ", $name), out(reg) value, options(nomem, nostack));
                }
                value
            }};
        }

        macro_rules! write_gic_reg {
            ($name:literal, $value:expr) => {{
                let value: u64 = $value;
                // SAFETY: GIC interface registers of the calling core, accessed at EL2.
                unsafe {
                    core::arch::asm!(concat!("msr ", $name, ", {}"), in(reg) value, options(nomem, nostack));
                }
            }};
        }

        macro_rules! lr_access {
            ($n:expr, $access:ident $(, $value:expr)?) => {
                match $n {
                    0 => $access!("s3_4_c12_c12_0" $(, $value)?),
                    1 => $access!("s3_4_c12_c12_1" $(, $value)?),
                    2 => $access!("s3_4_c12_c12_2" $(, $value)?),
                    3 => $access!("s3_4_c12_c12_3" $(, $value)?),
                    4 => $access!("s3_4_c12_c12_4" $(, $value)?),
                    5 => $access!("s3_4_c12_c12_5" $(, $value)?),
                    6 => $access!("s3_4_c12_c12_6" $(, $value)?),
                    7 => $access!("s3_4_c12_c12_7" $(, $value)?),
                    8 => $access!("s3_4_c12_c13_0" $(, $value)?),
                    9 => $access!("s3_4_c12_c13_1" $(, $value)?),
                    10 => $access!("s3_4_c12_c13_2" $(, $value)?),
                    11 => $access!("s3_4_c12_c13_3" $(, $value)?),
                    12 => $access!("s3_4_c12_c13_4" $(, $value)?),
                    13 => $access!("s3_4_c12_c13_5" $(, $value)?),
                    14 => $access!("s3_4_c12_c13_6" $(, $value)?),
                    _ => $access!("s3_4_c12_c13_7" $(, $value)?),
                }
            };
        }

        /// GICv3 system registers of the calling core
        #[derive(Debug, Default)]
        pub struct HwGicRegs;

        impl GicSysRegs for HwGicRegs {
            fn read(&self, _cpu: usize, reg: GicReg) -> u64 {
                match reg {
                    GicReg::IchHcr => read_gic_reg!("s3_4_c12_c11_0"),
                    GicReg::IchVtr => read_gic_reg!("s3_4_c12_c11_1"),
                    GicReg::IchElrsr => read_gic_reg!("s3_4_c12_c11_5"),
                    GicReg::IchVmcr => read_gic_reg!("s3_4_c12_c11_7"),
                    GicReg::IchAp1r0 => read_gic_reg!("s3_4_c12_c9_0"),
                    GicReg::IccCtlr => read_gic_reg!("s3_0_c12_c12_4"),
                    GicReg::IccPmr => read_gic_reg!("s3_0_c4_c6_0"),
                    GicReg::IccIgrpen1 => read_gic_reg!("s3_0_c12_c12_7"),
                    GicReg::IccIar1 => read_gic_reg!("s3_0_c12_c12_0"),
                    GicReg::Mpidr => read_gic_reg!("mpidr_el1"),
                    GicReg::IccEoir1 | GicReg::IccDir | GicReg::IccSgi1r => 0,
                }
            }

            fn write(&self, _cpu: usize, reg: GicReg, value: u64) {
                match reg {
                    GicReg::IchHcr => write_gic_reg!("s3_4_c12_c11_0", value),
                    GicReg::IchVmcr => write_gic_reg!("s3_4_c12_c11_7", value),
                    GicReg::IchAp1r0 => write_gic_reg!("s3_4_c12_c9_0", value),
                    GicReg::IccCtlr => write_gic_reg!("s3_0_c12_c12_4", value),
                    GicReg::IccPmr => write_gic_reg!("s3_0_c4_c6_0", value),
                    GicReg::IccIgrpen1 => write_gic_reg!("s3_0_c12_c12_7", value),
                    GicReg::IccEoir1 => write_gic_reg!("s3_0_c12_c12_1", value),
                    GicReg::IccDir => write_gic_reg!("s3_0_c12_c11_1", value),
                    GicReg::IccSgi1r => {
                        write_gic_reg!("s3_0_c12_c11_5", value);
                        // SAFETY: barrier only.
                        unsafe { core::arch::asm!("isb", options(nomem, nostack)) };
                    }
                    GicReg::IchVtr | GicReg::IchElrsr | GicReg::IccIar1 | GicReg::Mpidr => {
                        log::warn!("GICv3: write to read-only {:?}", reg);
                    }
                }
            }

            fn read_lr(&self, _cpu: usize, n: usize) -> u64 {
                lr_access!(n, read_gic_reg)
            }

            fn write_lr(&self, _cpu: usize, n: usize, value: u64) {
                lr_access!(n, write_gic_reg, value)
            }
        }
    }
}
