//! GICv2 backend
//!
//! Distributor, CPU interface and virtual interface control (GICH) are
//! memory mapped. The CPU interface and GICH frames are banked per core,
//! so every per-core operation touches the frame of the calling core.
//!
//! Cores are addressed by their CPU interface number in ITARGETSR and
//! SGIR. The number of each core is probed from the banked ITARGETSR0
//! during per-core init.

use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs, LocalRegisterCopy};

use super::gic::{InjectionSlot, IrqChip, SlotFlags, NUM_SGIS};
use crate::arch;
use crate::config::{GicVersion, MAX_CPUS, MAX_INJECTION_SLOTS};
use crate::utils::CpuSet;
use crate::Result;

register_bitfields! [u32,
    GICD_TYPER [
        ITLINESNUMBER OFFSET(0) NUMBITS(5) [],
        CPUNUMBER OFFSET(5) NUMBITS(3) []
    ],
    GICC_CTLR [
        ENABLEGRP1 OFFSET(0) NUMBITS(1) [],
        EOIMODENS OFFSET(9) NUMBITS(1) []
    ],
    GICH_HCR [
        EN OFFSET(0) NUMBITS(1) [],
        /// Underflow interrupt enable
        UIE OFFSET(1) NUMBITS(1) []
    ],
    GICH_VTR [
        LISTREGS OFFSET(0) NUMBITS(6) []
    ],
    GICH_VMCR [
        VENGRP0 OFFSET(0) NUMBITS(1) [],
        VEOIMODE OFFSET(9) NUMBITS(1) [],
        /// Upper five bits of the virtual priority mask
        VPMR OFFSET(27) NUMBITS(5) []
    ],
    GICH_LR [
        VIRTUALID OFFSET(0) NUMBITS(10) [],
        PHYSICALID OFFSET(10) NUMBITS(10) [],
        PRIORITY OFFSET(23) NUMBITS(5) [],
        PENDING OFFSET(28) NUMBITS(1) [],
        ACTIVE OFFSET(29) NUMBITS(1) [],
        GRP1 OFFSET(30) NUMBITS(1) [],
        HW OFFSET(31) NUMBITS(1) []
    ]
];

register_structs! {
    GicDistributor {
        (0x000 => _reserved),
        (0x004 => typer: ReadOnly<u32, GICD_TYPER::Register>),
        (0x008 => _reserved0),
        (0x100 => isenabler: [ReadWrite<u32>; 32]),
        (0x180 => icenabler: [ReadWrite<u32>; 32]),
        (0x200 => _reserved1),
        (0x300 => isactiver: [ReadWrite<u32>; 32]),
        (0x380 => _reserved2),
        (0x800 => itargetsr: [ReadWrite<u8>; 1024]),
        (0xc00 => _reserved3),
        (0xf00 => sgir: WriteOnly<u32>),
        (0xf04 => _reserved4),
        (0x1000 => @END),
    }
}

register_structs! {
    GicCpuInterface {
        (0x0000 => ctlr: ReadWrite<u32, GICC_CTLR::Register>),
        (0x0004 => pmr: ReadWrite<u32>),
        (0x0008 => _reserved0),
        (0x000c => iar: ReadOnly<u32>),
        (0x0010 => eoir: WriteOnly<u32>),
        (0x0014 => _reserved1),
        (0x1000 => dir: WriteOnly<u32>),
        (0x1004 => _reserved2),
        (0x2000 => @END),
    }
}

register_structs! {
    GicHypInterface {
        (0x000 => hcr: ReadWrite<u32, GICH_HCR::Register>),
        (0x004 => vtr: ReadOnly<u32, GICH_VTR::Register>),
        (0x008 => vmcr: ReadWrite<u32, GICH_VMCR::Register>),
        (0x00c => _reserved0),
        (0x030 => elrsr: [ReadOnly<u32>; 2]),
        (0x038 => _reserved1),
        (0x0f0 => apr: ReadWrite<u32>),
        (0x0f4 => _reserved2),
        (0x100 => lr: [ReadWrite<u32, GICH_LR::Register>; 64]),
        (0x200 => @END),
    }
}

const GICC_PMR_DEFAULT: u32 = 0xf0;
/// VMCR only holds the upper five priority bits
const GICV_PMR_SHIFT: u32 = 3;

const INTID_MASK: u32 = 0x3ff;

/// Encode `slot` as a GICH_LR value
fn encode_lr(slot: &InjectionSlot) -> u32 {
    let mut lr = LocalRegisterCopy::<u32, GICH_LR::Register>::new(0);
    lr.modify(GICH_LR::VIRTUALID.val(slot.virq & INTID_MASK));
    if slot.flags.contains(SlotFlags::HW) {
        lr.modify(GICH_LR::HW::SET + GICH_LR::PHYSICALID.val(slot.phys_irq & INTID_MASK));
    }
    if slot.flags.contains(SlotFlags::PENDING) {
        lr.modify(GICH_LR::PENDING::SET);
    }
    if slot.flags.contains(SlotFlags::ACTIVE) {
        lr.modify(GICH_LR::ACTIVE::SET);
    }
    lr.get()
}

fn decode_lr(value: u32) -> InjectionSlot {
    let lr = LocalRegisterCopy::<u32, GICH_LR::Register>::new(value);
    let mut flags = SlotFlags::empty();
    flags.set(SlotFlags::PENDING, lr.is_set(GICH_LR::PENDING));
    flags.set(SlotFlags::ACTIVE, lr.is_set(GICH_LR::ACTIVE));
    flags.set(SlotFlags::HW, lr.is_set(GICH_LR::HW));
    InjectionSlot {
        virq: lr.read(GICH_LR::VIRTUALID),
        phys_irq: if flags.contains(SlotFlags::HW) {
            lr.read(GICH_LR::PHYSICALID)
        } else {
            0
        },
        flags,
    }
}

/// Memory-mapped GICv2 with virtualization extensions
pub struct Gicv2 {
    gicd_base: usize,
    gicc_base: usize,
    gich_base: usize,
    maintenance_irq: u32,
    num_lrs: AtomicUsize,
    /// CPU interface mask of each core, 0 until probed
    cpu_itf: [AtomicU8; MAX_CPUS],
}

impl Gicv2 {
    pub fn new(gicd_base: usize, gicc_base: usize, gich_base: usize, maintenance_irq: u32) -> Result<Self> {
        if gicd_base == 0 || gicc_base == 0 || gich_base == 0 {
            log::error!("GICv2: missing register frame");
            return Err(arch::Error::UnsupportedGic.into());
        }
        Ok(Self {
            gicd_base,
            gicc_base,
            gich_base,
            maintenance_irq,
            num_lrs: AtomicUsize::new(0),
            cpu_itf: core::array::from_fn(|_| AtomicU8::new(0)),
        })
    }

    fn gicd(&self) -> &GicDistributor {
        // SAFETY: the base was handed over as the mapped distributor frame
        // and stays mapped for the lifetime of the hypervisor.
        unsafe { &*(self.gicd_base as *const GicDistributor) }
    }

    fn gicc(&self) -> &GicCpuInterface {
        // SAFETY: as for the distributor; the frame is banked per core.
        unsafe { &*(self.gicc_base as *const GicCpuInterface) }
    }

    fn gich(&self) -> &GicHypInterface {
        // SAFETY: as for the distributor; the frame is banked per core.
        unsafe { &*(self.gich_base as *const GicHypInterface) }
    }

    fn itf_mask(&self, cpu: usize) -> u8 {
        self.cpu_itf.get(cpu).map_or(0, |itf| itf.load(Ordering::Acquire))
    }

    fn sgi_and_maintenance_mask(&self) -> u32 {
        0x0000_ffff | (1 << self.maintenance_irq)
    }

    fn clear_lrs(&self) {
        for lr in self.gich().lr.iter().take(self.num_lrs.load(Ordering::Relaxed)) {
            lr.set(0);
        }
    }
}

impl IrqChip for Gicv2 {
    fn version(&self) -> GicVersion {
        GicVersion::V2
    }

    fn init(&self) -> Result<()> {
        let typer = self.gicd().typer.extract();
        log::info!(
            "GICv2: {} interrupt lines, {} CPU interfaces",
            (typer.read(GICD_TYPER::ITLINESNUMBER) + 1) * 32,
            typer.read(GICD_TYPER::CPUNUMBER) + 1
        );
        Ok(())
    }

    fn per_core_init(&self, cpu: usize) -> Result<()> {
        let gicd = self.gicd();
        let gicc = self.gicc();
        let gich = self.gich();

        let Some(itf) = self.cpu_itf.get(cpu) else {
            return Err(crate::Error::InvalidArgument);
        };

        gicd.isenabler[0].set(self.sgi_and_maintenance_mask());

        // Hand the interface state the root cell had over to the virtual interface.
        let cell_ctlr = gicc.ctlr.extract();
        let cell_pmr = gicc.pmr.get();

        gicc.ctlr.write(GICC_CTLR::ENABLEGRP1::SET + GICC_CTLR::EOIMODENS::SET);
        gicc.pmr.set(GICC_PMR_DEFAULT);

        let num_lrs = (gich.vtr.read(GICH_VTR::LISTREGS) as usize + 1).min(MAX_INJECTION_SLOTS);
        self.num_lrs.store(num_lrs, Ordering::Relaxed);

        let mut vmcr = GICH_VMCR::VPMR.val(cell_pmr >> GICV_PMR_SHIFT);
        if cell_ctlr.is_set(GICC_CTLR::ENABLEGRP1) {
            vmcr += GICH_VMCR::VENGRP0::SET;
        }
        if cell_ctlr.is_set(GICC_CTLR::EOIMODENS) {
            vmcr += GICH_VMCR::VEOIMODE::SET;
        }
        gich.vmcr.write(vmcr);
        gich.hcr.write(GICH_HCR::EN::SET);

        self.clear_lrs();

        // ITARGETSR0 is banked and reads as the mask of the calling core.
        let mask = gicd.itargetsr[0].get();
        itf.store(mask, Ordering::Release);

        log::debug!("GICv2: cpu {} interface mask {:#04x}, {} list registers", cpu, mask, num_lrs);
        Ok(())
    }

    fn per_core_reset(&self, _cpu: usize, is_shutdown: bool) {
        let gicd = self.gicd();
        let gicc = self.gicc();
        let gich = self.gich();

        self.clear_lrs();

        let active = gicd.isactiver[0].get();
        for irq in NUM_SGIS..32 {
            if active & (1 << irq) != 0 {
                gicc.dir.set(irq);
            }
        }

        gicd.isenabler[0].set(self.sgi_and_maintenance_mask());
        // Only root cell cores shut down; their PPIs stay as Linux left them.
        if !is_shutdown {
            gicd.icenabler[0].set(0xffff_0000 & !(1 << self.maintenance_irq));
        }

        gich.apr.set(0);

        if is_shutdown {
            gich.hcr.set(0);

            let vmcr = gich.vmcr.extract();
            let mut ctlr = GICC_CTLR::ENABLEGRP1::CLEAR;
            if vmcr.is_set(GICH_VMCR::VENGRP0) {
                ctlr += GICC_CTLR::ENABLEGRP1::SET;
            }
            if vmcr.is_set(GICH_VMCR::VEOIMODE) {
                ctlr += GICC_CTLR::EOIMODENS::SET;
            }
            gicc.ctlr.write(ctlr);
            gicc.pmr.set(vmcr.read(GICH_VMCR::VPMR) << GICV_PMR_SHIFT);
        }
    }

    fn send_sgi(&self, targets: CpuSet, sgi: u32) -> Result<()> {
        if sgi >= NUM_SGIS {
            return Err(arch::Error::InvalidIrq(sgi).into());
        }
        let mask = targets.iter().fold(0u32, |mask, cpu| mask | self.itf_mask(cpu) as u32);
        if mask == 0 {
            log::warn!("GICv2: SGI {} to {:?} has no reachable target", sgi, targets);
            return Err(crate::Error::InvalidArgument);
        }
        // TargetListFilter 0: use the target list
        self.gicd().sgir.set((mask << 16) | sgi);
        Ok(())
    }

    fn read_iar(&self, _cpu: usize) -> u32 {
        self.gicc().iar.get() & INTID_MASK
    }

    fn eoi_irq(&self, _cpu: usize, irq: u32, deactivate: bool) {
        let gicc = self.gicc();
        gicc.eoir.set(irq);
        if deactivate {
            gicc.dir.set(irq);
        }
    }

    fn num_slots(&self, _cpu: usize) -> usize {
        self.num_lrs.load(Ordering::Relaxed)
    }

    fn read_slot(&self, cpu: usize, slot: usize) -> Option<InjectionSlot> {
        if slot >= self.num_slots(cpu) {
            return None;
        }
        let gich = self.gich();
        // ELRSR marks list registers without pending or active state.
        if gich.elrsr[slot / 32].get() & (1 << (slot % 32)) != 0 {
            return None;
        }
        Some(decode_lr(gich.lr[slot].get()))
    }

    fn write_slot(&self, cpu: usize, slot: usize, entry: Option<InjectionSlot>) {
        if slot >= self.num_slots(cpu) {
            return;
        }
        self.gich().lr[slot].set(entry.as_ref().map_or(0, encode_lr));
    }

    fn enable_maint_irq(&self, _cpu: usize, enable: bool) {
        let hcr = &self.gich().hcr;
        if enable {
            hcr.modify(GICH_HCR::UIE::SET);
        } else {
            hcr.modify(GICH_HCR::UIE::CLEAR);
        }
    }

    fn irq_targets(&self, irq: u32) -> CpuSet {
        let Some(target) = self.gicd().itargetsr.get(irq as usize) else {
            return CpuSet::empty();
        };
        let mask = target.get();
        let mut cpus = CpuSet::empty();
        for cpu in 0..MAX_CPUS {
            if self.itf_mask(cpu) & mask != 0 {
                cpus.insert(cpu);
            }
        }
        cpus
    }

    fn set_irq_target(&self, irq: u32, cpu: usize) {
        if let Some(target) = self.gicd().itargetsr.get(irq as usize) {
            target.set(self.itf_mask(cpu));
        }
    }
}
