//! GIC (Generic Interrupt Controller) abstraction for ARM64
//!
//! The virtual interrupt layer talks to the hardware through [`IrqChip`].
//! Two backends implement it, [`Gicv2`] (memory-mapped CPU and hypervisor
//! interfaces) and [`Gicv3`] (system-register interfaces); one of them is
//! chosen at initialization and held as [`Gic`].
//!
//! Injection slots are the list registers of the hypervisor interface.
//! Slot contents are exchanged as [`InjectionSlot`], so the scanning and
//! queueing logic above is shared by both generations.
//!
//! Reference: ARM IHI 0048B (GICv2), ARM IHI 0069 (GICv3)

use bitflags::bitflags;

use super::gicv2::Gicv2;
use super::gicv3::{GicSysRegs, Gicv3};
use crate::config::{GicConfig, GicVersion};
use crate::utils::CpuSet;
use crate::Result;

/// Number of software generated interrupts
pub const NUM_SGIS: u32 = 16;

/// First shared peripheral interrupt
pub const FIRST_SPI: u32 = 32;

/// INTIDs from here on are special (spurious, reserved)
pub const SPURIOUS_IRQ: u32 = 1020;

#[inline]
pub const fn is_sgi(irq: u32) -> bool {
    irq < NUM_SGIS
}

#[inline]
pub const fn is_spi(irq: u32) -> bool {
    irq >= FIRST_SPI && irq < SPURIOUS_IRQ
}

bitflags! {
    /// State of an occupied injection slot
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlotFlags: u8 {
        const PENDING = 1 << 0;
        const ACTIVE = 1 << 1;
        /// Completion by the guest deactivates `phys_irq`
        const HW = 1 << 2;
    }
}

/// One interrupt presented to the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionSlot {
    pub virq: u32,
    /// Physical INTID, only meaningful with [`SlotFlags::HW`]
    pub phys_irq: u32,
    pub flags: SlotFlags,
}

impl InjectionSlot {
    /// Pending interrupt, backed by the same physical INTID if `hardware_backed`
    pub fn pending(virq: u32, hardware_backed: bool) -> Self {
        if hardware_backed {
            Self {
                virq,
                phys_irq: virq,
                flags: SlotFlags::PENDING | SlotFlags::HW,
            }
        } else {
            Self {
                virq,
                phys_irq: 0,
                flags: SlotFlags::PENDING,
            }
        }
    }

    pub fn is_hardware_backed(&self) -> bool {
        self.flags.contains(SlotFlags::HW)
    }
}

/// Hardware-facing half of the virtual interrupt controller
///
/// Per-core operations are only ever issued by the core named by `cpu`;
/// the hardware backends access the banked interface of the calling core.
pub trait IrqChip: Sync {
    fn version(&self) -> GicVersion;

    /// Global initialization, once on the boot core
    fn init(&self) -> Result<()>;

    /// Bring up the CPU and hypervisor interfaces of `cpu`
    fn per_core_init(&self, cpu: usize) -> Result<()>;

    /// Clear all injected state of `cpu`
    ///
    /// On shutdown the physical interface is handed back in a state the
    /// root cell can continue with.
    fn per_core_reset(&self, cpu: usize, is_shutdown: bool);

    /// Raise SGI `sgi` on every core in `targets`
    fn send_sgi(&self, targets: CpuSet, sgi: u32) -> Result<()>;

    /// Acknowledge the highest priority pending interrupt
    fn read_iar(&self, cpu: usize) -> u32;

    /// Drop the running priority of `irq`, and deactivate it if asked
    fn eoi_irq(&self, cpu: usize, irq: u32, deactivate: bool);

    /// Number of injection slots of `cpu`
    fn num_slots(&self, cpu: usize) -> usize;

    /// Contents of slot `slot`, `None` while it is free
    fn read_slot(&self, cpu: usize, slot: usize) -> Option<InjectionSlot>;

    /// Occupy or free slot `slot`
    fn write_slot(&self, cpu: usize, slot: usize, entry: Option<InjectionSlot>);

    /// Enable the maintenance interrupt for "no slot pending" underflow
    fn enable_maint_irq(&self, cpu: usize, enable: bool);

    /// Cores a shared interrupt is currently routed to
    fn irq_targets(&self, irq: u32) -> CpuSet;

    /// Route a shared interrupt to `cpu`
    fn set_irq_target(&self, irq: u32, cpu: usize);
}

/// The interrupt controller of the platform
pub enum Gic {
    V2(Gicv2),
    V3(Gicv3),
}

impl Gic {
    /// Set up the backend described by `config`
    ///
    /// `sysregs` is the system-register interface used by GICv3.
    pub fn probe(config: &GicConfig, sysregs: &'static dyn GicSysRegs) -> Result<Self> {
        let gic = match config.version {
            GicVersion::V2 => Gic::V2(Gicv2::new(
                config.gicd_base as usize,
                config.gicc_base as usize,
                config.gich_base as usize,
                config.maintenance_irq,
            )?),
            GicVersion::V3 => Gic::V3(Gicv3::new(
                config.gicd_base as usize,
                config.gicr_base as usize,
                config.maintenance_irq,
                sysregs,
            )?),
        };
        log::info!("GIC: using {:?} backend", config.version);
        Ok(gic)
    }

    pub fn as_chip(&self) -> &dyn IrqChip {
        match self {
            Gic::V2(gic) => gic,
            Gic::V3(gic) => gic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, true, false)]
    #[test_case(15, true, false)]
    #[test_case(16, false, false)]
    #[test_case(32, false, true)]
    #[test_case(1019, false, true)]
    #[test_case(1020, false, false)]
    fn test_irq_classes(irq: u32, sgi: bool, spi: bool) {
        assert_eq!(is_sgi(irq), sgi);
        assert_eq!(is_spi(irq), spi);
    }

    #[test]
    fn test_pending_slot() {
        let hw = InjectionSlot::pending(40, true);
        assert!(hw.is_hardware_backed());
        assert_eq!(hw.phys_irq, 40);

        let sw = InjectionSlot::pending(3, false);
        assert!(!sw.is_hardware_backed());
        assert_eq!(sw.flags, SlotFlags::PENDING);
    }
}
