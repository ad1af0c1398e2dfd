//! Interrupt handling for ARM64
//!
//! Hardware access goes through the [`gic::IrqChip`] trait with a GICv2 and
//! a GICv3 backend; [`vgic`] builds interrupt injection, the pending
//! queues and the inter-core signals on top of it.

pub mod gic;
pub mod gicv2;
pub mod gicv3;
pub mod vgic;

// Re-export commonly used types
pub use gic::{Gic, InjectionSlot, IrqChip, SlotFlags, SPURIOUS_IRQ};
pub use gicv2::Gicv2;
pub use gicv3::{GicReg, GicSysRegs, Gicv3};
pub use vgic::{InjectStatus, Signal};

#[cfg(target_arch = "aarch64")]
pub use gicv3::HwGicRegs;
