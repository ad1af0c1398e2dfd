//! Virtual interrupt delivery
//!
//! Interrupts reach a guest through the injection slots of its core. A
//! core only ever writes its own slots; interrupts for another core are
//! queued on the target and announced with [`Signal::InjectPending`]. When
//! all slots are taken the interrupt waits in the queue and the
//! maintenance interrupt fires once the guest has drained the slots.
//!
//! SGIs 0-2 are reserved for hypervisor signals between cores.

use super::gic::{is_sgi, is_spi, InjectionSlot, SPURIOUS_IRQ};
use super::gicv3::Sgi1r;
use crate::arch::arm64::cpu::vcpu::TrapReturn;
use crate::config::GicVersion;
use crate::kernel::vmm::{CellId, Hypervisor};
use crate::utils::CpuSet;

/// SGIs used by the hypervisor itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Signal {
    /// Re-scan the pending interrupt queue
    InjectPending = 0,
    /// Run the control checkpoint
    Management = 1,
    /// Leave the hypervisor
    CoreOff = 2,
}

impl Signal {
    pub const fn from_irq(irq: u32) -> Option<Self> {
        match irq {
            0 => Some(Signal::InjectPending),
            1 => Some(Signal::Management),
            2 => Some(Signal::CoreOff),
            _ => None,
        }
    }
}

/// Result of placing an interrupt into a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectStatus {
    Ok,
    /// A slot already holds this interrupt
    AlreadyPending,
    /// No free slot
    Busy,
    /// The core is parked and takes no interrupts
    Offline,
}

impl Hypervisor<'_> {
    /// Place `virq` into a free injection slot of the calling core `cpu`
    pub fn inject(&self, cpu: usize, virq: u32, hardware_backed: bool) -> InjectStatus {
        match self.get_cpu(cpu) {
            Some(percpu) if !percpu.is_waiting_for_poweron() => {}
            _ => {
                log::debug!("cpu {}: offline, irq {} not injected", cpu, virq);
                return InjectStatus::Offline;
            }
        }
        let chip = self.platform().irqchip;
        let mut free = None;

        for slot in 0..chip.num_slots(cpu) {
            match chip.read_slot(cpu, slot) {
                // Physical and virtual ids are identical, so the id alone identifies it.
                Some(entry) if entry.virq == virq => return InjectStatus::AlreadyPending,
                Some(_) => {}
                None => {
                    free.get_or_insert(slot);
                }
            }
        }

        let Some(slot) = free else {
            return InjectStatus::Busy;
        };
        chip.write_slot(cpu, slot, Some(InjectionSlot::pending(virq, hardware_backed)));
        log::trace!("cpu {}: injected irq {} in slot {}", cpu, virq, slot);
        InjectStatus::Ok
    }

    /// Acknowledge the next physical interrupt, `None` once nothing is pending
    pub fn acknowledge(&self, cpu: usize) -> Option<u32> {
        let irq = self.platform().irqchip.read_iar(cpu);
        (irq < SPURIOUS_IRQ).then_some(irq)
    }

    /// End handling of `irq`; `deactivate` unless the guest completes it
    pub fn acknowledge_and_complete(&self, cpu: usize, irq: u32, deactivate: bool) {
        self.platform().irqchip.eoi_irq(cpu, irq, deactivate);
    }

    /// Raise `signal` on every core in `targets`
    pub fn send_signal(&self, targets: CpuSet, signal: Signal) {
        if let Err(err) = self.platform().irqchip.send_sgi(targets, signal as u32) {
            log::error!("Failed to send {:?} to {:?}: {}", signal, targets, err);
        }
    }

    /// Deliver `virq` to `target`, on behalf of the calling core `local`
    ///
    /// Local interrupts go straight into a slot if one is free. Everything
    /// else is queued; a remote target is signaled to pick it up. Interrupts
    /// for a parked core are dropped.
    pub fn set_pending(&self, local: usize, target: usize, virq: u32) {
        let Some(percpu) = self.get_cpu(target) else {
            log::warn!("cpu {}: no such core, dropping irq {}", target, virq);
            return;
        };
        if percpu.is_waiting_for_poweron() {
            log::debug!("cpu {}: dropping irq {} for parked core", target, virq);
            return;
        }

        let local_injection = local == target;
        if local_injection && self.inject(target, virq, !is_sgi(virq)) != InjectStatus::Busy {
            return;
        }

        if percpu.pending_irqs.lock().push_back(virq).is_err() {
            log::warn!("cpu {}: pending queue full, dropping irq {}", target, virq);
        }

        if local_injection {
            // Slots are full, retry on underflow.
            self.platform().irqchip.enable_maint_irq(target, true);
        } else {
            self.send_signal(CpuSet::single(target), Signal::InjectPending);
        }
    }

    /// Move queued interrupts of the calling core into free slots
    pub fn inject_pending(&self, cpu: usize) {
        let percpu = self.cpu(cpu);
        let chip = self.platform().irqchip;

        if percpu.is_waiting_for_poweron() {
            percpu.pending_irqs.lock().clear();
            chip.enable_maint_irq(cpu, false);
            return;
        }

        let mut queue = percpu.pending_irqs.lock();
        while let Some(&virq) = queue.front() {
            if self.inject(cpu, virq, !is_sgi(virq)) == InjectStatus::Busy {
                chip.enable_maint_irq(cpu, true);
                return;
            }
            queue.pop_front();
        }
        chip.enable_maint_irq(cpu, false);
    }

    /// Route shared interrupt `irq` into `cell` unless a core of the cell already gets it
    pub fn adjust_irq_routing(&self, cell: CellId, irq: u32) {
        if !is_spi(irq) {
            return;
        }
        let chip = self.platform().irqchip;
        let cpus = self.cell_cpus(cell);
        let Some(first) = cpus.first() else {
            return;
        };
        if chip.irq_targets(irq).intersects(cpus) {
            return;
        }
        chip.set_irq_target(irq, first);
        log::debug!("irq {} routed to cpu {} of cell {}", irq, first, cell.0);
    }

    /// Emulate a guest ICC_SGI1R write from the calling core `cpu`
    ///
    /// Target lists name virtual ids of the caller's cell; guests see a
    /// single cluster, so any other affinity reaches no core.
    pub(crate) fn handle_sgir_write(&self, cpu: usize, value: u64) -> TrapReturn {
        if self.platform().irqchip.version() != GicVersion::V3 {
            return TrapReturn::Unhandled;
        }

        let sgi1r = Sgi1r::decode(value);
        let cell = self.cpu(cpu).cell();
        let mut targets = CpuSet::empty();

        if sgi1r.broadcast {
            targets = self.cell_cpus(cell);
            targets.remove(cpu);
        } else if sgi1r.cluster == 0 {
            for virt in 0..16u32 {
                if sgi1r.target_list & (1 << virt) == 0 {
                    continue;
                }
                if let Some(phys) = self.virt2phys(cell, virt) {
                    targets.insert(phys);
                }
            }
        }

        for target in targets.iter() {
            self.set_pending(cpu, target, sgi1r.sgi);
        }
        TrapReturn::Handled
    }
}
