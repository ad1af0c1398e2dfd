//! Per-core control state machine
//!
//! Cores never block on each other except in [`Hypervisor::request_suspend`].
//! Every other request only updates the target's control block under its
//! lock; the target applies it when it reaches [`Hypervisor::checkpoint`],
//! which runs from the management signal handler on the target itself.
//!
//! Pending requests are applied in this order: suspend (wait in place),
//! park, reset, shutdown. A reset without a valid entry address parks the
//! core instead.

use super::percpu::ControlRequests;
use super::regs::{GuestRegisters, RESET_PSR_AARCH32, RESET_PSR_AARCH64};
use super::reset::{reset_guest_state, ResetTarget};
use super::sysreg::SysRegs;
use super::vcpu::ExitAction;
use super::LocalCpu;
use crate::arch::arm64::interrupt::vgic::Signal;
use crate::arch::arm64::mmu::Stage2Context;
use crate::arch::arm64::psci::PSCI_INVALID_ADDRESS;
use crate::kernel::vmm::{GuestMode, Hypervisor, ROOT_CELL};
use crate::utils::{Backoff, CpuSet};
use crate::{Error, Result};

/// What a checkpoint did to the calling core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Nothing changed, return to the guest
    Resume,
    /// Guest state was reset and points at `entry`
    Reset { entry: u64, context: u64 },
    /// The core dropped its guest and waits for a power-on
    Parked,
    /// The core leaves the hypervisor
    Shutdown,
}

/// Request decided under the control lock, applied after it is released
enum Pending {
    None,
    Reset { entry: u64, context: u64 },
    Shutdown,
}

impl Hypervisor<'_> {
    /// Send the management signal to `cpu`
    pub(crate) fn kick(&self, cpu: usize) {
        self.send_signal(CpuSet::single(cpu), Signal::Management);
    }

    /// Post a suspend request without waiting for it
    ///
    /// Returns true if the target still has to acknowledge it.
    pub(crate) fn signal_suspend(&self, cpu: usize) -> bool {
        let target = self.cpu(cpu);
        let must_wait = {
            let mut state = target.control.lock();
            if state.stopped {
                return false;
            }
            state.requests.insert(ControlRequests::SUSPEND);
            !state.suspended
        };
        if must_wait {
            self.kick(cpu);
        }
        must_wait
    }

    /// Spin until `cpu` acknowledged its suspend request
    ///
    /// Also returns if the request was revoked in the meantime or the core
    /// stopped.
    pub(crate) fn wait_until_suspended(&self, cpu: usize) {
        let target = self.cpu(cpu);
        let mut backoff = Backoff::new();
        loop {
            {
                let state = target.control.lock();
                if state.suspended || state.stopped || !state.requests.contains(ControlRequests::SUSPEND) {
                    return;
                }
            }
            backoff.snooze();
        }
    }

    /// Stop `cpu` from running guest code
    ///
    /// Blocks until the target acknowledged. It stays suspended until
    /// [`request_resume`](Self::request_resume), a reset or a park.
    pub fn request_suspend(&self, cpu: usize) -> Result<()> {
        self.target_cpu(cpu)?;
        if self.signal_suspend(cpu) {
            self.wait_until_suspended(cpu);
        }
        Ok(())
    }

    /// Revoke a suspend request, the target continues at its own pace
    pub fn request_resume(&self, cpu: usize) -> Result<()> {
        let mut state = self.target_cpu(cpu)?.control.lock();
        if !state.stopped {
            state.requests.remove(ControlRequests::SUSPEND);
        }
        Ok(())
    }

    /// Restart `cpu` at `entry` with `context` in r0/x0
    ///
    /// [`PSCI_INVALID_ADDRESS`] as entry parks the core instead.
    pub fn request_reset(&self, cpu: usize, entry: u64, context: u64) -> Result<()> {
        let mut state = self.target_cpu(cpu)?.control.lock();
        if state.stopped {
            return Ok(());
        }
        state.power_on_entry = entry;
        state.power_on_context = context;
        state.requests.insert(ControlRequests::RESET);
        state.requests.remove(ControlRequests::SUSPEND);
        Ok(())
    }

    /// Make `cpu` drop its guest and wait for a power-on
    pub fn request_park(&self, cpu: usize) -> Result<()> {
        let target = self.target_cpu(cpu)?;
        {
            let mut state = target.control.lock();
            if state.stopped {
                return Ok(());
            }
            state.requests.insert(ControlRequests::PARK);
            state.requests.remove(ControlRequests::SUSPEND);
        }
        self.mark_cell_needs_flush(target.cell());
        Ok(())
    }

    /// Take `cpu` out of the hypervisor for good
    ///
    /// Only cores of the root cell can be shut down.
    pub fn request_shutdown(&self, cpu: usize) -> Result<()> {
        let target = self.target_cpu(cpu)?;
        if target.cell() != ROOT_CELL {
            log::warn!("cpu {}: shutdown refused, not a root cell core", cpu);
            return Err(Error::PermissionDenied);
        }
        {
            let mut state = target.control.lock();
            if state.stopped {
                return Ok(());
            }
            state.requests.insert(ControlRequests::SHUTDOWN);
            state.requests.remove(ControlRequests::SUSPEND);
        }
        self.send_signal(CpuSet::single(cpu), Signal::CoreOff);
        Ok(())
    }

    /// Shut down every core of the root cell
    pub fn shutdown(&self) {
        log::info!("Shutting down hypervisor");
        for cpu in self.cell_cpus(ROOT_CELL).iter() {
            // Root cell membership was just checked through the cell table.
            let _ = self.request_shutdown(cpu);
        }
    }

    /// Apply pending control requests on the calling core
    pub fn checkpoint(&self, local: &mut LocalCpu<'_>) -> Checkpoint {
        let cpu = self.cpu(local.id);
        let mut pending = Pending::None;
        let mut backoff = Backoff::new();

        let mut state = cpu.control.lock();
        loop {
            if state.requests.contains(ControlRequests::SUSPEND) {
                state.suspended = true;
                drop(state);
                while cpu.control.lock().requests.contains(ControlRequests::SUSPEND) {
                    backoff.snooze();
                }
                backoff.reset();
                state = cpu.control.lock();
            }

            if state.requests.contains(ControlRequests::SUSPEND) {
                continue;
            }
            state.suspended = false;

            if state.requests.contains(ControlRequests::PARK) {
                state.enter_cpu_off();
            } else if state.requests.contains(ControlRequests::RESET) {
                state.requests.remove(ControlRequests::RESET);
                if state.power_on_entry != PSCI_INVALID_ADDRESS {
                    state.wait_for_poweron = false;
                    pending = Pending::Reset {
                        entry: state.power_on_entry,
                        context: state.power_on_context,
                    };
                } else {
                    state.enter_cpu_off();
                }
            } else if state.requests.contains(ControlRequests::SHUTDOWN) {
                state.requests.remove(ControlRequests::SHUTDOWN);
                pending = Pending::Shutdown;
            }
            break;
        }

        if cpu.take_cache_flush() {
            self.platform().paging.flush_tlb(local.id);
        }
        let wait_for_poweron = state.wait_for_poweron;
        drop(state);

        match pending {
            Pending::Shutdown => {
                self.shutdown_self(local.id);
                Checkpoint::Shutdown
            }
            _ if wait_for_poweron => {
                self.park_self(local.id, local.regs, local.sysregs);
                Checkpoint::Parked
            }
            Pending::Reset { entry, context } => {
                self.reset_self(local.id, local.regs, local.sysregs, entry, context);
                Checkpoint::Reset { entry, context }
            }
            Pending::None => Checkpoint::Resume,
        }
    }

    /// Drop the guest of the calling core and switch to the parking context
    pub(crate) fn park_self(&self, cpu: usize, regs: &mut GuestRegisters, sysregs: &mut dyn SysRegs) {
        self.cpu(cpu).control.lock().enter_cpu_off();
        self.reset_guest(cpu, regs, sysregs, 0, 0, Stage2Context::Parking);
        log::debug!("cpu {}: parked", cpu);
    }

    /// Park the calling core after a fatal guest error
    pub(crate) fn halt_self(&self, cpu: usize, regs: &mut GuestRegisters, sysregs: &mut dyn SysRegs) -> ExitAction {
        self.park_self(cpu, regs, sysregs);
        self.cpu(cpu).control.lock().halted = true;
        log::error!("cpu {}: guest halted", cpu);
        ExitAction::Halt
    }

    fn reset_self(&self, cpu: usize, regs: &mut GuestRegisters, sysregs: &mut dyn SysRegs, entry: u64, context: u64) {
        let cell = self.cpu(cpu).cell();
        self.reset_guest(cpu, regs, sysregs, entry, context, Stage2Context::Cell(cell));
        log::debug!("cpu {}: reset to {:#x}", cpu, entry);
    }

    fn shutdown_self(&self, cpu: usize) {
        self.platform().irqchip.per_core_reset(cpu, true);
        self.cpu(cpu).control.lock().stopped = true;
        log::info!("cpu {}: leaving hypervisor", cpu);
    }

    fn reset_guest(
        &self,
        cpu: usize,
        regs: &mut GuestRegisters,
        sysregs: &mut dyn SysRegs,
        entry: u64,
        context: u64,
        stage2: Stage2Context,
    ) {
        let percpu = self.cpu(cpu);
        let psr = match self.cell_guest_mode(percpu.cell()) {
            GuestMode::Aarch32 => RESET_PSR_AARCH32,
            GuestMode::Aarch64 => RESET_PSR_AARCH64,
        };
        reset_guest_state(
            regs,
            sysregs,
            ResetTarget {
                psr,
                entry,
                context,
                virtual_id: percpu.virtual_id(),
            },
        );

        let platform = self.platform();
        platform.paging.per_core_init(cpu, stage2);
        platform.irqchip.per_core_reset(cpu, false);
        percpu.pending_irqs.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::arm64::cpu::percpu::LifecycleState;
    use crate::arch::arm64::cpu::sysreg::SysReg;
    use crate::kernel::vmm::{CellConfig, CellId};
    use crate::testing::{mark_suspended, PagingEvent, TestBed, TestCpu};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;

    #[test]
    fn test_checkpoint_without_requests_resumes() {
        let bed = TestBed::new(1);
        let hv = bed.hypervisor();
        let mut cpu = TestCpu::new(0);
        assert_eq!(hv.checkpoint(&mut cpu.local()), Checkpoint::Resume);
        assert_eq!(hv.cpu(0).lifecycle_state(), LifecycleState::Running);
    }

    #[test]
    fn test_reset_with_valid_entry() {
        let bed = TestBed::new(2);
        let hv = bed.hypervisor();
        let mut cpu = TestCpu::new(1);
        cpu.regs.x[7] = 0x77;

        hv.request_reset(1, 0x4000_0000, 0xfeed).expect("core exists");
        assert_eq!(hv.cpu(1).lifecycle_state(), LifecycleState::ResetRequested);

        assert_eq!(
            hv.checkpoint(&mut cpu.local()),
            Checkpoint::Reset {
                entry: 0x4000_0000,
                context: 0xfeed
            }
        );
        assert_eq!(cpu.sysregs.get(SysReg::ElrEl2), 0x4000_0000);
        assert_eq!(cpu.regs.x[0], 0xfeed);
        assert_eq!(cpu.regs.x[7], 0);
        assert_eq!(hv.cpu(1).lifecycle_state(), LifecycleState::Running);
        assert!(bed.paging.events().contains(&PagingEvent::PerCoreInit(1, Stage2Context::Cell(ROOT_CELL))));
    }

    #[test]
    fn test_reset_with_invalid_entry_parks() {
        let bed = TestBed::new(2);
        let hv = bed.hypervisor();
        let mut cpu = TestCpu::new(1);

        hv.request_reset(1, PSCI_INVALID_ADDRESS, 0).expect("core exists");
        assert_eq!(hv.checkpoint(&mut cpu.local()), Checkpoint::Parked);
        assert_eq!(hv.cpu(1).lifecycle_state(), LifecycleState::WaitingForPowerOn);
        assert_eq!(cpu.sysregs.get(SysReg::ElrEl2), 0);
        assert!(bed.paging.events().contains(&PagingEvent::PerCoreInit(1, Stage2Context::Parking)));
    }

    #[test]
    fn test_park_beats_pending_reset() {
        let bed = TestBed::new(2);
        let hv = bed.hypervisor();
        let mut cpu = TestCpu::new(1);

        hv.request_reset(1, 0x8000, 1).expect("core exists");
        hv.request_park(1).expect("core exists");
        assert_eq!(hv.cpu(1).lifecycle_state(), LifecycleState::ParkRequested);

        assert_eq!(hv.checkpoint(&mut cpu.local()), Checkpoint::Parked);
        assert_eq!(hv.cpu(1).lifecycle_state(), LifecycleState::WaitingForPowerOn);
        // the stale reset is gone
        assert_eq!(hv.checkpoint(&mut cpu.local()), Checkpoint::Parked);
        assert_ne!(cpu.sysregs.get(SysReg::ElrEl2), 0x8000);
    }

    #[test]
    fn test_park_clears_injection_state() {
        let bed = TestBed::new(1);
        let hv = bed.hypervisor();
        let mut cpu = TestCpu::new(0);
        hv.inject(0, 40, true);
        hv.cpu(0).pending_irqs.lock().push_back(41).expect("queue has room");

        hv.request_park(0).expect("core exists");
        assert_eq!(hv.checkpoint(&mut cpu.local()), Checkpoint::Parked);
        assert_eq!(bed.chip.occupied_slots(0), 0);
        assert_eq!(hv.cpu(0).pending_irq_count(), 0);
    }

    #[test]
    fn test_cache_flush_drained_at_checkpoint() {
        let bed = TestBed::new(1);
        let hv = bed.hypervisor();
        let mut cpu = TestCpu::new(0);
        hv.cpu(0).request_cache_flush();

        assert_eq!(hv.checkpoint(&mut cpu.local()), Checkpoint::Resume);
        assert!(!hv.cpu(0).cache_flush_pending());
        assert_eq!(bed.paging.events(), vec![PagingEvent::FlushTlb(0)]);
    }

    #[test]
    fn test_suspend_revoked_before_observed() {
        let bed = TestBed::new(2);
        let hv = bed.hypervisor();
        let mut cpu = TestCpu::new(1);

        assert!(hv.signal_suspend(1));
        assert_eq!(hv.cpu(1).lifecycle_state(), LifecycleState::SuspendRequested);
        hv.request_resume(1).expect("core exists");

        // the kick still arrives, but finds nothing to do
        assert_eq!(
            hv.handle_exit(&mut cpu.local(), crate::arch::arm64::cpu::ExitReason::Irq),
            ExitAction::Resume
        );
        assert!(!hv.cpu(1).is_suspended());
        assert_eq!(hv.cpu(1).lifecycle_state(), LifecycleState::Running);
    }

    #[test]
    fn test_suspend_blocks_until_acknowledged() {
        let bed = TestBed::new(2);
        let hv = bed.hypervisor();
        let progress = AtomicU64::new(0);
        let stop = AtomicBool::new(false);

        std::thread::scope(|s| {
            // core 1 runs its guest, counting progress between exits
            s.spawn(|| {
                let mut cpu = TestCpu::new(1);
                while !stop.load(Ordering::Acquire) {
                    if bed.chip.has_pending(1) {
                        hv.handle_exit(&mut cpu.local(), crate::arch::arm64::cpu::ExitReason::Irq);
                    } else {
                        progress.fetch_add(1, Ordering::AcqRel);
                        std::thread::yield_now();
                    }
                }
            });

            hv.request_suspend(1).expect("core exists");
            assert!(hv.cpu(1).is_suspended());
            let before = progress.load(Ordering::Acquire);
            std::thread::sleep(Duration::from_millis(20));
            assert_eq!(progress.load(Ordering::Acquire), before);

            // suspending again does not kick or wait
            let sent = bed.chip.sent_signals().len();
            hv.request_suspend(1).expect("core exists");
            assert_eq!(bed.chip.sent_signals().len(), sent);

            hv.request_resume(1).expect("core exists");
            while progress.load(Ordering::Acquire) == before {
                std::thread::yield_now();
            }
            assert!(!hv.cpu(1).is_suspended());
            stop.store(true, Ordering::Release);
        });
    }

    #[test]
    fn test_shutdown_root_cell_cores() {
        let bed = TestBed::new(2);
        let hv = bed.hypervisor();
        hv.shutdown();
        assert_eq!(
            bed.chip.sent_signals(),
            vec![
                (CpuSet::single(0), Signal::CoreOff as u32),
                (CpuSet::single(1), Signal::CoreOff as u32)
            ]
        );

        let mut cpu = TestCpu::new(1);
        assert_eq!(hv.checkpoint(&mut cpu.local()), Checkpoint::Shutdown);
        assert!(hv.cpu(1).is_stopped());
        assert!(bed.chip.shutdown_resets().contains(&1));

        // stopped cores ignore further requests
        hv.request_suspend(1).expect("core exists");
        hv.request_park(1).expect("core exists");
        assert!(!hv.cpu(1).is_suspended());
    }

    #[test]
    fn test_requests_for_unknown_cores_rejected() {
        let bed = TestBed::new(2);
        let hv = bed.hypervisor();

        assert_eq!(hv.request_suspend(2), Err(Error::InvalidArgument));
        assert_eq!(hv.request_resume(2), Err(Error::InvalidArgument));
        assert_eq!(hv.request_reset(7, 0x1000, 0), Err(Error::InvalidArgument));
        assert_eq!(hv.request_park(usize::MAX), Err(Error::InvalidArgument));
        assert_eq!(hv.request_shutdown(2), Err(Error::InvalidArgument));
        assert!(bed.chip.sent_signals().is_empty());
    }

    #[test]
    fn test_shutdown_refused_outside_root_cell() {
        let bed = TestBed::new(4);
        let hv = bed.hypervisor();
        mark_suspended(&hv, CpuSet::from_bits(0b1100));
        hv.create_cell(CellId(1), &CellConfig::new(CpuSet::from_bits(0b1100), GuestMode::Aarch64))
            .expect("cell created");
        assert_eq!(hv.request_shutdown(2), Err(Error::PermissionDenied));
    }
}
