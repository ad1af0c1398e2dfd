//! Synchronous trap dispatch
//!
//! A guest trap is classified by the exception class of its syndrome and
//! handed to the matching emulation routine through a fixed table. Every
//! routine reports one of three outcomes; anything but
//! [`TrapReturn::Handled`] takes the fatal path, which dumps the trapped
//! state and halts the guest of that core only.
//!
//! | EC | Trap | Handler |
//! |----|------|---------|
//! | 0x03 | MCR/MRC p15 | CP15 32-bit emulation |
//! | 0x04 | MCRR/MRRC p15 | CP15 64-bit emulation |
//! | 0x12, 0x16 | HVC | PSCI or hypercall passthrough |
//! | 0x13, 0x17 | SMC | PSCI or firmware passthrough |
//! | 0x24 | Data abort from EL1/EL0 | stage-2 / MMIO collaborator |
//!
//! ## References
//! - [ARM DDI 0487] ARMv8-A Architecture Reference Manual, D17.2.37 ESR_EL2

use super::cond::failed_condition;
use super::context::TrapContext;
use super::exit::ExitAction;
use crate::arch::arm32::cpu::coproc::cp15;
use crate::arch::arm64::cpu::percpu::CpuStat;
use crate::arch::arm64::psci::smccc::is_psci_call;
use crate::kernel::vmm::Hypervisor;

/// Exception classes
pub mod ec {
    pub const UNKNOWN: u32 = 0x00;
    pub const CP15_32: u32 = 0x03;
    pub const CP15_64: u32 = 0x04;
    pub const HVC32: u32 = 0x12;
    pub const SMC32: u32 = 0x13;
    pub const HVC64: u32 = 0x16;
    pub const SMC64: u32 = 0x17;
    pub const DABT_LOW: u32 = 0x24;
}

/// Outcome of emulating a trapped operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapReturn {
    /// Emulated, the guest may continue
    Handled,
    /// No emulation exists for the operation
    Unhandled,
    /// The operation is recognized but not permitted
    Forbidden,
}

type TrapHandler = fn(&Hypervisor<'_>, &mut TrapContext<'_>) -> TrapReturn;

const NUM_EXCEPTION_CLASSES: usize = 64;

const fn build_trap_handlers() -> [Option<TrapHandler>; NUM_EXCEPTION_CLASSES] {
    let mut table: [Option<TrapHandler>; NUM_EXCEPTION_CLASSES] = [None; NUM_EXCEPTION_CLASSES];
    table[ec::CP15_32 as usize] = Some(cp15::handle_cp15_32);
    table[ec::CP15_64 as usize] = Some(cp15::handle_cp15_64);
    table[ec::HVC32 as usize] = Some(handle_hvc);
    table[ec::HVC64 as usize] = Some(handle_hvc);
    table[ec::SMC32 as usize] = Some(handle_smc);
    table[ec::SMC64 as usize] = Some(handle_smc);
    table[ec::DABT_LOW as usize] = Some(handle_dabt);
    table
}

static TRAP_HANDLERS: [Option<TrapHandler>; NUM_EXCEPTION_CLASSES] = build_trap_handlers();

/// Route a power-management id to PSCI, anything else to `passthrough`
fn route_call(
    hv: &Hypervisor<'_>,
    ctx: &mut TrapContext<'_>,
    passthrough: fn(&Hypervisor<'_>, &TrapContext<'_>) -> u64,
) {
    let function_id = ctx.arg(0) as u32;
    let result = if is_psci_call(function_id) {
        hv.psci_dispatch(ctx) as u64
    } else {
        passthrough(hv, ctx)
    };
    // CPU_OFF does not return to the caller.
    if !hv.cpu(ctx.cpu).is_waiting_for_poweron() {
        ctx.set_return(result);
    }
}

fn handle_hvc(hv: &Hypervisor<'_>, ctx: &mut TrapContext<'_>) -> TrapReturn {
    route_call(hv, ctx, |hv, ctx| {
        hv.platform()
            .firmware
            .hypercall(ctx.cpu, ctx.arg(0), [ctx.arg(1), ctx.arg(2)])
    });
    // ELR already points past the HVC.
    TrapReturn::Handled
}

fn handle_smc(hv: &Hypervisor<'_>, ctx: &mut TrapContext<'_>) -> TrapReturn {
    route_call(hv, ctx, |hv, ctx| {
        hv.platform()
            .firmware
            .smc(ctx.arg(0), [ctx.arg(1), ctx.arg(2), ctx.arg(3)])
    });
    ctx.skip_instruction();
    TrapReturn::Handled
}

fn handle_dabt(hv: &Hypervisor<'_>, ctx: &mut TrapContext<'_>) -> TrapReturn {
    hv.cpu(ctx.cpu).count(CpuStat::VmExitsMmio);
    hv.platform().paging.handle_data_abort(ctx)
}

impl Hypervisor<'_> {
    /// Emulate the trapped instruction and decide how the core continues
    pub(crate) fn handle_trap(&self, mut ctx: TrapContext<'_>) -> ExitAction {
        let cpu = self.cpu(ctx.cpu);
        cpu.count(CpuStat::VmExitsTrap);

        if failed_condition(ctx.esr, ctx.psr) {
            ctx.skip_instruction();
            ctx.restore();
            return ExitAction::Resume;
        }

        let class = ctx.exception_class();
        let ret = match TRAP_HANDLERS.get(class as usize).copied().flatten() {
            Some(handler) => handler(self, &mut ctx),
            None => TrapReturn::Unhandled,
        };

        match ret {
            TrapReturn::Handled => {}
            TrapReturn::Unhandled | TrapReturn::Forbidden => {
                log::error!(
                    "FATAL: {} trap on cpu {} (exception class {:#04x})",
                    if ret == TrapReturn::Forbidden { "forbidden" } else { "unhandled" },
                    ctx.cpu,
                    class
                );
                ctx.dump();
                return self.halt_self(ctx.cpu, ctx.regs, ctx.sysregs);
            }
        }

        // CPU_OFF parked the core, its exception state was already reset.
        if cpu.is_waiting_for_poweron() {
            return ExitAction::Park;
        }
        ctx.restore();
        ExitAction::Resume
    }
}
