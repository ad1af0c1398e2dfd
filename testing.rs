//! Test doubles for the platform collaborators
//!
//! The mocks record every call so tests can assert on what the control
//! plane asked of the hardware. Interrupt delivery is modelled with a
//! per-core queue: `raise` and `send_sgi` push to it, `read_iar` pops.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::arch::arm64::cpu::control::Checkpoint;
use crate::arch::arm64::cpu::percpu::ControlRequests;
use crate::arch::arm64::cpu::sysreg::{SysReg, SysRegs};
use crate::arch::arm64::cpu::vcpu::{TrapContext, TrapReturn};
use crate::arch::arm64::cpu::{GuestRegisters, LocalCpu};
use crate::arch::arm64::interrupt::gic::{InjectionSlot, IrqChip, SPURIOUS_IRQ};
use crate::arch::arm64::mmu::{Stage2Context, Stage2Paging};
use crate::arch::arm64::psci::Firmware;
use crate::config::{GicConfig, GicVersion, SystemConfig, MAX_CPUS};
use crate::kernel::vmm::{CellConfig, CellId, GuestMode, Hypervisor, Platform};
use crate::utils::CpuSet;
use crate::{Error, Result};

/// List registers per core on the mock chip
pub const MOCK_SLOTS: usize = 4;

/// System registers backed by plain memory
#[derive(Debug, Clone)]
pub struct MockSysRegs {
    regs: [u64; SysReg::COUNT],
}

impl MockSysRegs {
    pub fn new() -> Self {
        Self {
            regs: [0; SysReg::COUNT],
        }
    }

    pub fn set(&mut self, reg: SysReg, value: u64) {
        self.regs[reg as usize] = value;
    }

    pub fn get(&self, reg: SysReg) -> u64 {
        self.regs[reg as usize]
    }
}

impl SysRegs for MockSysRegs {
    fn read(&self, reg: SysReg) -> u64 {
        self.get(reg)
    }

    fn write(&mut self, reg: SysReg, value: u64) {
        self.set(reg, value);
    }
}

#[derive(Default)]
struct ChipState {
    version: Option<GicVersion>,
    init_calls: usize,
    per_core_inits: Vec<usize>,
    incoming: [VecDeque<u32>; MAX_CPUS],
    eois: [Vec<(u32, bool)>; MAX_CPUS],
    slots: [[Option<InjectionSlot>; MOCK_SLOTS]; MAX_CPUS],
    maint: [bool; MAX_CPUS],
    sent: Vec<(CpuSet, u32)>,
    shutdowns: Vec<usize>,
    targets: Vec<(u32, CpuSet)>,
}

/// Interrupt controller recording every access
#[derive(Default)]
pub struct MockIrqChip {
    state: Mutex<ChipState>,
}

impl MockIrqChip {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut ChipState) -> R) -> R {
        f(&mut self.state.lock().expect("mock chip poisoned"))
    }

    pub fn set_version(&self, version: GicVersion) {
        self.with(|s| s.version = Some(version));
    }

    /// Make `irq` pending at the CPU interface of `cpu`
    pub fn raise(&self, cpu: usize, irq: u32) {
        self.with(|s| s.incoming[cpu].push_back(irq));
    }

    pub fn has_pending(&self, cpu: usize) -> bool {
        self.with(|s| !s.incoming[cpu].is_empty())
    }

    pub fn eois(&self, cpu: usize) -> Vec<(u32, bool)> {
        self.with(|s| s.eois[cpu].clone())
    }

    pub fn sent_signals(&self) -> Vec<(CpuSet, u32)> {
        self.with(|s| s.sent.clone())
    }

    pub fn slot(&self, cpu: usize, slot: usize) -> Option<InjectionSlot> {
        self.with(|s| s.slots[cpu][slot])
    }

    /// The guest consumed the interrupt in `slot`
    pub fn clear_slot(&self, cpu: usize, slot: usize) {
        self.with(|s| s.slots[cpu][slot] = None);
    }

    pub fn occupied_slots(&self, cpu: usize) -> usize {
        self.with(|s| s.slots[cpu].iter().filter(|slot| slot.is_some()).count())
    }

    pub fn maint_enabled(&self, cpu: usize) -> bool {
        self.with(|s| s.maint[cpu])
    }

    pub fn init_calls(&self) -> usize {
        self.with(|s| s.init_calls)
    }

    pub fn per_core_inits(&self) -> Vec<usize> {
        self.with(|s| s.per_core_inits.clone())
    }

    /// Cores reset with `is_shutdown` set
    pub fn shutdown_resets(&self) -> Vec<usize> {
        self.with(|s| s.shutdowns.clone())
    }

    pub fn set_irq_target(&self, irq: u32, cpu: usize) {
        self.with(|s| {
            s.targets.retain(|(i, _)| *i != irq);
            s.targets.push((irq, CpuSet::single(cpu)));
        });
    }

    pub fn irq_targets(&self, irq: u32) -> CpuSet {
        self.with(|s| {
            s.targets
                .iter()
                .find(|(i, _)| *i == irq)
                .map(|(_, targets)| *targets)
                .unwrap_or_default()
        })
    }
}

impl IrqChip for MockIrqChip {
    fn version(&self) -> GicVersion {
        self.with(|s| s.version.unwrap_or(GicVersion::V3))
    }

    fn init(&self) -> Result<()> {
        self.with(|s| s.init_calls += 1);
        Ok(())
    }

    fn per_core_init(&self, cpu: usize) -> Result<()> {
        self.with(|s| s.per_core_inits.push(cpu));
        Ok(())
    }

    fn per_core_reset(&self, cpu: usize, is_shutdown: bool) {
        self.with(|s| {
            s.slots[cpu] = [None; MOCK_SLOTS];
            s.maint[cpu] = false;
            if is_shutdown {
                s.shutdowns.push(cpu);
            }
        });
    }

    fn send_sgi(&self, targets: CpuSet, sgi: u32) -> Result<()> {
        self.with(|s| {
            s.sent.push((targets, sgi));
            for cpu in targets.iter() {
                s.incoming[cpu].push_back(sgi);
            }
        });
        Ok(())
    }

    fn read_iar(&self, cpu: usize) -> u32 {
        self.with(|s| s.incoming[cpu].pop_front().unwrap_or(SPURIOUS_IRQ))
    }

    fn eoi_irq(&self, cpu: usize, irq: u32, deactivate: bool) {
        self.with(|s| s.eois[cpu].push((irq, deactivate)));
    }

    fn num_slots(&self, _cpu: usize) -> usize {
        MOCK_SLOTS
    }

    fn read_slot(&self, cpu: usize, slot: usize) -> Option<InjectionSlot> {
        self.slot(cpu, slot)
    }

    fn write_slot(&self, cpu: usize, slot: usize, entry: Option<InjectionSlot>) {
        self.with(|s| s.slots[cpu][slot] = entry);
    }

    fn enable_maint_irq(&self, cpu: usize, enable: bool) {
        self.with(|s| s.maint[cpu] = enable);
    }

    fn irq_targets(&self, irq: u32) -> CpuSet {
        MockIrqChip::irq_targets(self, irq)
    }

    fn set_irq_target(&self, irq: u32, cpu: usize) {
        MockIrqChip::set_irq_target(self, irq, cpu);
    }
}

/// Stage-2 operations as seen by the paging layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingEvent {
    CellInit(CellId),
    CellDestroy(CellId),
    PerCoreInit(usize, Stage2Context),
    FlushTlb(usize),
    FlushDcaches(CellId),
}

struct PagingState {
    events: Vec<PagingEvent>,
    data_aborts: usize,
    abort_result: TrapReturn,
    cell_init_fails: bool,
}

pub struct MockPaging {
    state: Mutex<PagingState>,
}

impl MockPaging {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PagingState {
                events: Vec::new(),
                data_aborts: 0,
                abort_result: TrapReturn::Handled,
                cell_init_fails: false,
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut PagingState) -> R) -> R {
        f(&mut self.state.lock().expect("mock paging poisoned"))
    }

    fn record(&self, event: PagingEvent) {
        self.with(|s| s.events.push(event));
    }

    pub fn events(&self) -> Vec<PagingEvent> {
        self.with(|s| s.events.clone())
    }

    pub fn data_aborts(&self) -> usize {
        self.with(|s| s.data_aborts)
    }

    pub fn set_abort_result(&self, result: TrapReturn) {
        self.with(|s| s.abort_result = result);
    }

    pub fn set_cell_init_fails(&self, fails: bool) {
        self.with(|s| s.cell_init_fails = fails);
    }
}

impl Stage2Paging for MockPaging {
    fn cell_init(&self, cell: CellId) -> Result<()> {
        if self.with(|s| s.cell_init_fails) {
            return Err(Error::ResourceUnavailable);
        }
        self.record(PagingEvent::CellInit(cell));
        Ok(())
    }

    fn cell_destroy(&self, cell: CellId) {
        self.record(PagingEvent::CellDestroy(cell));
    }

    fn per_core_init(&self, cpu: usize, context: Stage2Context) {
        self.record(PagingEvent::PerCoreInit(cpu, context));
    }

    fn flush_tlb(&self, cpu: usize) {
        self.record(PagingEvent::FlushTlb(cpu));
    }

    fn flush_cell_dcaches(&self, cell: CellId) {
        self.record(PagingEvent::FlushDcaches(cell));
    }

    fn handle_data_abort(&self, _ctx: &mut TrapContext<'_>) -> TrapReturn {
        self.with(|s| {
            s.data_aborts += 1;
            s.abort_result
        })
    }
}

/// Secure monitor and hypercall sink with canned results
pub struct MockFirmware {
    pub smc_result: u64,
    pub hypercall_result: u64,
    smc_calls: Mutex<Vec<(u64, [u64; 3])>>,
    hypercalls: Mutex<Vec<(usize, u64, [u64; 2])>>,
}

impl MockFirmware {
    pub fn new() -> Self {
        Self {
            smc_result: 0x5a5a,
            hypercall_result: 0x1234,
            smc_calls: Mutex::new(Vec::new()),
            hypercalls: Mutex::new(Vec::new()),
        }
    }

    pub fn smc_calls(&self) -> Vec<(u64, [u64; 3])> {
        self.smc_calls.lock().expect("mock firmware poisoned").clone()
    }

    pub fn hypercalls(&self) -> Vec<(usize, u64, [u64; 2])> {
        self.hypercalls.lock().expect("mock firmware poisoned").clone()
    }
}

impl Firmware for MockFirmware {
    fn smc(&self, function_id: u64, args: [u64; 3]) -> u64 {
        self.smc_calls
            .lock()
            .expect("mock firmware poisoned")
            .push((function_id, args));
        self.smc_result
    }

    fn hypercall(&self, cpu: usize, code: u64, args: [u64; 2]) -> u64 {
        self.hypercalls
            .lock()
            .expect("mock firmware poisoned")
            .push((cpu, code, args));
        self.hypercall_result
    }
}

/// A hypervisor wired to fresh mocks
pub struct TestBed {
    pub chip: &'static MockIrqChip,
    pub paging: &'static MockPaging,
    pub firmware: &'static MockFirmware,
    hv: Hypervisor<'static>,
}

impl TestBed {
    /// `num_cpus` cores, all in the root cell, on a GICv3
    pub fn new(num_cpus: usize) -> Self {
        let chip: &'static MockIrqChip = Box::leak(Box::new(MockIrqChip::new()));
        let paging: &'static MockPaging = Box::leak(Box::new(MockPaging::new()));
        let firmware: &'static MockFirmware = Box::leak(Box::new(MockFirmware::new()));
        let config = SystemConfig::new(num_cpus, GicConfig::v3(0x0800_0000, 0x080a_0000));
        let platform = Platform {
            irqchip: chip,
            paging,
            firmware,
        };
        let hv = Hypervisor::new(config, platform).expect("valid test config");
        Self {
            chip,
            paging,
            firmware,
            hv,
        }
    }

    /// Cell `id` created on `cpus` and started
    ///
    /// The first core of the cell has a reset to entry 0 pending, the
    /// others wait for a power-on call.
    pub fn with_cell(num_cpus: usize, id: CellId, cpus: CpuSet, mode: GuestMode) -> Self {
        let bed = Self::new(num_cpus);
        let hv = &bed.hv;

        mark_suspended(hv, cpus);
        hv.create_cell(id, &CellConfig::new(cpus, mode))
            .expect("cell created");
        for cpu in cpus.iter() {
            assert_eq!(hv.checkpoint(&mut TestCpu::new(cpu).local()), Checkpoint::Parked);
        }
        hv.start_cell(id).expect("cell started");
        bed
    }

    pub fn hypervisor(&self) -> &Hypervisor<'static> {
        &self.hv
    }
}

/// Register state of one simulated core
pub struct TestCpu {
    pub id: usize,
    pub regs: GuestRegisters,
    pub sysregs: MockSysRegs,
}

impl TestCpu {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            regs: GuestRegisters::default(),
            sysregs: MockSysRegs::new(),
        }
    }

    pub fn local(&mut self) -> LocalCpu<'_> {
        LocalCpu::new(self.id, &mut self.regs, &mut self.sysregs)
    }

    /// Trap state as captured from the current sysregs
    pub fn trap_context(&mut self) -> TrapContext<'_> {
        TrapContext::new(self.id, &mut self.regs, &mut self.sysregs)
    }
}

/// Put `cpus` in the state `request_suspend` leaves them in, without a
/// core thread to acknowledge it
pub fn mark_suspended(hv: &Hypervisor<'_>, cpus: CpuSet) {
    for cpu in cpus.iter() {
        let mut control = hv.cpu(cpu).control.lock();
        control.requests.insert(ControlRequests::SUSPEND);
        control.suspended = true;
    }
}
