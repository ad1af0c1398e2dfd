//! Per-core control block
//!
//! One [`PerCpu`] exists for every physical core, allocated when the
//! hypervisor is created and never moved or freed. Other cores reach it by
//! physical id. Lifecycle state and pending requests sit behind the
//! block's spin lock; the cache-flush flag, the statistics and the cell
//! assignment are atomics.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use bitflags::bitflags;
use heapless::Deque;

use crate::arch::arm64::psci::PSCI_INVALID_ADDRESS;
use crate::config::MAX_PENDING_IRQS;
use crate::kernel::sync::SpinLock;
use crate::kernel::vmm::{CellId, ROOT_CELL};

/// Exit statistics kept per core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum CpuStat {
    /// Every exit
    VmExitsTotal,
    /// Synchronous traps
    VmExitsTrap,
    /// Physical interrupt exits
    VmExitsIrq,
    /// Management signals received
    VmExitsManagement,
    /// PSCI calls handled
    VmExitsPsci,
    /// Maintenance interrupts
    VmExitsMaintenance,
    /// Physical interrupts forwarded to the guest
    VmExitsVirq,
    /// Virtual SGIs delivered
    VmExitsVsgi,
    /// Data aborts handed to MMIO emulation
    VmExitsMmio,
}

impl CpuStat {
    pub const COUNT: usize = CpuStat::VmExitsMmio as usize + 1;

    pub const ALL: [CpuStat; CpuStat::COUNT] = [
        CpuStat::VmExitsTotal,
        CpuStat::VmExitsTrap,
        CpuStat::VmExitsIrq,
        CpuStat::VmExitsManagement,
        CpuStat::VmExitsPsci,
        CpuStat::VmExitsMaintenance,
        CpuStat::VmExitsVirq,
        CpuStat::VmExitsVsgi,
        CpuStat::VmExitsMmio,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            CpuStat::VmExitsTotal => "vmexits_total",
            CpuStat::VmExitsTrap => "vmexits_trap",
            CpuStat::VmExitsIrq => "vmexits_irq",
            CpuStat::VmExitsManagement => "vmexits_management",
            CpuStat::VmExitsPsci => "vmexits_psci",
            CpuStat::VmExitsMaintenance => "vmexits_maintenance",
            CpuStat::VmExitsVirq => "vmexits_virq",
            CpuStat::VmExitsVsgi => "vmexits_vsgi",
            CpuStat::VmExitsMmio => "vmexits_mmio",
        }
    }
}

bitflags! {
    /// Requests posted to a core, applied at its next checkpoint
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlRequests: u32 {
        const SUSPEND = 1 << 0;
        const PARK = 1 << 1;
        const RESET = 1 << 2;
        const SHUTDOWN = 1 << 3;
    }
}

/// Observable lifecycle of a core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    SuspendRequested,
    Suspended,
    ParkRequested,
    WaitingForPowerOn,
    ResetRequested,
    ShutdownRequested,
}

/// Guarded part of the control block
#[derive(Debug, Clone)]
pub struct ControlState {
    pub requests: ControlRequests,
    /// The core acknowledged a suspend request and is spinning
    pub suspended: bool,
    /// Parked; only a reset with a valid entry brings the guest back
    pub wait_for_poweron: bool,
    /// Left the hypervisor for good
    pub stopped: bool,
    /// Parked after a fatal trap, refuses power-on until its cell is destroyed
    pub halted: bool,
    pub power_on_entry: u64,
    pub power_on_context: u64,
}

impl ControlState {
    pub const fn new() -> Self {
        Self {
            requests: ControlRequests::empty(),
            suspended: false,
            wait_for_poweron: false,
            stopped: false,
            halted: false,
            power_on_entry: PSCI_INVALID_ADDRESS,
            power_on_context: 0,
        }
    }

    /// Collapse flags into the single state other cores observe
    ///
    /// Acknowledged suspension dominates, then pending requests in the order
    /// the checkpoint applies them. A core still spinning after its suspend
    /// request was revoked already counts as released.
    pub fn lifecycle(&self) -> LifecycleState {
        if self.suspended && self.requests.contains(ControlRequests::SUSPEND) {
            LifecycleState::Suspended
        } else if self.requests.contains(ControlRequests::SUSPEND) {
            LifecycleState::SuspendRequested
        } else if self.requests.contains(ControlRequests::PARK) {
            LifecycleState::ParkRequested
        } else if self.requests.contains(ControlRequests::RESET) {
            LifecycleState::ResetRequested
        } else if self.requests.contains(ControlRequests::SHUTDOWN) || self.stopped {
            LifecycleState::ShutdownRequested
        } else if self.wait_for_poweron {
            LifecycleState::WaitingForPowerOn
        } else {
            LifecycleState::Running
        }
    }

    /// Drop guest context and wait for a power-on
    ///
    /// A reset posted together with the park is discarded.
    pub fn enter_cpu_off(&mut self) {
        self.requests.remove(ControlRequests::PARK | ControlRequests::RESET);
        self.wait_for_poweron = true;
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-core control block
pub struct PerCpu {
    id: usize,
    cell: AtomicUsize,
    virtual_id: AtomicU32,
    pub(crate) control: SpinLock<ControlState>,
    cache_flush_pending: AtomicBool,
    pub(crate) pending_irqs: SpinLock<Deque<u32, MAX_PENDING_IRQS>>,
    stats: [AtomicU64; CpuStat::COUNT],
}

impl PerCpu {
    /// Control block of a core starting out in the root cell
    pub fn new(id: usize) -> Self {
        Self {
            id,
            cell: AtomicUsize::new(ROOT_CELL.0),
            virtual_id: AtomicU32::new(id as u32),
            control: SpinLock::new(ControlState::new()),
            cache_flush_pending: AtomicBool::new(false),
            pending_irqs: SpinLock::new(Deque::new()),
            stats: core::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Physical core id
    pub fn id(&self) -> usize {
        self.id
    }

    /// Cell this core is assigned to
    pub fn cell(&self) -> CellId {
        CellId(self.cell.load(Ordering::Acquire))
    }

    pub(crate) fn set_cell(&self, cell: CellId) {
        self.cell.store(cell.0, Ordering::Release);
    }

    /// Id of this core as seen by the guests of its cell
    pub fn virtual_id(&self) -> u32 {
        self.virtual_id.load(Ordering::Acquire)
    }

    pub(crate) fn set_virtual_id(&self, virtual_id: u32) {
        self.virtual_id.store(virtual_id, Ordering::Release);
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.control.lock().lifecycle()
    }

    pub fn is_waiting_for_poweron(&self) -> bool {
        self.control.lock().wait_for_poweron
    }

    pub fn is_suspended(&self) -> bool {
        self.control.lock().suspended
    }

    pub fn is_stopped(&self) -> bool {
        self.control.lock().stopped
    }

    /// Entry and context recorded for the next reset
    pub fn power_on_entry(&self) -> (u64, u64) {
        let state = self.control.lock();
        (state.power_on_entry, state.power_on_context)
    }

    /// Ask the core to flush its TLB before it next returns to the guest
    pub fn request_cache_flush(&self) {
        self.cache_flush_pending.store(true, Ordering::Release);
    }

    pub(crate) fn take_cache_flush(&self) -> bool {
        self.cache_flush_pending.swap(false, Ordering::AcqRel)
    }

    pub fn cache_flush_pending(&self) -> bool {
        self.cache_flush_pending.load(Ordering::Acquire)
    }

    /// Number of interrupts waiting for a free injection slot
    pub fn pending_irq_count(&self) -> usize {
        self.pending_irqs.lock().len()
    }

    /// Bump a counter, only called by the owning core
    pub(crate) fn count(&self, stat: CpuStat) {
        self.stats[stat as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn stat(&self, stat: CpuStat) -> u64 {
        self.stats[stat as usize].load(Ordering::Relaxed)
    }

    /// Snapshot of all counters, indexed by `CpuStat as usize`
    pub fn stats(&self) -> [u64; CpuStat::COUNT] {
        core::array::from_fn(|i| self.stats[i].load(Ordering::Relaxed))
    }
}

impl core::fmt::Debug for PerCpu {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PerCpu")
            .field("id", &self.id)
            .field("cell", &self.cell())
            .field("virtual_id", &self.virtual_id())
            .field("control", &self.control)
            .finish()
    }
}
