//! Cell management
//!
//! A cell owns a fixed set of physical cores. Cores start out in the root
//! cell; creating a cell carves cores out of it and destroying a cell
//! hands them back. Cores are only reassigned while they are not running
//! guest code, so a core's cell never changes under its own feet.
//!
//! Virtual core ids are dense per cell, in ascending physical order. Root
//! cell cores keep virtual id == physical id.

use core::mem;

use heapless::Vec;

use super::Hypervisor;
use crate::arch::arm64::cpu::percpu::{ControlRequests, LifecycleState};
use crate::arch::arm64::interrupt::gic::is_spi;
use crate::arch::arm64::psci::PSCI_INVALID_ADDRESS;
use crate::config::{MAX_CELLS, MAX_CELL_IRQS};
use crate::utils::CpuSet;
use crate::{Error, Result};

/// Cell identifier, also the index into the cell table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(pub usize);

/// The cell owning every core at start-up
pub const ROOT_CELL: CellId = CellId(0);

/// Execution state guests of a cell are reset into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestMode {
    /// AArch32, SVC mode
    Aarch32,
    /// AArch64, EL1h
    Aarch64,
}

/// Static description of a cell
#[derive(Debug, Clone)]
pub struct CellConfig {
    pub cpus: CpuSet,
    pub mode: GuestMode,
    /// Shared interrupts routed into the cell
    pub irqs: Vec<u32, MAX_CELL_IRQS>,
}

impl CellConfig {
    pub fn new(cpus: CpuSet, mode: GuestMode) -> Self {
        Self {
            cpus,
            mode,
            irqs: Vec::new(),
        }
    }

    /// Add shared interrupts owned by the cell
    pub fn with_irqs(mut self, irqs: &[u32]) -> Result<Self> {
        self.irqs
            .extend_from_slice(irqs)
            .map_err(|_| Error::ResourceUnavailable)?;
        Ok(self)
    }
}

/// A live cell
#[derive(Debug)]
pub struct Cell {
    id: CellId,
    config: CellConfig,
    last_virtual_id: u32,
    /// Cores left the cell's memory without cleaning their caches
    needs_cache_flush: bool,
}

impl Cell {
    fn new(id: CellId, config: CellConfig) -> Self {
        let mut cell = Self {
            id,
            config,
            last_virtual_id: 0,
            needs_cache_flush: false,
        };
        cell.update_last_virtual_id();
        cell
    }

    fn update_last_virtual_id(&mut self) {
        let cpus = self.config.cpus;
        self.last_virtual_id = if self.id == ROOT_CELL {
            cpus.iter().last().unwrap_or(0) as u32
        } else {
            cpus.len().saturating_sub(1) as u32
        };
    }

    fn set_cpus(&mut self, cpus: CpuSet) {
        self.config.cpus = cpus;
        self.update_last_virtual_id();
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn cpus(&self) -> CpuSet {
        self.config.cpus
    }

    pub fn guest_mode(&self) -> GuestMode {
        self.config.mode
    }

    pub fn irqs(&self) -> &[u32] {
        &self.config.irqs
    }

    /// Highest virtual core id in use
    pub fn last_virtual_id(&self) -> u32 {
        self.last_virtual_id
    }

    pub fn needs_cache_flush(&self) -> bool {
        self.needs_cache_flush
    }
}

/// All live cells, indexed by [`CellId`]
pub(crate) struct CellTable {
    cells: [Option<Cell>; MAX_CELLS],
}

impl CellTable {
    /// Table holding only the root cell
    pub(crate) fn new(root: CellConfig) -> Self {
        let mut cells: [Option<Cell>; MAX_CELLS] = core::array::from_fn(|_| None);
        cells[ROOT_CELL.0] = Some(Cell::new(ROOT_CELL, root));
        Self { cells }
    }

    fn get(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(id.0)?.as_ref()
    }

    fn get_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.get_mut(id.0)?.as_mut()
    }
}

impl Hypervisor<'_> {
    /// Run `f` on cell `id` under the table lock
    fn with_cell<R>(&self, id: CellId, f: impl FnOnce(&mut Cell) -> R) -> Option<R> {
        self.cells.lock().get_mut(id).map(f)
    }

    pub fn cell_exists(&self, cell: CellId) -> bool {
        self.cells.lock().get(cell).is_some()
    }

    /// Cores of `cell`, empty if it does not exist
    pub fn cell_cpus(&self, cell: CellId) -> CpuSet {
        self.with_cell(cell, |c| c.cpus()).unwrap_or_default()
    }

    pub fn cell_guest_mode(&self, cell: CellId) -> GuestMode {
        self.with_cell(cell, |c| c.guest_mode()).unwrap_or(GuestMode::Aarch64)
    }

    /// Physical core with virtual id `virt` in `cell`
    pub fn virt2phys(&self, cell: CellId, virt: u32) -> Option<usize> {
        let cpus = self
            .with_cell(cell, |c| (virt <= c.last_virtual_id()).then(|| c.cpus()))
            .flatten()?;
        cpus.iter().find(|&cpu| self.cpu(cpu).virtual_id() == virt)
    }

    pub(crate) fn mark_cell_needs_flush(&self, cell: CellId) {
        self.with_cell(cell, |c| c.needs_cache_flush = true);
    }

    /// Fail unless every core in `cpus` is out of guest execution
    ///
    /// A core qualifies once it acknowledged a suspend request or sits in
    /// the parking loop. Requests the core has not reached a checkpoint for
    /// do not count.
    fn check_reassignable(&self, cpus: CpuSet) -> Result<()> {
        for cpu in cpus.iter() {
            let state = self.cpu(cpu).control.lock();
            if state.stopped || state.requests.contains(ControlRequests::SHUTDOWN) {
                return Err(Error::InvalidState);
            }
            let suspended = state.suspended && state.requests.contains(ControlRequests::SUSPEND);
            if !suspended && !state.wait_for_poweron {
                log::warn!("cpu {}: {:?}, still in guest execution", cpu, state.lifecycle());
                return Err(Error::ResourceBusy);
            }
        }
        Ok(())
    }

    /// Release a suspended core leaving cell `from` into the parking loop
    ///
    /// A core parked straight out of guest execution may leave dirty lines
    /// of `from` behind, so `from` is marked for a cache flush.
    fn park_for_reassignment(&self, cpu: usize, from: CellId) {
        let percpu = self.cpu(cpu);
        let park = {
            let mut state = percpu.control.lock();
            state.requests.remove(ControlRequests::SUSPEND);
            if !state.wait_for_poweron {
                state.requests.insert(ControlRequests::PARK);
            }
            !state.wait_for_poweron
        };
        if park {
            self.mark_cell_needs_flush(from);
        }
    }

    /// Move the cores of `config` out of the root cell into a new cell `id`
    ///
    /// The cores must have been suspended or parked by the caller. They are
    /// parked and stay so until [`start_cell`](Self::start_cell).
    pub fn create_cell(&self, id: CellId, config: &CellConfig) -> Result<()> {
        if id == ROOT_CELL || id.0 >= MAX_CELLS || config.cpus.is_empty() {
            return Err(Error::InvalidArgument);
        }
        if let Some(irq) = config.irqs.iter().find(|&&irq| !is_spi(irq)) {
            log::warn!("Cell {}: irq {} is not a shared interrupt", id.0, irq);
            return Err(Error::InvalidArgument);
        }

        {
            let mut cells = self.cells.lock();
            if cells.get(id).is_some() {
                return Err(Error::ResourceBusy);
            }
            let root_cpus = cells.get(ROOT_CELL).map(Cell::cpus).unwrap_or_default();
            let remaining = root_cpus.difference(config.cpus);
            if !config.cpus.is_subset(root_cpus) || remaining.is_empty() {
                log::warn!("Cell {}: cpus {:?} not available in root cell", id.0, config.cpus);
                return Err(Error::InvalidArgument);
            }
            self.check_reassignable(config.cpus)?;
            self.platform.paging.cell_init(id)?;

            if let Some(root) = cells.get_mut(ROOT_CELL) {
                root.set_cpus(remaining);
            }
            cells.cells[id.0] = Some(Cell::new(id, config.clone()));
        }

        for (virtual_id, cpu) in config.cpus.iter().enumerate() {
            let percpu = self.cpu(cpu);
            self.park_for_reassignment(cpu, percpu.cell());
            percpu.set_cell(id);
            percpu.set_virtual_id(virtual_id as u32);
        }

        log::info!("Created cell {} on cpus {:?}", id.0, config.cpus);
        Ok(())
    }

    /// Boot the cores of cell `id`
    ///
    /// The first core starts at address 0, the others wait for CPU_ON.
    pub fn start_cell(&self, id: CellId) -> Result<()> {
        if id == ROOT_CELL {
            return Err(Error::InvalidArgument);
        }
        let (cpus, flush) = {
            let mut cells = self.cells.lock();
            let cell = cells.get_mut(id).ok_or(Error::NotFound)?;
            let cpus = cell.cpus();
            for cpu in cpus.iter() {
                match self.cpu(cpu).lifecycle_state() {
                    LifecycleState::Running | LifecycleState::ShutdownRequested => {
                        return Err(Error::InvalidState)
                    }
                    // A park still in flight would swallow the reset.
                    LifecycleState::ParkRequested => return Err(Error::ResourceBusy),
                    _ => {}
                }
            }
            (cpus, mem::take(&mut cell.needs_cache_flush))
        };

        if flush {
            self.platform.paging.flush_cell_dcaches(id);
        }
        for (n, cpu) in cpus.iter().enumerate() {
            let entry = if n == 0 { 0 } else { PSCI_INVALID_ADDRESS };
            self.request_reset(cpu, entry, 0)?;
            self.kick(cpu);
        }

        log::info!("Started cell {}", id.0);
        Ok(())
    }

    /// Tear down cell `id` and return its cores to the root cell
    ///
    /// The cores must have been suspended or parked by the caller. They come
    /// back parked, with virtual id == physical id.
    pub fn destroy_cell(&self, id: CellId) -> Result<()> {
        if id == ROOT_CELL {
            return Err(Error::PermissionDenied);
        }

        let cell = {
            let mut cells = self.cells.lock();
            let cpus = cells.get(id).ok_or(Error::NotFound)?.cpus();
            self.check_reassignable(cpus)?;
            let cell = cells.cells[id.0].take().ok_or(Error::NotFound)?;
            if let Some(root) = cells.get_mut(ROOT_CELL) {
                root.set_cpus(root.cpus().union(cpus));
            }
            cell
        };

        self.platform.paging.flush_cell_dcaches(id);

        for cpu in cell.cpus().iter() {
            let percpu = self.cpu(cpu);
            percpu.set_cell(ROOT_CELL);
            percpu.set_virtual_id(cpu as u32);
            {
                let mut state = percpu.control.lock();
                state.power_on_entry = PSCI_INVALID_ADDRESS;
                state.power_on_context = 0;
                state.halted = false;
            }
            self.park_for_reassignment(cpu, id);
        }

        for &irq in cell.irqs() {
            self.adjust_irq_routing(ROOT_CELL, irq);
        }
        self.platform.paging.cell_destroy(id);

        log::info!("Destroyed cell {}", id.0);
        Ok(())
    }

    /// Invalidate guest TLBs on every core of `cell`
    ///
    /// The calling core `current` flushes right away, the others at their
    /// next checkpoint.
    pub fn flush_cell_vcpu_caches(&self, cell: CellId, current: usize) {
        for cpu in self.cell_cpus(cell).iter() {
            if cpu == current {
                self.platform.paging.flush_tlb(cpu);
            } else {
                self.cpu(cpu).request_cache_flush();
            }
        }
    }

    /// Make the hardware follow the cell table after a create or destroy
    ///
    /// Shared interrupts are routed into their cells and caches of cells
    /// that lost cores are cleaned.
    pub fn commit_config(&self, current: usize) {
        for index in 0..MAX_CELLS {
            let id = CellId(index);
            let Some((irqs, flush)) =
                self.with_cell(id, |c| (c.config.irqs.clone(), mem::take(&mut c.needs_cache_flush)))
            else {
                continue;
            };
            for irq in irqs {
                self.adjust_irq_routing(id, irq);
            }
            if flush {
                self.platform.paging.flush_cell_dcaches(id);
            }
        }
        self.flush_cell_vcpu_caches(ROOT_CELL, current);
    }
}
