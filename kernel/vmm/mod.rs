//! Hypervisor aggregate
//!
//! [`Hypervisor`] ties together everything the cores share: the platform
//! description, the per-core control blocks, the cell table and the
//! collaborators reached through [`Platform`]. It is created once on the
//! boot core and then shared by reference; every operation takes the id
//! of the core it acts on.

pub mod cell;

pub use cell::{Cell, CellConfig, CellId, GuestMode, ROOT_CELL};

use heapless::Vec;

use self::cell::CellTable;
use crate::arch::arm64::cpu::percpu::PerCpu;
use crate::arch::arm64::interrupt::gic::IrqChip;
use crate::arch::arm64::mmu::{Stage2Context, Stage2Paging};
use crate::arch::arm64::psci::Firmware;
use crate::config::{SystemConfig, MAX_CPUS};
use crate::kernel::sync::SpinLock;
use crate::{Error, Result};

/// Collaborators the control plane drives
#[derive(Clone, Copy)]
pub struct Platform<'p> {
    pub irqchip: &'p dyn IrqChip,
    pub paging: &'p dyn Stage2Paging,
    pub firmware: &'p dyn Firmware,
}

/// Shared hypervisor state
pub struct Hypervisor<'p> {
    config: SystemConfig,
    platform: Platform<'p>,
    cpus: Vec<PerCpu, MAX_CPUS>,
    cells: SpinLock<CellTable>,
}

impl<'p> Hypervisor<'p> {
    /// Set up control blocks and the root cell for `config`
    ///
    /// Cores outside the root cell set are never brought up and stay
    /// stopped.
    pub fn new(config: SystemConfig, platform: Platform<'p>) -> Result<Self> {
        config.validate()?;

        let mut cpus = Vec::new();
        for id in 0..config.num_cpus {
            let percpu = PerCpu::new(id);
            if !config.root_cpus.contains(id) {
                percpu.control.lock().stopped = true;
            }
            cpus.push(percpu).map_err(|_| Error::InvalidArgument)?;
        }

        let cells = CellTable::new(CellConfig::new(config.root_cpus, GuestMode::Aarch64));
        Ok(Self {
            config,
            platform,
            cpus,
            cells: SpinLock::new(cells),
        })
    }

    /// Global initialization, once on the boot core
    pub fn init(&self) -> Result<()> {
        log::info!(
            "Cellvisor {}: {} cpus, root cell {:?}, {:?}",
            crate::VERSION,
            self.config.num_cpus,
            self.config.root_cpus,
            self.config.gic.version
        );
        self.platform.irqchip.init()?;
        self.platform.paging.cell_init(ROOT_CELL)?;
        Ok(())
    }

    /// Per-core initialization, on core `cpu` itself
    pub fn cpu_init(&self, cpu: usize) -> Result<()> {
        let percpu = self.cpus.get(cpu).ok_or(Error::InvalidArgument)?;
        if percpu.is_stopped() {
            log::warn!("cpu {}: not part of the root cell, not brought up", cpu);
            return Err(Error::InvalidState);
        }
        self.platform.irqchip.per_core_init(cpu)?;
        self.platform.paging.per_core_init(cpu, Stage2Context::Cell(percpu.cell()));
        log::debug!("cpu {}: initialized", cpu);
        Ok(())
    }

    /// Control block of physical core `id`, `None` if there is no such core
    pub fn get_cpu(&self, id: usize) -> Option<&PerCpu> {
        self.cpus.get(id)
    }

    /// Control block of a core id taken from a caller
    pub(crate) fn target_cpu(&self, id: usize) -> Result<&PerCpu> {
        self.cpus.get(id).ok_or_else(|| {
            log::warn!("cpu {}: no such core", id);
            Error::InvalidArgument
        })
    }

    /// Control block of physical core `id`
    ///
    /// `id` must come from the hypervisor itself: a cell's core set, a
    /// resolved virtual id or the core running this code.
    #[inline]
    pub(crate) fn cpu(&self, id: usize) -> &PerCpu {
        &self.cpus[id]
    }

    pub fn num_cpus(&self) -> usize {
        self.cpus.len()
    }

    pub fn cpus(&self) -> impl Iterator<Item = &PerCpu> {
        self.cpus.iter()
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn platform(&self) -> &Platform<'p> {
        &self.platform
    }
}
