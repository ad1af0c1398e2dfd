//! Configuration management
//!
//! This module holds the platform description handed to the hypervisor at
//! start-up and the compile-time limits sizing its static tables. Parsing
//! the system image that carries the description happens outside this
//! crate.

use log::LevelFilter;

use crate::utils::CpuSet;
use crate::{Error, Result};

/// Maximum number of physical cores
pub const MAX_CPUS: usize = 8;

/// Maximum number of cells, the root cell included
pub const MAX_CELLS: usize = 4;

/// Shared interrupts a non-root cell can own
pub const MAX_CELL_IRQS: usize = 32;

/// Depth of the per-core queue of interrupts waiting for a free slot
pub const MAX_PENDING_IRQS: usize = 16;

/// Upper bound on list registers of any supported GIC
pub const MAX_INJECTION_SLOTS: usize = 16;

/// Interrupt controller generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GicVersion {
    /// Memory-mapped CPU interface, GICH list registers
    V2,
    /// System-register CPU interface, ICH_LR<n>_EL2 list registers
    V3,
}

/// Interrupt controller description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GicConfig {
    pub version: GicVersion,
    /// Distributor base
    pub gicd_base: u64,
    /// CPU interface base (GICv2 only)
    pub gicc_base: u64,
    /// Virtual interface control base (GICv2 only)
    pub gich_base: u64,
    /// Redistributor base (GICv3 only)
    pub gicr_base: u64,
    /// PPI signaling list-register underflow
    pub maintenance_irq: u32,
}

impl GicConfig {
    pub const fn v2(gicd_base: u64, gicc_base: u64, gich_base: u64) -> Self {
        Self {
            version: GicVersion::V2,
            gicd_base,
            gicc_base,
            gich_base,
            gicr_base: 0,
            maintenance_irq: DEFAULT_MAINTENANCE_IRQ,
        }
    }

    pub const fn v3(gicd_base: u64, gicr_base: u64) -> Self {
        Self {
            version: GicVersion::V3,
            gicd_base,
            gicc_base: 0,
            gich_base: 0,
            gicr_base,
            maintenance_irq: DEFAULT_MAINTENANCE_IRQ,
        }
    }
}

/// Maintenance interrupt on most platforms
pub const DEFAULT_MAINTENANCE_IRQ: u32 = 25;

/// Global hypervisor settings
#[derive(Debug, Clone)]
pub struct HypervisorConfig {
    /// Maximum log level
    pub log_level: LevelFilter,
    /// Enable debug output
    pub debug_enabled: bool,
    /// Enable verbose logging
    pub verbose_enabled: bool,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            log_level: crate::utils::log::default_level(),
            debug_enabled: cfg!(feature = "debug"),
            verbose_enabled: cfg!(feature = "verbose"),
        }
    }
}

/// Platform description
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Number of physical cores brought up
    pub num_cpus: usize,
    /// Cores owned by the root cell at start-up
    pub root_cpus: CpuSet,
    pub gic: GicConfig,
    pub hypervisor: HypervisorConfig,
}

impl SystemConfig {
    /// All `num_cpus` cores in the root cell
    pub fn new(num_cpus: usize, gic: GicConfig) -> Self {
        Self {
            num_cpus,
            root_cpus: CpuSet::first_n(num_cpus),
            gic,
            hypervisor: HypervisorConfig::default(),
        }
    }

    /// Reject descriptions the static tables cannot hold
    pub fn validate(&self) -> Result<()> {
        if self.num_cpus == 0 || self.num_cpus > MAX_CPUS {
            log::error!("Config: {} cores, at most {} supported", self.num_cpus, MAX_CPUS);
            return Err(Error::InvalidArgument);
        }
        if self.root_cpus.is_empty() || !self.root_cpus.is_subset(CpuSet::first_n(self.num_cpus)) {
            log::error!("Config: root cell cores {:?} out of range", self.root_cpus);
            return Err(Error::InvalidArgument);
        }
        // The maintenance interrupt must be a PPI.
        if !(16..32).contains(&self.gic.maintenance_irq) {
            log::error!("Config: maintenance irq {} is not a PPI", self.gic.maintenance_irq);
            return Err(Error::InvalidArgument);
        }
        let bases_ok = match self.gic.version {
            GicVersion::V2 => {
                self.gic.gicd_base != 0 && self.gic.gicc_base != 0 && self.gic.gich_base != 0
            }
            GicVersion::V3 => self.gic.gicd_base != 0 && self.gic.gicr_base != 0,
        };
        if !bases_ok {
            log::error!("Config: missing {:?} register base", self.gic.version);
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}
