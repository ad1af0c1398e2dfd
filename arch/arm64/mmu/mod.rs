//! Memory virtualization contract
//!
//! Stage-2 page tables are owned by the paging collaborator. The control
//! plane only tells it when a cell comes and goes, which translation
//! context a core should run with, and when TLBs or data caches need
//! maintenance. Guest data aborts are forwarded unchanged for MMIO
//! emulation.

use crate::arch::arm64::cpu::vcpu::{TrapContext, TrapReturn};
use crate::kernel::vmm::CellId;
use crate::Result;

/// Translation context a core is switched to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage2Context {
    /// The stage-2 tables of a cell
    Cell(CellId),
    /// Tables mapping only the parking loop
    Parking,
}

/// Stage-2 paging collaborator
pub trait Stage2Paging: Sync {
    /// Build the stage-2 context of a new cell
    fn cell_init(&self, cell: CellId) -> Result<()>;

    /// Tear down the stage-2 context of a cell
    fn cell_destroy(&self, cell: CellId);

    /// Load `context` on the calling core
    fn per_core_init(&self, cpu: usize, context: Stage2Context);

    /// Invalidate the guest TLB entries of the calling core
    fn flush_tlb(&self, cpu: usize);

    /// Clean and invalidate data caches over the memory of `cell`
    fn flush_cell_dcaches(&self, cell: CellId);

    /// Emulate a guest data abort
    fn handle_data_abort(&self, ctx: &mut TrapContext<'_>) -> TrapReturn;
}
