//! Hypervisor-wide state
//!
//! Architecture-neutral pieces shared by every core: the spin lock and the
//! [`vmm::Hypervisor`] aggregate holding the per-core control blocks and
//! the cell table.

pub mod sync;
pub mod vmm;
