//! Synchronization primitives
//!
//! Cores never block or sleep inside the hypervisor. The only primitive is
//! a spin lock held for short critical sections.

pub mod spinlock;

pub use spinlock::{SpinLock, SpinLockGuard};
