//! Utility functions and data structures
//!
//! This module contains the small helpers used throughout the hypervisor:
//! the core-set bitmap, the spin back-off used by every busy-wait, and the
//! `log` backend.

pub mod bitmap;
pub mod log;

// Re-export commonly used utilities
pub use self::bitmap::CpuSet;

/// Hint the core that it is spinning
#[inline]
pub fn cpu_relax() {
    core::hint::spin_loop();
}

/// Exponential back-off for busy-wait loops
///
/// Every cross-core wait in the control plane spins on a flag owned by
/// another core. The back-off keeps the waiter off the shared cache line
/// for progressively longer stretches, capped at `2^SPIN_LIMIT` relax hints.
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;

    pub const fn new() -> Self {
        Self { step: 0 }
    }

    /// Spin for the current step, then widen the next one
    pub fn snooze(&mut self) {
        for _ in 0..(1u32 << self.step) {
            cpu_relax();
        }
        if self.step < Self::SPIN_LIMIT {
            self.step += 1;
        }
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }
}
