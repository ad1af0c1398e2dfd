//! AArch32 CPU emulation
//!
//! Coprocessor accesses of 32-bit guests running on an ARM64 host.

pub mod coproc;
