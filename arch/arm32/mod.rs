//! AArch32 guest support
//!
//! Emulation of the coprocessor accesses an AArch32 EL1 guest traps into
//! EL2 with.

pub mod cpu;
