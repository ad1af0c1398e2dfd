//! Coprocessor emulation for ARMv7/ARMv8-AArch32
//!
//! Only CP15 accesses are trapped; CP14 (debug) traps stay disabled.

pub mod cp15;

pub use cp15::{handle_cp15_32, handle_cp15_64, Cp15Encoding};
