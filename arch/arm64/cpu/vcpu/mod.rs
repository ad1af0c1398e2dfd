//! Guest exit and trap handling for ARM64
//!
//! - [`exit`]: exit classification and the physical interrupt loop
//! - [`trap`]: synchronous trap dispatch by exception class
//! - [`context`]: the per-trap view of guest state
//! - [`cond`]: condition-code evaluation for AArch32 traps

pub mod cond;
pub mod context;
pub mod exit;
pub mod trap;

pub use context::TrapContext;
pub use exit::{ExitAction, ExitReason};
pub use trap::TrapReturn;
