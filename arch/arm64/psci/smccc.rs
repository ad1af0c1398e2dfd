//! SMCCC (SMC Calling Convention) for ARM64
//!
//! Classifies trapped SMC/HVC function ids and forwards the calls the
//! emulator does not handle itself. Reference: ARM DEN 0028A.
//!
//! Function id in x0/r0, arguments in x1-x3, result in x0/r0.

use cfg_if::cfg_if;

use super::{PSCI_0_2_FN64_BASE, PSCI_0_2_FN_BASE};

/// Mask selecting the owning service and calling convention of a PSCI id
const PSCI_FN_CLASS_MASK: u32 = 0xff00_0000;

/// U-Boot's PSCI 0.1 ids share this prefix
const PSCI_UBOOT_PREFIX: u32 = 0x95c1_ba00;
const PSCI_UBOOT_MASK: u32 = 0xffff_ff00;

/// SMCCC NOT_SUPPORTED
pub const SMCCC_RET_NOT_SUPPORTED: u64 = u64::MAX;

pub const fn is_psci_32(function_id: u32) -> bool {
    function_id & PSCI_FN_CLASS_MASK == PSCI_0_2_FN_BASE
}

pub const fn is_psci_64(function_id: u32) -> bool {
    function_id & PSCI_FN_CLASS_MASK == PSCI_0_2_FN64_BASE
}

pub const fn is_psci_uboot(function_id: u32) -> bool {
    function_id & PSCI_UBOOT_MASK == PSCI_UBOOT_PREFIX
}

/// True for every id the PSCI emulator owns
pub const fn is_psci_call(function_id: u32) -> bool {
    is_psci_32(function_id) || is_psci_64(function_id) || is_psci_uboot(function_id)
}

/// Receiver of calls passed through unmodified
pub trait Firmware: Sync {
    /// Issue `function_id` to the secure monitor
    fn smc(&self, function_id: u64, args: [u64; 3]) -> u64;

    /// Handle a hypervisor management call from a guest on `cpu`
    fn hypercall(&self, _cpu: usize, code: u64, _args: [u64; 2]) -> u64 {
        log::debug!("hypercall {:#x} not supported", code);
        SMCCC_RET_NOT_SUPPORTED
    }
}

cfg_if! {
    if #[cfg(target_arch = "aarch64")] {
        /// Secure monitor reached through `smc #0`
        #[derive(Debug, Default)]
        pub struct SecureMonitor;

        impl Firmware for SecureMonitor {
            fn smc(&self, function_id: u64, args: [u64; 3]) -> u64 {
                let x0: u64;
                // SAFETY: the call is forwarded on behalf of the guest that
                // issued it, with the guest's own arguments. EL3 preserves
                // x4-x17 and the stack.
                unsafe {
                    core::arch::asm!(
                        "smc #0",
                        inlateout("x0") function_id => x0,
                        inlateout("x1") args[0] => _,
                        inlateout("x2") args[1] => _,
                        inlateout("x3") args[2] => _,
                        options(nostack)
                    );
                }
                x0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0x8400_0000, true, false, false)]
    #[test_case(0x8400_00ff, true, false, false)]
    #[test_case(0xc400_0003, false, true, false)]
    #[test_case(0x95c1_ba5f, false, false, true)]
    #[test_case(0x8200_0000, false, false, false)]
    #[test_case(0xc200_0001, false, false, false)]
    fn test_function_id_classes(id: u32, psci32: bool, psci64: bool, uboot: bool) {
        assert_eq!(is_psci_32(id), psci32);
        assert_eq!(is_psci_64(id), psci64);
        assert_eq!(is_psci_uboot(id), uboot);
        assert_eq!(is_psci_call(id), psci32 || psci64 || uboot);
    }

    #[test]
    fn test_default_hypercall_not_supported() {
        struct NoFirmware;
        impl Firmware for NoFirmware {
            fn smc(&self, _function_id: u64, _args: [u64; 3]) -> u64 {
                0
            }
        }
        assert_eq!(NoFirmware.hypercall(0, 1, [0, 0]), SMCCC_RET_NOT_SUPPORTED);
    }
}
