// Copyright (c) 2021 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use crate::{Result, SbiMessage};

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
use core::arch::asm;

/// Send an ecall to the host hypervisor.
///
/// # Safety
///
/// The caller must verify that any memory references contained in `msg` obey Rust's memory
/// safety rules. For example, any pointers to memory that will be modified in the handling of
/// the ecall must be uniquely owned. Similarly any pointers read by the ecall must not be
/// mutably borrowed.
///
/// In addition the caller is placing trust in the host hypervisor to maintain the promises
/// of the interface w.r.t. reading and writing only within the provided bounds.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub unsafe fn ecall_send(msg: &SbiMessage) -> Result<u64> {
    let args = msg.args();
    // normally error code
    let mut a0;
    // normally return value
    let mut a1;
    asm!("ecall", inlateout("a0") args[0]=>a0, inlateout("a1") args[1]=>a1,
                in("a2") args[2], in("a3") args[3],
                in("a4") args[4], in("a5") args[5],
                in("a6") msg.a6(), in("a7") msg.a7(), options(nostack));

    msg.result(a0, a1)
}

// Make ecalls panic in tests as there isn't an SBI interface beneath the tests.
#[cfg(not(any(target_arch = "riscv64", target_os = "none")))]
pub unsafe fn ecall_send(_msg: &SbiMessage) -> Result<u64> {
    panic!("Test attempted ecall");
}
