// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Memory fences for memory that is shared between a guest hypervisor and the host. Both sides
//! of a shared region are the same hart, so only ordering against the other privilege level's
//! view of memory is needed.

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
use core::arch::asm;

// Safety: The `fence` instruction itself does not access memory; it's only side-effect is to
// enforce ordering of surrounding load/store instructions with respect to the `fence`.

/// Orders preceeding memory stores with respect to succeeding memory stores. Used between the
/// store of a shared value and the store of the flag that publishes it.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn dma_wmb() {
    unsafe { asm!("fence w,w") };
}

/// Orders preceeding memory loads with respect to succeeding memory loads. Used between the load
/// of a publishing flag and the load of the value it covers.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn dma_rmb() {
    unsafe { asm!("fence r,r") };
}

/// Orders all preceeding memory accesses with respect to all succeeding ones.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn dma_mb() {
    unsafe { asm!("fence rw,rw") };
}

// Make fence instructions a no-op for testing.
#[cfg(not(any(target_arch = "riscv64", target_os = "none")))]
pub fn dma_wmb() {}
#[cfg(not(any(target_arch = "riscv64", target_os = "none")))]
pub fn dma_rmb() {}
#[cfg(not(any(target_arch = "riscv64", target_os = "none")))]
pub fn dma_mb() {}
