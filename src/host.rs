// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The interface to the host's register and interrupt virtualization layer. Everything passed
//! across it has been through the `AccessValidator`.

use riscv_regs::{sstatus, GeneralPurposeRegisters, Interrupt, LocalRegisterCopy, PrivilegeLevel};
use sbi_rs::{Error as SbiError, HfenceKind};

use crate::validator::Validated;

/// Errors reported by the host when applying a validated request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostError {
    /// The request could not be carried out.
    Failed,
    /// A transient failure; the request may be retried.
    Io,
    /// The request did not complete in time; it may be retried.
    Timeout,
}

/// Holds the result of a host operation.
pub type HostResult<T> = core::result::Result<T, HostError>;

impl From<HostError> for SbiError {
    fn from(error: HostError) -> SbiError {
        match error {
            HostError::Failed => SbiError::Failed,
            HostError::Io => SbiError::Io,
            HostError::Timeout => SbiError::Timeout,
        }
    }
}

/// A read of one of the guest hypervisor's virtual CSRs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CsrRead {
    /// The CSR number.
    pub csr: u16,
}

/// A write to one of the guest hypervisor's virtual CSRs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CsrWrite {
    /// The CSR number.
    pub csr: u16,
    /// The new value.
    pub value: u64,
}

/// A range of 4kB pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRange {
    /// First page number.
    pub first: u64,
    /// Number of pages; never zero.
    pub count: u64,
}

impl PageRange {
    /// Returns true if `page` is within the range.
    pub fn contains(&self, page: u64) -> bool {
        page >= self.first && page - self.first < self.count
    }
}

/// A guest TLB invalidation. `None` fields cover everything.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FenceRequest {
    /// Which translation stage to invalidate.
    pub kind: HfenceKind,
    /// The guest VMID, or all VMIDs.
    pub vmid: Option<u16>,
    /// The address space within the guest, or all of them. Always `None` for G-stage fences.
    pub asid: Option<u16>,
    /// The guest pages, or all addresses.
    pub pages: Option<PageRange>,
}

impl FenceRequest {
    /// Returns true if a cached translation with the given attributes must be dropped.
    pub fn covers(&self, kind: HfenceKind, vmid: u16, asid: u16, page: u64) -> bool {
        self.kind == kind
            && self.vmid.map_or(true, |v| v == vmid)
            && self.asid.map_or(true, |a| a == asid)
            && self.pages.map_or(true, |r| r.contains(page))
    }
}

/// An interrupt to make pending for one of the guest hypervisor's harts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptRequest {
    /// A VS-level software, timer or external interrupt.
    VsLocal {
        /// Hart ID of the target.
        target: u64,
        /// The interrupt.
        interrupt: Interrupt,
    },
    /// A guest external interrupt line.
    GuestExternal {
        /// Hart ID of the target.
        target: u64,
        /// The `hgeip` bit.
        line: u8,
    },
}

impl InterruptRequest {
    /// Returns the hart the interrupt is destined for.
    pub fn target(&self) -> u64 {
        match self {
            InterruptRequest::VsLocal { target, .. } => *target,
            InterruptRequest::GuestExternal { target, .. } => *target,
        }
    }
}

/// The state loaded when emulating `sret` for the guest hypervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrapReturnState {
    /// Registers to restore.
    pub gprs: GeneralPurposeRegisters,
    /// Address to return to.
    pub sepc: u64,
    /// `sstatus` to restore; `SPP` selects the privilege level returned to.
    pub sstatus: u64,
}

impl TrapReturnState {
    /// Returns the privilege level `sret` returns to.
    pub fn target_privilege(&self) -> PrivilegeLevel {
        let status = LocalRegisterCopy::<u64, sstatus::Register>::new(self.sstatus);
        if status.is_set(sstatus::spp) {
            PrivilegeLevel::Supervisor
        } else {
            PrivilegeLevel::User
        }
    }
}

/// The host's register and interrupt virtualization layer, which holds the authoritative copy of
/// the guest hypervisor's virtual state.
pub trait NaclHost {
    /// Returns the current value of a virtual CSR.
    fn read_csr(&mut self, read: &Validated<CsrRead>) -> HostResult<u64>;

    /// Updates a virtual CSR.
    fn write_csr(&mut self, write: &Validated<CsrWrite>) -> HostResult<()>;

    /// Invalidates guest translations covered by `fence`.
    fn hfence(&mut self, fence: &Validated<FenceRequest>) -> HostResult<()>;

    /// Makes an interrupt pending.
    fn inject_interrupt(&mut self, request: &Validated<InterruptRequest>) -> HostResult<()>;

    /// Performs the trap return. On success the guest hypervisor resumes from `state` rather than
    /// from its ecall once the current call completes. Calling it again before then replaces
    /// `state`.
    fn sret(&mut self, state: &Validated<TrapReturnState>) -> HostResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_coverage() {
        let all = FenceRequest {
            kind: HfenceKind::Vvma,
            vmid: None,
            asid: None,
            pages: None,
        };
        assert!(all.covers(HfenceKind::Vvma, 3, 7, 0x1234));
        assert!(!all.covers(HfenceKind::Gvma, 3, 7, 0x1234));

        let scoped = FenceRequest {
            kind: HfenceKind::Vvma,
            vmid: Some(3),
            asid: Some(7),
            pages: Some(PageRange {
                first: 0x100,
                count: 2,
            }),
        };
        assert!(scoped.covers(HfenceKind::Vvma, 3, 7, 0x101));
        assert!(!scoped.covers(HfenceKind::Vvma, 3, 7, 0x102));
        assert!(!scoped.covers(HfenceKind::Vvma, 3, 8, 0x100));
        assert!(!scoped.covers(HfenceKind::Vvma, 4, 7, 0x100));
    }

    #[test]
    fn return_privilege() {
        let mut state = TrapReturnState {
            gprs: GeneralPurposeRegisters::default(),
            sepc: 0x8000_0000,
            sstatus: 1 << 8,
        };
        assert_eq!(state.target_privilege(), PrivilegeLevel::Supervisor);
        state.sstatus = 0;
        assert_eq!(state.target_privilege(), PrivilegeLevel::User);
    }
}
