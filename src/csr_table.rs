// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The table assigning CSRs to slots of the shared-memory CSR array.

use riscv_regs::*;
use sbi_rs::{NaclShmem, NACL_CSR_SLOTS};
use static_assertions::const_assert;

/// Index of a slot in the shared-memory CSR array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CsrSlot(u16);

impl CsrSlot {
    /// Returns the slot at `index` if it is within the CSR array.
    pub fn new(index: usize) -> Option<Self> {
        (index < NACL_CSR_SLOTS).then_some(CsrSlot(index as u16))
    }

    /// Returns the slot `csr_num` is stored in. Several CSR numbers share a slot; only the one in
    /// the table is assigned to it.
    pub fn for_csr(csr_num: u16) -> Self {
        CsrSlot(NaclShmem::csr_index(csr_num) as u16)
    }

    /// Returns the index of the slot in the CSR array.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Access the guest hypervisor is granted to a CSR.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsrAccess {
    ReadWrite,
    ReadOnly,
}

/// Constraints a value must satisfy before being written to a CSR.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsrCheck {
    /// Any value.
    None,
    /// VSXL must select 64-bit.
    Hstatus,
    /// Read-only zero exceptions must not be delegated.
    Hedeleg,
    /// Only VS-level interrupt bits may be set.
    VsInterrupts,
    /// Only VS-level and guest external interrupt bits may be set.
    Hie,
    /// A supported G-stage translation mode.
    Hgatp,
    /// UXL must select 64-bit.
    Vsstatus,
    /// Direct or vectored mode.
    Vstvec,
    /// A supported VS-stage translation mode.
    Vsatp,
}

/// A CSR the guest hypervisor may access through the CSR array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CsrDesc {
    /// The CSR number.
    pub num: u16,
    /// Whether the guest hypervisor may write it.
    pub access: CsrAccess,
    /// Checks applied to written values.
    pub check: CsrCheck,
}

impl CsrDesc {
    const fn new(num: u16, access: CsrAccess, check: CsrCheck) -> Self {
        Self { num, access, check }
    }

    /// Returns the slot the CSR is stored in.
    pub fn slot(&self) -> CsrSlot {
        CsrSlot::for_csr(self.num)
    }
}

use CsrAccess::*;

const CSR_TABLE: [CsrDesc; 28] = [
    CsrDesc::new(CSR_VSSTATUS, ReadWrite, CsrCheck::Vsstatus),
    CsrDesc::new(CSR_VSIE, ReadWrite, CsrCheck::VsInterrupts),
    CsrDesc::new(CSR_VSTVEC, ReadWrite, CsrCheck::Vstvec),
    CsrDesc::new(CSR_VSSCRATCH, ReadWrite, CsrCheck::None),
    CsrDesc::new(CSR_VSEPC, ReadWrite, CsrCheck::None),
    CsrDesc::new(CSR_VSCAUSE, ReadWrite, CsrCheck::None),
    CsrDesc::new(CSR_VSTVAL, ReadWrite, CsrCheck::None),
    CsrDesc::new(CSR_VSIP, ReadWrite, CsrCheck::VsInterrupts),
    CsrDesc::new(CSR_VSTIMECMP, ReadWrite, CsrCheck::None),
    CsrDesc::new(CSR_VSISELECT, ReadWrite, CsrCheck::None),
    CsrDesc::new(CSR_VSIREG, ReadWrite, CsrCheck::None),
    CsrDesc::new(CSR_VSTOPEI, ReadWrite, CsrCheck::None),
    CsrDesc::new(CSR_VSATP, ReadWrite, CsrCheck::Vsatp),
    CsrDesc::new(CSR_VSTOPI, ReadOnly, CsrCheck::None),
    CsrDesc::new(CSR_HSTATUS, ReadWrite, CsrCheck::Hstatus),
    CsrDesc::new(CSR_HEDELEG, ReadWrite, CsrCheck::Hedeleg),
    CsrDesc::new(CSR_HIDELEG, ReadWrite, CsrCheck::VsInterrupts),
    CsrDesc::new(CSR_HIE, ReadWrite, CsrCheck::Hie),
    CsrDesc::new(CSR_HTIMEDELTA, ReadWrite, CsrCheck::None),
    CsrDesc::new(CSR_HCOUNTEREN, ReadWrite, CsrCheck::None),
    CsrDesc::new(CSR_HGEIE, ReadWrite, CsrCheck::None),
    CsrDesc::new(CSR_HENVCFG, ReadWrite, CsrCheck::None),
    CsrDesc::new(CSR_HTVAL, ReadWrite, CsrCheck::None),
    CsrDesc::new(CSR_HIP, ReadWrite, CsrCheck::VsInterrupts),
    CsrDesc::new(CSR_HVIP, ReadWrite, CsrCheck::VsInterrupts),
    CsrDesc::new(CSR_HTINST, ReadWrite, CsrCheck::None),
    CsrDesc::new(CSR_HGATP, ReadWrite, CsrCheck::Hgatp),
    CsrDesc::new(CSR_HGEIP, ReadOnly, CsrCheck::None),
];

/// Number of slots covered by the table; slots at or above this index are never assigned.
pub const CSR_TABLE_LEN: usize = NaclShmem::csr_index(CSR_VSTOPI) + 1;

const_assert!(CSR_TABLE_LEN <= NACL_CSR_SLOTS);
const_assert!(CSR_TABLE.len() < UNASSIGNED as usize);

const UNASSIGNED: u8 = u8::MAX;

// Maps each slot to its position in `CSR_TABLE`.
static SLOT_MAP: [u8; NACL_CSR_SLOTS] = build_slot_map();

const fn build_slot_map() -> [u8; NACL_CSR_SLOTS] {
    let mut map = [UNASSIGNED; NACL_CSR_SLOTS];
    let mut i = 0;
    while i < CSR_TABLE.len() {
        let index = NaclShmem::csr_index(CSR_TABLE[i].num);
        assert!(index < CSR_TABLE_LEN);
        assert!(map[index] == UNASSIGNED);
        map[index] = i as u8;
        i += 1;
    }
    map
}

/// Returns the CSR assigned to `slot`, if any.
pub fn lookup_slot(slot: CsrSlot) -> Option<&'static CsrDesc> {
    match SLOT_MAP[slot.index()] {
        UNASSIGNED => None,
        i => Some(&CSR_TABLE[i as usize]),
    }
}

/// Returns the entry for `csr_num` if the guest hypervisor may access it.
pub fn lookup_csr(csr_num: u16) -> Option<&'static CsrDesc> {
    lookup_slot(CsrSlot::for_csr(csr_num)).filter(|desc| desc.num == csr_num)
}

/// Returns an iterator over every assigned CSR.
pub fn assigned_csrs() -> impl Iterator<Item = &'static CsrDesc> {
    CSR_TABLE.iter()
}
