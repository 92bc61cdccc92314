// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Checks applied to everything the guest hypervisor hands to the host. Values read from shared
//! memory or from call arguments start out as `Untrusted`; only `AccessValidator` can turn them
//! into the `Validated` values accepted by `NaclHost`.

use core::ops::Deref;
use riscv_regs::*;
use sbi_rs::{
    AutoswapContext, Error as SbiError, HfenceEntry, HfenceKind, NaclInterruptKind, SretContext,
};

use crate::csr_table::{self, CsrAccess, CsrCheck, CsrSlot};
use crate::host::{CsrRead, CsrWrite, FenceRequest, InterruptRequest, PageRange, TrapReturnState};
use crate::shmem::HfenceSlot;

/// Reasons a value from the guest hypervisor is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// No CSR is assigned to the slot or CSR number.
    Unassigned(u64),
    /// The CSR may not be written by the guest hypervisor.
    ReadOnly(u16),
    /// The value is not legal for the CSR.
    IllegalValue {
        /// The CSR being written.
        csr: u16,
        /// The rejected value.
        value: u64,
    },
    /// An HFENCE entry has reserved bits set or an unknown kind.
    MalformedFence(u64),
    /// The HFENCE list has no entry at the index.
    BadFenceIndex(u64),
    /// An HFENCE entry's page range wraps or is not a range.
    BadFenceRange {
        /// First page.
        first: u64,
        /// Number of pages.
        count: u64,
    },
    /// The `sret` context hasn't been populated.
    NotPopulated,
    /// The `sret` or auto-swap context has reserved bits set.
    ReservedBits,
    /// The `sret` context's `sepc` or `sstatus` is invalid.
    BadReturnState,
    /// Unknown interrupt kind.
    UnknownInterruptKind(u64),
    /// The interrupt number is not valid for its kind.
    BadInterruptNumber(u64),
    /// The hart doesn't exist.
    NoSuchHart(u64),
    /// The address isn't aligned as required.
    Misaligned(u64),
    /// The address range wraps around the end of the address space.
    AddressOverflow(u64),
}

impl From<Error> for SbiError {
    fn from(error: Error) -> SbiError {
        use self::Error::*;
        match error {
            Misaligned(_) | AddressOverflow(_) => SbiError::InvalidAddress,
            UnknownInterruptKind(_) | NoSuchHart(_) | BadFenceIndex(_) => SbiError::InvalidParam,
            BadInterruptNumber(_) => SbiError::BadRange,
            NotPopulated => SbiError::InvalidState,
            Unassigned(_)
            | ReadOnly(_)
            | IllegalValue { .. }
            | MalformedFence(_)
            | BadFenceRange { .. }
            | ReservedBits
            | BadReturnState => SbiError::Denied,
        }
    }
}

/// Holds the result of a validation.
pub type Result<T> = core::result::Result<T, Error>;

/// A value supplied by the guest hypervisor that hasn't been checked yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Untrusted<T>(T);

impl<T> Untrusted<T> {
    /// Wraps a value read from guest-controlled memory or registers.
    pub fn new(val: T) -> Self {
        Untrusted(val)
    }
}

/// A value that has passed the `AccessValidator`. Can only be created by this module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Validated<T>(T);

impl<T> Validated<T> {
    /// Returns the validated value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Validated<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

const PAGE_SHIFT: u64 = 12;
// Highest page number of a 64-bit address space, exclusive.
const PAGE_NUM_LIMIT: u64 = 1 << (64 - PAGE_SHIFT);

/// Checks values supplied by the guest hypervisor.
#[derive(Clone, Copy, Debug)]
pub struct AccessValidator {
    num_harts: u64,
}

impl AccessValidator {
    /// Creates a validator for a system with `num_harts` harts.
    pub fn new(num_harts: usize) -> Self {
        Self {
            num_harts: num_harts as u64,
        }
    }

    /// Checks a value from the CSR array slot `slot`.
    pub fn check_slot_write(
        &self,
        slot: CsrSlot,
        value: Untrusted<u64>,
    ) -> Result<Validated<CsrWrite>> {
        let desc = csr_table::lookup_slot(slot).ok_or(Error::Unassigned(slot.index() as u64))?;
        self.check_write(desc.num, value.0)
    }

    /// Checks a write of `value` to CSR number `csr`.
    pub fn check_csr_write(
        &self,
        csr: Untrusted<u64>,
        value: Untrusted<u64>,
    ) -> Result<Validated<CsrWrite>> {
        let csr_num = Self::csr_num(csr.0)?;
        self.check_write(csr_num, value.0)
    }

    /// Checks a read of CSR number `csr`.
    pub fn check_csr_read(&self, csr: Untrusted<u64>) -> Result<Validated<CsrRead>> {
        let csr_num = Self::csr_num(csr.0)?;
        Ok(Validated(CsrRead { csr: csr_num }))
    }

    /// Returns a read of a CSR the host itself needs the value of.
    pub(crate) fn internal_read(&self, csr: u16) -> Result<Validated<CsrRead>> {
        self.check_csr_read(Untrusted(csr as u64))
    }

    /// Checks an HFENCE list entry. Returns `None` if the entry isn't pending.
    pub fn check_hfence(
        &self,
        entry: Untrusted<HfenceEntry>,
    ) -> Result<Option<Validated<FenceRequest>>> {
        let entry = entry.0;
        if !entry.is_pending() {
            return Ok(None);
        }
        if entry.config & HfenceEntry::CONFIG_RESERVED != 0 {
            return Err(Error::MalformedFence(entry.config));
        }
        let kind = HfenceKind::from_raw(entry.kind()).ok_or(Error::MalformedFence(entry.config))?;
        if kind == HfenceKind::Gvma && entry.asid() != 0 {
            return Err(Error::MalformedFence(entry.config));
        }
        let pages = match entry.page_count {
            0 if entry.page_num == 0 => None,
            count => {
                let range_ok = count != 0
                    && entry
                        .page_num
                        .checked_add(count)
                        .map_or(false, |end| end <= PAGE_NUM_LIMIT);
                if !range_ok {
                    return Err(Error::BadFenceRange {
                        first: entry.page_num,
                        count,
                    });
                }
                Some(PageRange {
                    first: entry.page_num,
                    count,
                })
            }
        };
        let wildcard = |v: u16| (v != 0).then_some(v);
        Ok(Some(Validated(FenceRequest {
            kind,
            vmid: wildcard(entry.vmid()),
            asid: wildcard(entry.asid()),
            pages,
        })))
    }

    /// Checks an index into the HFENCE list.
    pub fn check_hfence_slot(&self, index: Untrusted<u64>) -> Result<HfenceSlot> {
        HfenceSlot::new(index.0).ok_or(Error::BadFenceIndex(index.0))
    }

    /// Checks a request to inject an interrupt.
    pub fn check_interrupt(
        &self,
        kind: Untrusted<u64>,
        number: Untrusted<u64>,
        target: Untrusted<u64>,
    ) -> Result<Validated<InterruptRequest>> {
        let kind = NaclInterruptKind::from_raw(kind.0).ok_or(Error::UnknownInterruptKind(kind.0))?;
        let target = target.0;
        if target >= self.num_harts {
            return Err(Error::NoSuchHart(target));
        }
        let number = number.0;
        let request = match kind {
            NaclInterruptKind::VsLocal => {
                let interrupt = Interrupt::from_cause(number)
                    .ok()
                    .filter(|i| i.is_virtual_supervisor())
                    .ok_or(Error::BadInterruptNumber(number))?;
                InterruptRequest::VsLocal { target, interrupt }
            }
            NaclInterruptKind::GuestExternal => {
                // Bit 0 of hgeip is hardwired to zero.
                if !(1..64).contains(&number) {
                    return Err(Error::BadInterruptNumber(number));
                }
                InterruptRequest::GuestExternal {
                    target,
                    line: number as u8,
                }
            }
        };
        Ok(Validated(request))
    }

    /// Checks the `sret` context.
    pub fn check_sret(
        &self,
        ctx: Untrusted<SretContext>,
    ) -> Result<Validated<TrapReturnState>> {
        let ctx = ctx.0;
        if !ctx.is_populated() {
            return Err(Error::NotPopulated);
        }
        if ctx.header() & SretContext::HEADER_RESERVED != 0
            || ctx.reserved().iter().any(|w| *w != 0)
        {
            return Err(Error::ReservedBits);
        }
        // Instructions are at least 2-byte aligned.
        if ctx.sepc() & 0x1 != 0 {
            return Err(Error::BadReturnState);
        }
        let status = LocalRegisterCopy::<u64, sstatus::Register>::new(ctx.sstatus());
        if !status.matches_all(sstatus::uxl::Xlen64) {
            return Err(Error::BadReturnState);
        }
        Ok(Validated(TrapReturnState {
            gprs: ctx.gprs(),
            sepc: ctx.sepc(),
            sstatus: ctx.sstatus(),
        }))
    }

    /// Checks the auto-swap context. Returns the `hstatus` write to perform, if any.
    pub fn check_autoswap(
        &self,
        ctx: Untrusted<AutoswapContext>,
    ) -> Result<Option<Validated<CsrWrite>>> {
        let ctx = ctx.0;
        if ctx.flags() & !AutoswapContext::HSTATUS_VALID != 0 {
            return Err(Error::ReservedBits);
        }
        if ctx.flags() & AutoswapContext::HSTATUS_VALID == 0 {
            return Ok(None);
        }
        self.check_write(CSR_HSTATUS, ctx.hstatus()).map(Some)
    }

    /// Checks that `len` bytes of guest memory at `addr` form a valid range with the given
    /// alignment.
    pub fn check_guest_range(&self, addr: Untrusted<u64>, len: u64, align: u64) -> Result<u64> {
        let addr = addr.0;
        if addr & (align - 1) != 0 {
            return Err(Error::Misaligned(addr));
        }
        addr.checked_add(len).ok_or(Error::AddressOverflow(addr))?;
        Ok(addr)
    }

    fn csr_num(raw: u64) -> Result<u16> {
        u16::try_from(raw)
            .ok()
            .filter(|n| *n <= CSR_NUM_MAX)
            .and_then(csr_table::lookup_csr)
            .map(|desc| desc.num)
            .ok_or(Error::Unassigned(raw))
    }

    fn check_write(&self, csr: u16, value: u64) -> Result<Validated<CsrWrite>> {
        let desc = csr_table::lookup_csr(csr).ok_or(Error::Unassigned(csr as u64))?;
        if desc.access == CsrAccess::ReadOnly {
            return Err(Error::ReadOnly(csr));
        }
        if !value_is_legal(desc.check, value) {
            return Err(Error::IllegalValue { csr, value });
        }
        Ok(Validated(CsrWrite { csr, value }))
    }
}

fn value_is_legal(check: CsrCheck, value: u64) -> bool {
    match check {
        CsrCheck::None => true,
        CsrCheck::Hstatus => {
            let reg = LocalRegisterCopy::<u64, hstatus::Register>::new(value);
            reg.matches_all(hstatus::vsxl::Xlen64)
        }
        CsrCheck::Hedeleg => value & HEDELEG_READ_ONLY_ZERO == 0,
        CsrCheck::VsInterrupts => value & !VS_INTERRUPT_BITS == 0,
        CsrCheck::Hie => value & !(VS_INTERRUPT_BITS | hie::sgext::SET.value) == 0,
        CsrCheck::Hgatp => {
            let reg = LocalRegisterCopy::<u64, hgatp::Register>::new(value);
            match reg.read_as_enum(hgatp::mode) {
                Some(hgatp::mode::Value::Bare) => value == 0,
                Some(_) => true,
                None => false,
            }
        }
        CsrCheck::Vsstatus => {
            let reg = LocalRegisterCopy::<u64, sstatus::Register>::new(value);
            reg.matches_all(sstatus::uxl::Xlen64)
        }
        CsrCheck::Vstvec => {
            let reg = LocalRegisterCopy::<u64, stvec::Register>::new(value);
            reg.read_as_enum::<stvec::mode::Value>(stvec::mode).is_some()
        }
        CsrCheck::Vsatp => {
            let reg = LocalRegisterCopy::<u64, satp::Register>::new(value);
            match reg.read_as_enum(satp::mode) {
                Some(satp::mode::Value::Bare) => value == 0,
                Some(satp::mode::Value::Sv64) | None => false,
                Some(_) => true,
            }
        }
    }
}
