// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use core::cell::{Cell, RefCell};
use core::ptr::NonNull;
use riscv_regs::{hvip, LocalRegisterCopy, CSR_HGEIP, CSR_HVIP, CSR_NUM_MAX};
use sbi_rs::{BatchDescriptor, HfenceKind, NaclShmem, NACL_SHMEM_ALIGN, NACL_SHMEM_SIZE};
use std::vec::Vec;

use crate::host::*;
use crate::shmem::{GuestMemory, GuestMemoryError};
use crate::validator::Validated;

const GUEST_MEM_BASE: u64 = 0x8000_0000;
const GUEST_MEM_SIZE: usize = 64 * NACL_SHMEM_ALIGN as usize;

/// Guest memory backed by a page-aligned host buffer starting at `GUEST_MEM_BASE`.
pub struct TestGuestMemory {
    // Owns the memory `aligned` points into.
    _backing: Vec<u8>,
    aligned: *mut u8,
    mapped: RefCell<Vec<(u64, u64)>>,
    fail_next: Cell<Option<GuestMemoryError>>,
}

impl TestGuestMemory {
    pub fn new() -> Self {
        let mut backing = vec![0u8; GUEST_MEM_SIZE + NACL_SHMEM_ALIGN as usize];
        let aligned = unsafe {
            // Not safe - just a test
            backing
                .as_mut_ptr()
                .add(backing.as_ptr().align_offset(NACL_SHMEM_ALIGN as usize))
        };
        Self {
            _backing: backing,
            aligned,
            mapped: RefCell::new(Vec::new()),
            fail_next: Cell::new(None),
        }
    }

    /// Returns the lowest guest physical address.
    pub fn base(&self) -> u64 {
        GUEST_MEM_BASE
    }

    /// Returns the guest physical address of the `n`th page-aligned shared-memory sized block.
    pub fn shmem_gpa(&self, n: u64) -> u64 {
        GUEST_MEM_BASE + n * NACL_SHMEM_SIZE as u64
    }

    fn host_ptr(&self, gpa: u64, len: u64) -> Option<*mut u8> {
        let offset = gpa.checked_sub(GUEST_MEM_BASE)?;
        if offset.checked_add(len)? > GUEST_MEM_SIZE as u64 {
            return None;
        }
        // Not safe - just a test
        Some(unsafe { self.aligned.add(offset as usize) })
    }

    /// Returns the shared-memory area at `gpa` as the guest hypervisor sees it.
    #[allow(clippy::mut_from_ref)]
    pub fn shmem(&self, gpa: u64) -> &mut NaclShmem {
        let ptr = self.host_ptr(gpa, NACL_SHMEM_SIZE as u64).unwrap();
        unsafe { &mut *(ptr as *mut NaclShmem) }
    }

    /// Returns `count` batch descriptors at `gpa`.
    #[allow(clippy::mut_from_ref)]
    pub fn descriptors(&self, gpa: u64, count: usize) -> &mut [BatchDescriptor] {
        let len = count * core::mem::size_of::<BatchDescriptor>();
        let ptr = self.host_ptr(gpa, len as u64).unwrap();
        unsafe { core::slice::from_raw_parts_mut(ptr as *mut BatchDescriptor, count) }
    }

    /// Returns true if a mapping starting at `gpa` is live.
    pub fn is_mapped(&self, gpa: u64) -> bool {
        self.mapped.borrow().iter().any(|(g, _)| *g == gpa)
    }

    /// Returns the number of live mappings.
    pub fn num_mappings(&self) -> usize {
        self.mapped.borrow().len()
    }

    /// Makes the next call to `map` fail with `err`.
    pub fn fail_next_map(&self, err: GuestMemoryError) {
        self.fail_next.set(Some(err));
    }
}

impl GuestMemory for TestGuestMemory {
    fn map(&self, gpa: u64, len: u64) -> Result<NonNull<u8>, GuestMemoryError> {
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        let ptr = self
            .host_ptr(gpa, len)
            .ok_or(GuestMemoryError::Unmapped(gpa))?;
        self.mapped.borrow_mut().push((gpa, len));
        NonNull::new(ptr).ok_or(GuestMemoryError::Unmapped(gpa))
    }

    fn unmap(&self, gpa: u64, len: u64) {
        let mut mapped = self.mapped.borrow_mut();
        let pos = mapped.iter().position(|m| *m == (gpa, len)).unwrap();
        mapped.remove(pos);
    }
}

/// A translation cached by the `TestHost` software TLB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CachedTranslation {
    kind: HfenceKind,
    vmid: u16,
    asid: u16,
    page: u64,
}

/// Records everything applied to it; CSRs are kept in a flat array indexed by CSR number.
pub struct TestHost {
    csrs: Vec<u64>,
    writes: Vec<CsrWrite>,
    fences: Vec<FenceRequest>,
    tlb: Vec<CachedTranslation>,
    injected: Vec<InterruptRequest>,
    srets: Vec<TrapReturnState>,
    ok_budget: u64,
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            csrs: vec![0; CSR_NUM_MAX as usize + 1],
            writes: Vec::new(),
            fences: Vec::new(),
            tlb: Vec::new(),
            injected: Vec::new(),
            srets: Vec::new(),
            ok_budget: u64::MAX,
        }
    }

    pub fn csr(&self, csr: u16) -> u64 {
        self.csrs[csr as usize]
    }

    pub fn set_csr(&mut self, csr: u16, value: u64) {
        self.csrs[csr as usize] = value;
    }

    pub fn writes(&self) -> &[CsrWrite] {
        &self.writes
    }

    pub fn fences(&self) -> &[FenceRequest] {
        &self.fences
    }

    pub fn injected(&self) -> &[InterruptRequest] {
        &self.injected
    }

    pub fn last_sret(&self) -> Option<TrapReturnState> {
        self.srets.last().copied()
    }

    pub fn cache_translation(&mut self, kind: HfenceKind, vmid: u16, asid: u16, page: u64) {
        self.tlb.push(CachedTranslation {
            kind,
            vmid,
            asid,
            page,
        });
    }

    pub fn has_translation(&self, kind: HfenceKind, vmid: u16, asid: u16, page: u64) -> bool {
        self.tlb.contains(&CachedTranslation {
            kind,
            vmid,
            asid,
            page,
        })
    }

    /// Lets the next `ops` state-changing requests succeed and fails the rest with `Io`.
    pub fn fail_after(&mut self, ops: u64) {
        self.ok_budget = ops;
    }

    fn take_budget(&mut self) -> HostResult<()> {
        if self.ok_budget == 0 {
            return Err(HostError::Io);
        }
        self.ok_budget -= 1;
        Ok(())
    }
}

impl NaclHost for TestHost {
    fn read_csr(&mut self, read: &Validated<CsrRead>) -> HostResult<u64> {
        Ok(self.csr(read.csr))
    }

    fn write_csr(&mut self, write: &Validated<CsrWrite>) -> HostResult<()> {
        self.take_budget()?;
        self.set_csr(write.csr, write.value);
        self.writes.push(**write);
        Ok(())
    }

    fn hfence(&mut self, fence: &Validated<FenceRequest>) -> HostResult<()> {
        self.take_budget()?;
        self.tlb.retain(|t| !fence.covers(t.kind, t.vmid, t.asid, t.page));
        self.fences.push(**fence);
        Ok(())
    }

    fn inject_interrupt(&mut self, request: &Validated<InterruptRequest>) -> HostResult<()> {
        self.take_budget()?;
        match **request {
            InterruptRequest::VsLocal { interrupt, .. } => {
                let field = interrupt.to_hvip_field().map_err(|_| HostError::Failed)?;
                let mut hvip = LocalRegisterCopy::<u64, hvip::Register>::new(self.csr(CSR_HVIP));
                hvip.modify(field);
                self.set_csr(CSR_HVIP, hvip.get());
            }
            InterruptRequest::GuestExternal { line, .. } => {
                self.set_csr(CSR_HGEIP, self.csr(CSR_HGEIP) | (1 << line));
            }
        }
        self.injected.push(**request);
        Ok(())
    }

    fn sret(&mut self, state: &Validated<TrapReturnState>) -> HostResult<()> {
        self.take_budget()?;
        self.srets.push(**state);
        Ok(())
    }
}
