// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The host's view of a hart's NACL shared-memory area. The area stays writable by the guest
//! hypervisor, so all accesses are volatile and everything read out of it is `Untrusted`.

use core::ptr::{addr_of, addr_of_mut, NonNull};
use riscv_regs::dma_rmb;
use sbi_rs::{AutoswapContext, Error as SbiError, HfenceEntry, NaclShmem, SretContext};
use sbi_rs::{NACL_DIRTY_BITMAP_WORDS, NACL_HFENCE_ENTRIES, NACL_SHMEM_SIZE};

use crate::csr_table::CsrSlot;
use crate::validator::Untrusted;

/// Errors from mapping guest physical memory into the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuestMemoryError {
    /// The guest physical address isn't backed by guest memory.
    Unmapped(u64),
    /// The mapping failed temporarily; the caller may retry.
    Transient,
    /// The host ran out of memory creating the mapping.
    OutOfMemory,
}

impl From<GuestMemoryError> for SbiError {
    fn from(error: GuestMemoryError) -> SbiError {
        match error {
            GuestMemoryError::Unmapped(_) => SbiError::InvalidAddress,
            GuestMemoryError::Transient => SbiError::Io,
            GuestMemoryError::OutOfMemory => SbiError::OutOfMemory,
        }
    }
}

/// Maps the guest hypervisor's physical memory into the host's address space.
pub trait GuestMemory {
    /// Maps `len` bytes at guest physical address `gpa`. The mapping remains valid until `unmap`
    /// is called with the same range.
    fn map(&self, gpa: u64, len: u64) -> Result<NonNull<u8>, GuestMemoryError>;

    /// Releases a mapping returned by `map`.
    fn unmap(&self, gpa: u64, len: u64);
}

/// Index of an entry in the HFENCE list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct HfenceSlot(u8);

impl HfenceSlot {
    /// Returns the slot at `index` if it's within the HFENCE list.
    pub fn new(index: u64) -> Option<Self> {
        (index < NACL_HFENCE_ENTRIES as u64).then_some(HfenceSlot(index as u8))
    }

    /// Returns an iterator over every slot in the list.
    pub fn all() -> impl Iterator<Item = HfenceSlot> {
        (0..NACL_HFENCE_ENTRIES as u8).map(HfenceSlot)
    }

    /// Returns the index of the entry.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A hart's shared-memory area, mapped into the host.
pub struct ShmemRegion {
    gpa: u64,
    ptr: NonNull<NaclShmem>,
}

// Safety: The region is only accessed from the hart that owns it, with the hart's lock held.
unsafe impl Send for ShmemRegion {}

impl ShmemRegion {
    /// Creates a region for the area at `gpa`, mapped at `ptr`. Returns `None` if `ptr` isn't
    /// suitably aligned.
    ///
    /// # Safety
    ///
    /// `ptr` must map `NACL_SHMEM_SIZE` bytes of guest memory that remain mapped for the lifetime
    /// of the region. Only the guest hypervisor may access the memory concurrently.
    pub unsafe fn new(gpa: u64, ptr: NonNull<u8>) -> Option<Self> {
        if ptr.as_ptr().align_offset(core::mem::align_of::<NaclShmem>()) != 0 {
            return None;
        }
        Some(Self {
            gpa,
            ptr: ptr.cast(),
        })
    }

    /// Returns the guest physical address of the area.
    pub fn gpa(&self) -> u64 {
        self.gpa
    }

    /// Returns true if `len` bytes at `gpa` intersect the area.
    pub fn overlaps(&self, gpa: u64, len: u64) -> bool {
        ranges_overlap(self.gpa, NACL_SHMEM_SIZE as u64, gpa, len)
    }

    /// Zero-fills the whole area.
    pub fn zero(&mut self) {
        // Safety: `ptr` maps a full `NaclShmem` per the contract of `new`.
        unsafe { core::ptr::write_bytes(self.ptr.as_ptr(), 0, 1) };
    }

    fn shmem(&self) -> *mut NaclShmem {
        self.ptr.as_ptr()
    }

    /// Returns word `index` of the dirty bitmap. Slot values read after this are ordered after
    /// the read of the bitmap.
    pub fn dirty_word(&self, index: usize) -> u64 {
        let index = index.min(NACL_DIRTY_BITMAP_WORDS - 1);
        // Safety: `index` is within the bitmap and `ptr` is valid per the contract of `new`.
        let word = unsafe { addr_of!((*self.shmem()).dirty_bitmap[index]).read_volatile() };
        dma_rmb();
        word
    }

    /// Sets the dirty bit for `slot`.
    pub fn set_dirty(&mut self, slot: CsrSlot) {
        self.update_dirty(slot, |word, bit| word | bit);
    }

    /// Clears the dirty bit for `slot`.
    pub fn clear_dirty(&mut self, slot: CsrSlot) {
        self.update_dirty(slot, |word, bit| word & !bit);
    }

    fn update_dirty(&mut self, slot: CsrSlot, op: impl FnOnce(u64, u64) -> u64) {
        let index = slot.index();
        // Safety: `CsrSlot` indices are within the CSR array, so `index / 64` is within the
        // bitmap.
        unsafe {
            let word = addr_of_mut!((*self.shmem()).dirty_bitmap[index / 64]);
            word.write_volatile(op(word.read_volatile(), 1 << (index % 64)));
        }
    }

    /// Clears the entire dirty bitmap.
    pub fn clear_dirty_bitmap(&mut self) {
        for i in 0..NACL_DIRTY_BITMAP_WORDS {
            // Safety: `i` is within the bitmap.
            unsafe { addr_of_mut!((*self.shmem()).dirty_bitmap[i]).write_volatile(0) };
        }
    }

    /// Reads the value in `slot`.
    pub fn read_csr_slot(&self, slot: CsrSlot) -> Untrusted<u64> {
        // Safety: `CsrSlot` indices are within the CSR array.
        let val = unsafe { addr_of!((*self.shmem()).csrs[slot.index()]).read_volatile() };
        Untrusted::new(val)
    }

    /// Reads the HFENCE list entry in `slot`. The range is read after the config word.
    pub fn read_hfence(&self, slot: HfenceSlot) -> Untrusted<HfenceEntry> {
        // Safety: `HfenceSlot` indices are within the list.
        let entry = unsafe {
            let entry_ptr = addr_of!((*self.shmem()).hfence[slot.index()]);
            let config = addr_of!((*entry_ptr).config).read_volatile();
            dma_rmb();
            let mut entry = entry_ptr.read_volatile();
            entry.config = config;
            entry
        };
        Untrusted::new(entry)
    }

    /// Marks the HFENCE list entry in `slot` as processed.
    pub fn clear_hfence_pending(&mut self, slot: HfenceSlot) {
        // Safety: `HfenceSlot` indices are within the list.
        unsafe {
            let config = addr_of_mut!((*self.shmem()).hfence[slot.index()].config);
            config.write_volatile(config.read_volatile() & !HfenceEntry::PENDING);
        }
    }

    /// Reads the `sret` context.
    pub fn read_sret(&self) -> Untrusted<SretContext> {
        // Safety: `ptr` is valid per the contract of `new`.
        Untrusted::new(unsafe { addr_of!((*self.shmem()).sret).read_volatile() })
    }

    /// Reads the auto-swap context.
    pub fn read_autoswap(&self) -> Untrusted<AutoswapContext> {
        // Safety: `ptr` is valid per the contract of `new`.
        Untrusted::new(unsafe { addr_of!((*self.shmem()).autoswap).read_volatile() })
    }

    /// Stores `hstatus` into the auto-swap context, handing the host's previous value back to
    /// the guest hypervisor.
    pub fn write_autoswap_hstatus(&mut self, hstatus: u64) {
        let offset = AutoswapContext::hstatus_offset();
        // Safety: `hstatus_offset` is within the auto-swap context and is 8-byte aligned.
        unsafe {
            let base = addr_of_mut!((*self.shmem()).autoswap) as *mut u8;
            (base.add(offset) as *mut u64).write_volatile(hstatus);
        }
    }
}

/// Returns true if `[a, a + a_len)` and `[b, b + b_len)` intersect.
pub fn ranges_overlap(a: u64, a_len: u64, b: u64, b_len: u64) -> bool {
    let a_end = a.saturating_add(a_len);
    let b_end = b.saturating_add(b_len);
    a < b_end && b < a_end
}
