// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Layout of the per-hart shared-memory area used by the NACL extension. The area is written by
//! the guest hypervisor and read back by the host, so every structure here is plain `repr(C)`
//! data at a fixed offset.

use core::ptr::{addr_of, addr_of_mut};
use memoffset::offset_of;
use riscv_regs::{dma_wmb, GeneralPurposeRegisters, GprIndex};
use static_assertions::{const_assert, const_assert_eq};

/// Number of bytes in the scratch area preceeding the CSR array.
pub const NACL_SCRATCH_BYTES: usize = 4096;
/// Number of CSR slots in the CSR array.
pub const NACL_CSR_SLOTS: usize = 1024;
/// Number of 64-bit words in the dirty bitmap.
pub const NACL_DIRTY_BITMAP_WORDS: usize = NACL_CSR_SLOTS / 64;
/// Total size of the shared-memory area in bytes.
pub const NACL_SHMEM_SIZE: usize = NACL_SCRATCH_BYTES + NACL_CSR_SLOTS * 8;
/// Required alignment of the shared-memory area in guest physical memory.
pub const NACL_SHMEM_ALIGN: u64 = 4096;
/// Number of entries in the HFENCE list.
pub const NACL_HFENCE_ENTRIES: usize = 56;

const NACL_SRET_WORDS: usize = 64;
const NACL_AUTOSWAP_WORDS: usize = 16;

/// Register state that the host loads when emulating `sret` on behalf of the guest hypervisor.
///
/// Word 0 is a header (the slot `x0` would occupy), words 1-31 hold `x1`-`x31` and are followed by
/// `sepc` and `sstatus`. The remaining words are reserved. `hstatus` is exchanged through the
/// `AutoswapContext` instead.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SretContext {
    words: [u64; NACL_SRET_WORDS],
}

impl SretContext {
    const HEADER: usize = 0;
    const SEPC: usize = 32;
    const SSTATUS: usize = 33;

    /// Header bit set by the guest hypervisor once the context has been filled in.
    pub const POPULATED: u64 = 1 << 0;
    /// Header bits that must be zero.
    pub const HEADER_RESERVED: u64 = !Self::POPULATED;

    /// Builds a populated context.
    pub fn new(gprs: &GeneralPurposeRegisters, sepc: u64, sstatus: u64) -> Self {
        let mut words = [0; NACL_SRET_WORDS];
        words[1..32].copy_from_slice(&gprs.as_raw()[1..32]);
        words[Self::HEADER] = Self::POPULATED;
        words[Self::SEPC] = sepc;
        words[Self::SSTATUS] = sstatus;
        Self { words }
    }

    /// Returns the raw header word.
    pub fn header(&self) -> u64 {
        self.words[Self::HEADER]
    }

    /// Returns true if the guest hypervisor has filled in this context.
    pub fn is_populated(&self) -> bool {
        self.header() & Self::POPULATED != 0
    }

    /// Returns the saved value of `reg`. `x0` always reads as zero.
    pub fn gpr(&self, reg: GprIndex) -> u64 {
        match reg {
            GprIndex::Zero => 0,
            r => self.words[r as usize],
        }
    }

    /// Returns the saved general purpose registers.
    pub fn gprs(&self) -> GeneralPurposeRegisters {
        let mut raw = [0; 32];
        raw.copy_from_slice(&self.words[..32]);
        GeneralPurposeRegisters::from_raw(raw)
    }

    /// Returns the address `sret` returns to.
    pub fn sepc(&self) -> u64 {
        self.words[Self::SEPC]
    }

    /// Returns the `sstatus` value to restore.
    pub fn sstatus(&self) -> u64 {
        self.words[Self::SSTATUS]
    }

    /// Returns the words following `sstatus`, which must be zero.
    pub fn reserved(&self) -> &[u64] {
        &self.words[Self::SSTATUS + 1..]
    }
}

impl Default for SretContext {
    fn default() -> Self {
        Self {
            words: [0; NACL_SRET_WORDS],
        }
    }
}

/// CSRs that are swapped with the host's copy when the guest hypervisor requests an `sret` with
/// auto-swap.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AutoswapContext {
    words: [u64; NACL_AUTOSWAP_WORDS],
}

impl AutoswapContext {
    const FLAGS: usize = 0;
    const HSTATUS: usize = 1;

    /// Flag indicating the `hstatus` word is valid and should be swapped.
    pub const HSTATUS_VALID: u64 = 1 << 0;

    /// Builds a context that swaps `hstatus`.
    pub fn with_hstatus(hstatus: u64) -> Self {
        let mut ctx = Self::default();
        ctx.words[Self::FLAGS] = Self::HSTATUS_VALID;
        ctx.words[Self::HSTATUS] = hstatus;
        ctx
    }

    /// Returns the raw flags word.
    pub fn flags(&self) -> u64 {
        self.words[Self::FLAGS]
    }

    /// Returns the `hstatus` value to swap in.
    pub fn hstatus(&self) -> u64 {
        self.words[Self::HSTATUS]
    }

    /// Byte offset of the `hstatus` word within the context.
    pub const fn hstatus_offset() -> usize {
        Self::HSTATUS * 8
    }
}

/// The scope of an HFENCE request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HfenceKind {
    /// `hfence.vvma`: VS-stage translations, scoped by guest virtual address and ASID.
    Vvma = 0,
    /// `hfence.gvma`: G-stage translations, scoped by guest physical address.
    Gvma = 1,
}

impl HfenceKind {
    /// Returns the kind encoded by `raw`, if any.
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(HfenceKind::Vvma),
            1 => Some(HfenceKind::Gvma),
            _ => None,
        }
    }
}

/// One entry of the HFENCE list. The guest hypervisor fills in the page range before setting the
/// pending bit in `config`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HfenceEntry {
    /// Pending bit, kind, VMID and ASID.
    pub config: u64,
    /// First 4kB page number of the range. Zero together with a zero `page_count` means all
    /// addresses.
    pub page_num: u64,
    /// Number of pages in the range, zero for all addresses.
    pub page_count: u64,
    _reserved: u64,
}

impl HfenceEntry {
    /// Set while the entry awaits processing by the host.
    pub const PENDING: u64 = 1 << 63;
    const KIND_SHIFT: u64 = 56;
    const KIND_MASK: u64 = 0xf;
    const VMID_SHIFT: u64 = 32;
    const VMID_MASK: u64 = 0x3fff;
    const ASID_MASK: u64 = 0xffff;
    /// Bits of `config` that must be zero.
    pub const CONFIG_RESERVED: u64 = !(Self::PENDING
        | (Self::KIND_MASK << Self::KIND_SHIFT)
        | (Self::VMID_MASK << Self::VMID_SHIFT)
        | Self::ASID_MASK);

    /// Creates a pending entry. Zero `vmid`, `asid` or `page_count` acts as a wildcard.
    pub fn new(kind: HfenceKind, vmid: u16, asid: u16, page_num: u64, page_count: u64) -> Self {
        let config = Self::PENDING
            | (((kind as u64) & Self::KIND_MASK) << Self::KIND_SHIFT)
            | (((vmid as u64) & Self::VMID_MASK) << Self::VMID_SHIFT)
            | ((asid as u64) & Self::ASID_MASK);
        Self {
            config,
            page_num,
            page_count,
            _reserved: 0,
        }
    }

    /// Returns true if the entry is waiting to be processed.
    pub fn is_pending(&self) -> bool {
        self.config & Self::PENDING != 0
    }

    /// Returns the raw kind field.
    pub fn kind(&self) -> u64 {
        (self.config >> Self::KIND_SHIFT) & Self::KIND_MASK
    }

    /// Returns the VMID field.
    pub fn vmid(&self) -> u16 {
        ((self.config >> Self::VMID_SHIFT) & Self::VMID_MASK) as u16
    }

    /// Returns the ASID field.
    pub fn asid(&self) -> u16 {
        (self.config & Self::ASID_MASK) as u16
    }
}

/// Operation tags used in `BatchDescriptor::tag`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchTag {
    /// Reads the CSR numbered `arg0` into `arg1`.
    CsrRead = 1,
    /// Writes `arg1` to the CSR numbered `arg0`.
    CsrWrite = 2,
    /// Processes the HFENCE list entry at index `arg0`.
    Hfence = 3,
    /// Injects interrupt `arg0 & 0xffff_ffff` of kind `arg0 >> 32` into hart `arg1`.
    InjectInterrupt = 4,
}

impl BatchTag {
    /// Returns the tag encoded by `raw`, if any.
    pub fn from_raw(raw: u64) -> Option<Self> {
        use BatchTag::*;
        match raw {
            1 => Some(CsrRead),
            2 => Some(CsrWrite),
            3 => Some(Hfence),
            4 => Some(InjectInterrupt),
            _ => None,
        }
    }
}

/// One operation in a batch submitted with `NaclFunction::BatchExecute`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchDescriptor {
    /// One of `BatchTag`.
    pub tag: u64,
    /// First operand.
    pub arg0: u64,
    /// Second operand. Receives the value for reads.
    pub arg1: u64,
    /// Status written by the host: 0 on success or a negative SBI error code.
    pub ret: u64,
}

impl BatchDescriptor {
    /// Creates a descriptor for `tag`.
    pub fn new(tag: BatchTag, arg0: u64, arg1: u64) -> Self {
        Self {
            tag: tag as u64,
            arg0,
            arg1,
            ret: 0,
        }
    }

    /// Returns the status written back by the host as an SBI result.
    pub fn status(&self) -> crate::Result<()> {
        match self.ret as i64 {
            0 => Ok(()),
            e => Err(crate::Error::from_code(e)),
        }
    }
}

/// Layout of the shared-memory area registered with `SetShmem`.
#[repr(C)]
pub struct NaclShmem {
    /// Context loaded by `SyncSret`.
    pub sret: SretContext,
    /// Context swapped by `SyncSret` with the auto-swap flag.
    pub autoswap: AutoswapContext,
    _reserved0: [u64; 16],
    /// Pending HFENCE requests, processed by `SyncHfence`.
    pub hfence: [HfenceEntry; NACL_HFENCE_ENTRIES],
    _reserved1: [u64; 176],
    /// Bitmap indicating which CSRs in `csrs` have been written and not yet synchronized.
    pub dirty_bitmap: [u64; NACL_DIRTY_BITMAP_WORDS],
    /// Hypervisor and virtual-supervisor CSRs. The 12-bit CSR number is transformed into a 10-bit
    /// index by extracting bits `{csr[11:10], csr[7:0]}` since `csr[9:8]` is always 2'b10 for HS
    /// and VS CSRs.
    pub csrs: [u64; NACL_CSR_SLOTS],
}

const_assert_eq!(offset_of!(NaclShmem, sret), 0x000);
const_assert_eq!(offset_of!(NaclShmem, autoswap), 0x200);
const_assert_eq!(offset_of!(NaclShmem, hfence), 0x300);
const_assert_eq!(offset_of!(NaclShmem, dirty_bitmap), 0xf80);
const_assert_eq!(offset_of!(NaclShmem, csrs), NACL_SCRATCH_BYTES);
const_assert_eq!(core::mem::size_of::<NaclShmem>(), NACL_SHMEM_SIZE);
const_assert_eq!(core::mem::size_of::<HfenceEntry>(), 32);
const_assert_eq!(core::mem::size_of::<BatchDescriptor>(), 32);
const_assert!(NACL_SHMEM_SIZE as u64 % NACL_SHMEM_ALIGN == 0);

impl NaclShmem {
    /// Returns the index in `csrs` of the HS or VS CSR at `csr_num`.
    pub const fn csr_index(csr_num: u16) -> usize {
        (((csr_num & 0xc00) >> 2) | (csr_num & 0xff)) as usize
    }

    /// Writes `value` to the slot for `csr_num` and marks it dirty. The value is made visible
    /// before the dirty bit.
    pub fn write_csr(&mut self, csr_num: u16, value: u64) {
        let index = Self::csr_index(csr_num);
        // Safety: `index` is within `csrs` and `dirty_bitmap` by construction of `csr_index` and
        // both pointers are derived from `&mut self`.
        unsafe {
            addr_of_mut!(self.csrs[index]).write_volatile(value);
            dma_wmb();
            let word = addr_of_mut!(self.dirty_bitmap[index / 64]);
            word.write_volatile(word.read_volatile() | (1 << (index % 64)));
        }
    }

    /// Returns the current value of the slot for `csr_num`.
    pub fn read_csr(&self, csr_num: u16) -> u64 {
        // Safety: `csr_index` is within bounds and the pointer is derived from `&self`.
        unsafe { addr_of!(self.csrs[Self::csr_index(csr_num)]).read_volatile() }
    }

    /// Returns true if the slot for `csr_num` awaits synchronization.
    pub fn is_csr_dirty(&self, csr_num: u16) -> bool {
        let index = Self::csr_index(csr_num);
        // Safety: `index / 64` is within bounds and the pointer is derived from `&self`.
        let word = unsafe { addr_of!(self.dirty_bitmap[index / 64]).read_volatile() };
        word & (1 << (index % 64)) != 0
    }

    /// Queues `entry` in the first free slot of the HFENCE list and returns its index, or `None`
    /// if every slot is still pending.
    pub fn push_hfence(&mut self, entry: HfenceEntry) -> Option<usize> {
        let index = self.hfence.iter().position(|e| !e.is_pending())?;
        let slot = &mut self.hfence[index];
        slot.page_num = entry.page_num;
        slot.page_count = entry.page_count;
        dma_wmb();
        // Safety: `slot` is a valid, exclusively borrowed entry.
        unsafe { addr_of_mut!(slot.config).write_volatile(entry.config | HfenceEntry::PENDING) };
        Some(index)
    }
}

impl Default for NaclShmem {
    fn default() -> Self {
        Self {
            sret: SretContext::default(),
            autoswap: AutoswapContext::default(),
            _reserved0: [0; 16],
            hfence: [HfenceEntry::default(); NACL_HFENCE_ENTRIES],
            _reserved1: [0; 176],
            dirty_bitmap: [0; NACL_DIRTY_BITMAP_WORDS],
            csrs: [0; NACL_CSR_SLOTS],
        }
    }
}
