// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use sbi_rs::NACL_DIRTY_BITMAP_WORDS;

use crate::csr_table::CsrSlot;
use crate::shmem::ShmemRegion;
use crate::validator::Untrusted;

/// Number of CSR slots selected by each bit of a `SyncMask`.
pub const SLOTS_PER_GROUP: usize = 8;
const GROUPS_PER_WORD: usize = 64 / SLOTS_PER_GROUP;

/// The 128-bit slot selection passed to `SyncCsr`. Bit `k` selects slots `8k` to `8k + 7`; an
/// all-zero mask selects every slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncMask {
    lo: u64,
    hi: u64,
}

impl SyncMask {
    /// Creates a mask from the two halves passed in a0 and a1.
    pub fn new(lo: u64, hi: u64) -> Self {
        Self { lo, hi }
    }

    /// Returns a mask selecting every slot.
    pub fn all() -> Self {
        Self::default()
    }

    /// Returns true if the mask selects every slot.
    pub fn is_all(&self) -> bool {
        self.lo == 0 && self.hi == 0
    }

    fn raw(&self) -> u128 {
        (self.hi as u128) << 64 | self.lo as u128
    }

    /// Returns true if the mask selects a group of slots at or beyond `num_slots`.
    pub fn exceeds(&self, num_slots: usize) -> bool {
        let groups = (num_slots + SLOTS_PER_GROUP - 1) / SLOTS_PER_GROUP;
        groups < 128 && self.raw() >> groups != 0
    }

    /// Returns true if `slot` is selected.
    pub fn selects(&self, slot: CsrSlot) -> bool {
        self.is_all() || self.raw() & (1 << (slot.index() / SLOTS_PER_GROUP)) != 0
    }

    // Expands the groups covering dirty bitmap word `word` into a bit per slot.
    fn word_mask(&self, word: usize) -> u64 {
        if self.is_all() {
            return u64::MAX;
        }
        let groups = (self.raw() >> (word * GROUPS_PER_WORD)) as u64 & 0xff;
        (0..GROUPS_PER_WORD)
            .filter(|g| groups & (1 << g) != 0)
            .fold(0, |mask, g| mask | 0xff << (g * SLOTS_PER_GROUP))
    }
}

/// Iterator over a snapshot of the dirty bitmap.
pub struct DirtySlots {
    words: [u64; NACL_DIRTY_BITMAP_WORDS],
    word_index: usize,
}

impl Iterator for DirtySlots {
    type Item = CsrSlot;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let word = self.words.get_mut(self.word_index)?;
            if *word == 0 {
                self.word_index += 1;
                continue;
            }
            let bit = word.trailing_zeros() as usize;
            *word &= !(1 << bit);
            // Bitmap indices are always valid slots.
            return CsrSlot::new(self.word_index * 64 + bit);
        }
    }
}

/// Tracks which CSR slots the guest hypervisor has written since they were last synchronized.
pub struct DirtyTracker<'a> {
    region: &'a mut ShmemRegion,
}

impl<'a> DirtyTracker<'a> {
    /// Creates a tracker over the bitmap in `region`.
    pub fn new(region: &'a mut ShmemRegion) -> Self {
        Self { region }
    }

    /// Marks `slot` as written.
    pub fn mark_dirty(&mut self, slot: CsrSlot) {
        self.region.set_dirty(slot);
    }

    /// Returns true if `slot` has been written and not yet consumed.
    pub fn is_dirty(&self, slot: CsrSlot) -> bool {
        self.region.dirty_word(slot.index() / 64) & (1 << (slot.index() % 64)) != 0
    }

    /// Returns the value the guest hypervisor stored in `slot`.
    pub fn value(&self, slot: CsrSlot) -> Untrusted<u64> {
        self.region.read_csr_slot(slot)
    }

    /// Returns the dirty slots selected by `mask`, in ascending order.
    pub fn dirty_slots(&self, mask: SyncMask) -> DirtySlots {
        let mut words = [0; NACL_DIRTY_BITMAP_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.region.dirty_word(i) & mask.word_mask(i);
        }
        DirtySlots {
            words,
            word_index: 0,
        }
    }

    /// Passes each dirty slot selected by `mask` to `apply`, clearing its dirty bit once `apply`
    /// succeeds. Stops at the first error, leaving the failed slot and all following slots dirty.
    /// Returns the number of slots consumed.
    pub fn consume<E, F>(&mut self, mask: SyncMask, mut apply: F) -> Result<usize, E>
    where
        F: FnMut(CsrSlot, Untrusted<u64>) -> Result<(), E>,
    {
        let mut count = 0;
        for slot in self.dirty_slots(mask) {
            apply(slot, self.region.read_csr_slot(slot))?;
            self.region.clear_dirty(slot);
            count += 1;
        }
        Ok(count)
    }

    /// Drops every pending write.
    pub fn discard_all(&mut self) {
        self.region.clear_dirty_bitmap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr_table::CSR_TABLE_LEN;
    use crate::shmem::GuestMemory;
    use crate::test_stubs::TestGuestMemory;
    use riscv_regs::{CSR_HGATP, CSR_HGEIP, CSR_HSTATUS, CSR_VSSTATUS};
    use sbi_rs::NACL_SHMEM_SIZE;
    use std::vec::Vec;

    fn map_region(mem: &TestGuestMemory) -> ShmemRegion {
        let ptr = mem.map(mem.base(), NACL_SHMEM_SIZE as u64).unwrap();
        unsafe { ShmemRegion::new(mem.base(), ptr) }.unwrap()
    }

    #[test]
    fn mask_selection() {
        let hgatp = CsrSlot::for_csr(CSR_HGATP);
        assert!(SyncMask::all().selects(hgatp));
        // hgatp is slot 0x180, in group 0x30.
        assert!(SyncMask::new(1 << 0x30, 0).selects(hgatp));
        assert!(!SyncMask::new(1, 0).selects(hgatp));
        // hgeip is slot 0x312, in group 0x62.
        assert!(SyncMask::new(0, 1 << (0x62 - 64)).selects(CsrSlot::for_csr(CSR_HGEIP)));
        assert!(!SyncMask::all().exceeds(CSR_TABLE_LEN));
        assert!(!SyncMask::new(0, 1 << 54).exceeds(CSR_TABLE_LEN));
        assert!(SyncMask::new(0, 1 << 55).exceeds(CSR_TABLE_LEN));
        assert_eq!(SyncMask::new(0b101, 0).word_mask(0), 0xff_00ff);
        assert_eq!(SyncMask::new(0b101, 0).word_mask(1), 0);
    }

    #[test]
    fn consume_in_order() {
        let mem = TestGuestMemory::new();
        let mut region = map_region(&mem);
        let shmem = mem.shmem(mem.base());
        shmem.write_csr(CSR_HGATP, 3);
        shmem.write_csr(CSR_VSSTATUS, 1);
        shmem.write_csr(CSR_HSTATUS, 2);

        let mut tracker = DirtyTracker::new(&mut region);
        let mut seen = Vec::new();
        let count = tracker
            .consume(SyncMask::all(), |slot, val| -> Result<(), ()> {
                seen.push((slot.index(), val));
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            seen,
            [
                (0x000, Untrusted::new(1)),
                (0x100, Untrusted::new(2)),
                (0x180, Untrusted::new(3))
            ]
        );
        assert_eq!(tracker.dirty_slots(SyncMask::all()).count(), 0);
        // A clean bitmap is a no-op.
        assert_eq!(tracker.consume(SyncMask::all(), |_, _| Err(())), Ok(0));
    }

    #[test]
    fn consume_stops_on_error() {
        let mem = TestGuestMemory::new();
        let mut region = map_region(&mem);
        let shmem = mem.shmem(mem.base());
        shmem.write_csr(CSR_VSSTATUS, 1);
        shmem.write_csr(CSR_HSTATUS, 2);
        shmem.write_csr(CSR_HGATP, 3);

        let mut tracker = DirtyTracker::new(&mut region);
        let result = tracker.consume(SyncMask::all(), |slot, _| {
            if slot == CsrSlot::for_csr(CSR_HSTATUS) {
                Err(slot)
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err(CsrSlot::for_csr(CSR_HSTATUS)));
        assert!(!tracker.is_dirty(CsrSlot::for_csr(CSR_VSSTATUS)));
        assert!(tracker.is_dirty(CsrSlot::for_csr(CSR_HSTATUS)));
        assert!(tracker.is_dirty(CsrSlot::for_csr(CSR_HGATP)));

        // Retrying only touches what's left.
        assert_eq!(
            tracker.consume(SyncMask::all(), |_, _| -> Result<(), ()> { Ok(()) }),
            Ok(2)
        );
    }

    #[test]
    fn masked_consume_and_discard() {
        let mem = TestGuestMemory::new();
        let mut region = map_region(&mem);
        let shmem = mem.shmem(mem.base());
        shmem.write_csr(CSR_VSSTATUS, 1);
        shmem.write_csr(CSR_HGATP, 3);

        let mut tracker = DirtyTracker::new(&mut region);
        // Group 0 only covers vsstatus.
        let count = tracker
            .consume(SyncMask::new(1, 0), |_, _| -> Result<(), ()> { Ok(()) })
            .unwrap();
        assert_eq!(count, 1);
        assert!(tracker.is_dirty(CsrSlot::for_csr(CSR_HGATP)));
        tracker.mark_dirty(CsrSlot::for_csr(CSR_HSTATUS));
        assert_eq!(tracker.dirty_slots(SyncMask::all()).count(), 2);
        tracker.discard_all();
        assert_eq!(tracker.dirty_slots(SyncMask::all()).count(), 0);
    }
}
