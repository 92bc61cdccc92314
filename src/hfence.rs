// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Processing of the HFENCE list in the shared-memory area.

use arrayvec::ArrayVec;
use sbi_rs::{Error as SbiError, NACL_HFENCE_ALL, NACL_HFENCE_ENTRIES};

use crate::host::{FenceRequest, HostError, NaclHost};
use crate::shmem::{HfenceSlot, ShmemRegion};
use crate::validator::{self, AccessValidator, Validated};

/// Errors from processing HFENCE entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The entry index is beyond the end of the list.
    BadIndex(u64),
    /// A pending entry failed validation.
    Invalid(HfenceSlot, validator::Error),
    /// The host failed to perform a fence.
    Host(HostError),
}

impl From<Error> for SbiError {
    fn from(error: Error) -> SbiError {
        match error {
            Error::BadIndex(_) => SbiError::InvalidParam,
            Error::Invalid(_, e) => e.into(),
            Error::Host(e) => e.into(),
        }
    }
}

/// Holds the result of HFENCE processing.
pub type Result<T> = core::result::Result<T, Error>;

/// Which entries of the list to process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HfenceSelect {
    /// Every pending entry.
    All,
    /// A single entry.
    Entry(HfenceSlot),
}

impl HfenceSelect {
    /// Decodes the entry index passed to `SyncHfence`.
    pub fn from_raw(index: u64) -> Result<Self> {
        if index == NACL_HFENCE_ALL {
            return Ok(HfenceSelect::All);
        }
        HfenceSlot::new(index)
            .map(HfenceSelect::Entry)
            .ok_or(Error::BadIndex(index))
    }

    fn slots(self) -> impl Iterator<Item = HfenceSlot> {
        let single = match self {
            HfenceSelect::All => None,
            HfenceSelect::Entry(slot) => Some(slot),
        };
        HfenceSlot::all().filter(move |s| single.map_or(true, |only| only == *s))
    }
}

/// Validated fences waiting to be applied, along with the entries they came from.
pub type PendingFences = ArrayVec<(HfenceSlot, Validated<FenceRequest>), NACL_HFENCE_ENTRIES>;

/// Validates every pending entry selected by `select` without applying any of them.
pub fn validate_pending(
    region: &ShmemRegion,
    validator: &AccessValidator,
    select: HfenceSelect,
) -> Result<PendingFences> {
    let mut pending = PendingFences::new();
    for slot in select.slots() {
        let fence = validator
            .check_hfence(region.read_hfence(slot))
            .map_err(|e| Error::Invalid(slot, e))?;
        if let Some(fence) = fence {
            // There can't be more fences than entries in the list.
            pending.push((slot, fence));
        }
    }
    Ok(pending)
}

/// Performs the fences in `pending` in list order, clearing the pending bit of each entry once its
/// fence is complete. Returns the number of fences performed.
pub fn apply_pending<H: NaclHost>(
    region: &mut ShmemRegion,
    host: &mut H,
    pending: &PendingFences,
) -> Result<usize> {
    for (slot, fence) in pending.iter() {
        host.hfence(fence).map_err(Error::Host)?;
        region.clear_hfence_pending(*slot);
    }
    Ok(pending.len())
}

/// Validates and then performs the selected fences. Nothing is applied if any entry is invalid.
pub fn sync<H: NaclHost>(
    region: &mut ShmemRegion,
    validator: &AccessValidator,
    host: &mut H,
    select: HfenceSelect,
) -> Result<usize> {
    let pending = validate_pending(region, validator, select)?;
    apply_pending(region, host, &pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shmem::GuestMemory;
    use crate::test_stubs::{TestGuestMemory, TestHost};
    use sbi_rs::{HfenceEntry, HfenceKind, NACL_SHMEM_SIZE};

    fn map_region(mem: &TestGuestMemory) -> ShmemRegion {
        let ptr = mem.map(mem.base(), NACL_SHMEM_SIZE as u64).unwrap();
        unsafe { ShmemRegion::new(mem.base(), ptr) }.unwrap()
    }

    #[test]
    fn select_from_raw() {
        assert_eq!(HfenceSelect::from_raw(u64::MAX), Ok(HfenceSelect::All));
        assert_eq!(
            HfenceSelect::from_raw(3),
            Ok(HfenceSelect::Entry(HfenceSlot::new(3).unwrap()))
        );
        assert_eq!(
            HfenceSelect::from_raw(NACL_HFENCE_ENTRIES as u64),
            Err(Error::BadIndex(NACL_HFENCE_ENTRIES as u64))
        );
    }

    #[test]
    fn empty_list_is_noop() {
        let mem = TestGuestMemory::new();
        let mut region = map_region(&mem);
        let mut host = TestHost::new();
        let validator = AccessValidator::new(1);
        assert_eq!(
            sync(&mut region, &validator, &mut host, HfenceSelect::All),
            Ok(0)
        );
        assert!(host.fences().is_empty());
    }

    #[test]
    fn scoped_invalidation() {
        let mem = TestGuestMemory::new();
        let mut region = map_region(&mem);
        let mut host = TestHost::new();
        host.cache_translation(HfenceKind::Vvma, 1, 7, 0x100);
        host.cache_translation(HfenceKind::Vvma, 1, 7, 0x200);
        host.cache_translation(HfenceKind::Vvma, 1, 8, 0x100);
        host.cache_translation(HfenceKind::Gvma, 1, 0, 0x100);

        let shmem = mem.shmem(mem.base());
        shmem.push_hfence(HfenceEntry::new(HfenceKind::Vvma, 1, 7, 0x100, 1));
        let validator = AccessValidator::new(1);
        assert_eq!(
            sync(&mut region, &validator, &mut host, HfenceSelect::All),
            Ok(1)
        );
        assert!(!host.has_translation(HfenceKind::Vvma, 1, 7, 0x100));
        assert!(host.has_translation(HfenceKind::Vvma, 1, 7, 0x200));
        assert!(host.has_translation(HfenceKind::Vvma, 1, 8, 0x100));
        assert!(host.has_translation(HfenceKind::Gvma, 1, 0, 0x100));
        assert!(!shmem.hfence[0].is_pending());

        // All-zero fields flush every VS-stage translation.
        shmem.push_hfence(HfenceEntry::new(HfenceKind::Vvma, 0, 0, 0, 0));
        assert_eq!(
            sync(&mut region, &validator, &mut host, HfenceSelect::All),
            Ok(1)
        );
        assert!(!host.has_translation(HfenceKind::Vvma, 1, 7, 0x200));
        assert!(!host.has_translation(HfenceKind::Vvma, 1, 8, 0x100));
        assert!(host.has_translation(HfenceKind::Gvma, 1, 0, 0x100));
    }

    #[test]
    fn invalid_entry_applies_nothing() {
        let mem = TestGuestMemory::new();
        let mut region = map_region(&mem);
        let mut host = TestHost::new();
        let shmem = mem.shmem(mem.base());
        shmem.push_hfence(HfenceEntry::new(HfenceKind::Gvma, 1, 0, 0, 0));
        // G-stage fences can't be scoped by ASID.
        shmem.push_hfence(HfenceEntry::new(HfenceKind::Gvma, 1, 3, 0, 0));
        let validator = AccessValidator::new(1);
        let result = sync(&mut region, &validator, &mut host, HfenceSelect::All);
        assert!(matches!(result, Err(Error::Invalid(slot, _)) if slot.index() == 1));
        assert!(host.fences().is_empty());
        assert!(shmem.hfence[0].is_pending());

        // Only the selected entry is looked at.
        let select = HfenceSelect::from_raw(0).unwrap();
        assert_eq!(sync(&mut region, &validator, &mut host, select), Ok(1));
        assert!(shmem.hfence[1].is_pending());
        assert_eq!(SbiError::from(result.unwrap_err()), SbiError::Denied);
    }

    #[test]
    fn host_failure_leaves_remaining_pending() {
        let mem = TestGuestMemory::new();
        let mut region = map_region(&mem);
        let mut host = TestHost::new();
        host.fail_after(1);
        let shmem = mem.shmem(mem.base());
        shmem.push_hfence(HfenceEntry::new(HfenceKind::Gvma, 1, 0, 0, 0));
        shmem.push_hfence(HfenceEntry::new(HfenceKind::Gvma, 2, 0, 0, 0));
        let validator = AccessValidator::new(1);
        assert_eq!(
            sync(&mut region, &validator, &mut host, HfenceSelect::All),
            Err(Error::Host(HostError::Io))
        );
        assert!(!shmem.hfence[0].is_pending());
        assert!(shmem.hfence[1].is_pending());
        host.fail_after(u64::MAX);
        assert_eq!(
            sync(&mut region, &validator, &mut host, HfenceSelect::All),
            Ok(1)
        );
    }
}
