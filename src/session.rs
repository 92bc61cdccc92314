// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use core::ptr::NonNull;
use sbi_rs::{Error as SbiError, NaclMode};
use sbi_rs::{NACL_MODE_FLAG_LOCK, NACL_SHMEM_ALIGN, NACL_SHMEM_FLAG_NO_CLEAR, NACL_SHMEM_SIZE};

use crate::config::NaclConfig;
use crate::dirty::DirtyTracker;
use crate::shmem::{GuestMemory, GuestMemoryError, ShmemRegion};

/// Errors from managing a hart's shared-memory session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The area isn't aligned to `NACL_SHMEM_ALIGN`.
    Misaligned(u64),
    /// The area isn't `NACL_SHMEM_SIZE` bytes.
    SizeMismatch(u64),
    /// Unknown `SetShmem` flags.
    InvalidFlags(u64),
    /// An area is already registered for the hart.
    AlreadyEstablished,
    /// The area intersects the area registered by another hart.
    Overlap(u64),
    /// The area couldn't be mapped.
    Map(GuestMemoryError),
    /// The area was mapped at an address that can't hold a `NaclShmem`.
    BadMapping(u64),
    /// No area is registered for the hart.
    NoSession,
    /// Unknown mode or `SetMode` flags.
    InvalidMode(u64),
    /// The mode has been locked.
    ModeLocked,
}

impl From<Error> for SbiError {
    fn from(error: Error) -> SbiError {
        use Error::*;
        match error {
            Misaligned(_) | Overlap(_) => SbiError::InvalidAddress,
            SizeMismatch(_) | InvalidFlags(_) | InvalidMode(_) => SbiError::InvalidParam,
            AlreadyEstablished => SbiError::AlreadyAvailable,
            Map(e) => e.into(),
            BadMapping(_) => SbiError::Failed,
            NoSession => SbiError::NoShmem,
            ModeLocked => SbiError::DeniedLocked,
        }
    }
}

/// Holds the result of a session operation.
pub type Result<T> = core::result::Result<T, Error>;

/// A hart's shared-memory registration and operating mode.
#[derive(Default)]
pub struct Session {
    region: Option<ShmemRegion>,
    mode: NaclMode,
    mode_locked: bool,
}

impl Session {
    /// Creates a session with no area registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if an area is registered.
    pub fn is_established(&self) -> bool {
        self.region.is_some()
    }

    /// Returns the guest physical address of the registered area.
    pub fn gpa(&self) -> Option<u64> {
        self.region.as_ref().map(|r| r.gpa())
    }

    /// Returns the registered area.
    pub fn region(&self) -> Result<&ShmemRegion> {
        self.region.as_ref().ok_or(Error::NoSession)
    }

    /// Returns the registered area for modification.
    pub fn region_mut(&mut self) -> Result<&mut ShmemRegion> {
        self.region.as_mut().ok_or(Error::NoSession)
    }

    /// Checks the parameters of a `SetShmem` call without changing any state.
    pub fn check_establish(&self, gpa: u64, size: u64, flags: u64) -> Result<()> {
        if gpa % NACL_SHMEM_ALIGN != 0 {
            return Err(Error::Misaligned(gpa));
        }
        if size != NACL_SHMEM_SIZE as u64 {
            return Err(Error::SizeMismatch(size));
        }
        if flags & !NACL_SHMEM_FLAG_NO_CLEAR != 0 {
            return Err(Error::InvalidFlags(flags));
        }
        if self.is_established() {
            return Err(Error::AlreadyEstablished);
        }
        Ok(())
    }

    /// Maps the area at `gpa` and makes it the hart's shared memory. The area is zeroed unless
    /// `NACL_SHMEM_FLAG_NO_CLEAR` is set in `flags`. On failure the session is unchanged.
    pub fn establish<M: GuestMemory + ?Sized>(
        &mut self,
        gpa: u64,
        size: u64,
        flags: u64,
        mem: &M,
    ) -> Result<()> {
        self.check_establish(gpa, size, flags)?;
        let ptr = mem.map(gpa, size).map_err(Error::Map)?;
        let region = match Self::region_at(gpa, ptr) {
            Some(r) => r,
            None => {
                mem.unmap(gpa, size);
                return Err(Error::BadMapping(gpa));
            }
        };
        let region = self.region.insert(region);
        if flags & NACL_SHMEM_FLAG_NO_CLEAR == 0 {
            region.zero();
        }
        Ok(())
    }

    fn region_at(gpa: u64, ptr: NonNull<u8>) -> Option<ShmemRegion> {
        // Safety: `GuestMemory::map` returned a mapping of `NACL_SHMEM_SIZE` bytes that stays
        // valid until `teardown` unmaps it, after the region has been dropped.
        unsafe { ShmemRegion::new(gpa, ptr) }
    }

    /// Discards any unsynchronized CSR writes and unmaps the area. Returns the address of the
    /// area that was unmapped, or `None` if no area was registered.
    pub fn teardown<M: GuestMemory + ?Sized>(&mut self, mem: &M) -> Option<u64> {
        let mut region = self.region.take()?;
        DirtyTracker::new(&mut region).discard_all();
        let gpa = region.gpa();
        drop(region);
        mem.unmap(gpa, NACL_SHMEM_SIZE as u64);
        Some(gpa)
    }

    /// Returns the current operating mode.
    pub fn mode(&self) -> NaclMode {
        self.mode
    }

    /// Returns true if the mode can no longer be changed.
    pub fn mode_locked(&self) -> bool {
        self.mode_locked
    }

    /// Changes the operating mode, locking it if `NACL_MODE_FLAG_LOCK` is set.
    pub fn set_mode(&mut self, mode: u64, flags: u64) -> Result<()> {
        if self.mode_locked {
            return Err(Error::ModeLocked);
        }
        if flags & !NACL_MODE_FLAG_LOCK != 0 {
            return Err(Error::InvalidMode(flags));
        }
        self.mode = NaclMode::from_raw(mode).ok_or(Error::InvalidMode(mode))?;
        self.mode_locked = flags & NACL_MODE_FLAG_LOCK != 0;
        Ok(())
    }

    /// Returns the mode to the default and unlocks it.
    pub fn reset_mode(&mut self) {
        self.mode = NaclMode::default();
        self.mode_locked = false;
    }
}

/// Returns the packed version reported by `GetVersion`.
pub fn query_version(config: &NaclConfig) -> u64 {
    config.version.to_raw()
}

/// Returns the version of `feature_id`, or 0 if it's unknown or disabled.
pub fn query_feature(config: &NaclConfig, feature_id: u64) -> u64 {
    config.feature_version(feature_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureSet;
    use crate::test_stubs::TestGuestMemory;
    use riscv_regs::CSR_HGATP;
    use sbi_rs::{NaclFeature, NaclVersion};

    const SIZE: u64 = NACL_SHMEM_SIZE as u64;

    #[test]
    fn establish_and_teardown() {
        let mem = TestGuestMemory::new();
        let gpa = mem.base();
        mem.shmem(gpa).write_csr(CSR_HGATP, 0x1234);

        let mut session = Session::new();
        assert!(session.region().is_err());
        session.establish(gpa, SIZE, 0, &mem).unwrap();
        assert_eq!(session.gpa(), Some(gpa));
        // The area is cleared on registration.
        assert_eq!(mem.shmem(gpa).read_csr(CSR_HGATP), 0);
        assert_eq!(
            session.establish(gpa, SIZE, 0, &mem),
            Err(Error::AlreadyEstablished)
        );

        mem.shmem(gpa).write_csr(CSR_HGATP, 0x5678);
        assert_eq!(session.teardown(&mem), Some(gpa));
        assert!(!mem.is_mapped(gpa));
        // Outstanding writes are discarded.
        assert!(!mem.shmem(gpa).is_csr_dirty(CSR_HGATP));
        assert_eq!(session.teardown(&mem), None);
        assert_eq!(
            SbiError::from(session.region().err().unwrap()),
            SbiError::NoShmem
        );
    }

    #[test]
    fn no_clear() {
        let mem = TestGuestMemory::new();
        let gpa = mem.base();
        mem.shmem(gpa).write_csr(CSR_HGATP, 0x1234);
        let mut session = Session::new();
        session
            .establish(gpa, SIZE, NACL_SHMEM_FLAG_NO_CLEAR, &mem)
            .unwrap();
        assert_eq!(mem.shmem(gpa).read_csr(CSR_HGATP), 0x1234);
        assert!(mem.shmem(gpa).is_csr_dirty(CSR_HGATP));
    }

    #[test]
    fn bad_parameters() {
        let mem = TestGuestMemory::new();
        let gpa = mem.base();
        let mut session = Session::new();
        let check = |session: &mut Session, gpa, size, flags| {
            session
                .establish(gpa, size, flags, &mem)
                .map_err(SbiError::from)
        };
        assert_eq!(
            check(&mut session, gpa + 8, SIZE, 0),
            Err(SbiError::InvalidAddress)
        );
        assert_eq!(
            check(&mut session, gpa, SIZE - 4096, 0),
            Err(SbiError::InvalidParam)
        );
        assert_eq!(
            check(&mut session, gpa, SIZE, 2),
            Err(SbiError::InvalidParam)
        );
        // Outside of guest memory.
        assert_eq!(
            check(&mut session, 0x1000, SIZE, 0),
            Err(SbiError::InvalidAddress)
        );
        mem.fail_next_map(GuestMemoryError::Transient);
        assert_eq!(check(&mut session, gpa, SIZE, 0), Err(SbiError::Io));
        assert!(!session.is_established());
        assert!(!mem.is_mapped(gpa));
    }

    #[test]
    fn misaligned_keeps_established_area() {
        let mem = TestGuestMemory::new();
        let gpa = mem.base();
        let mut session = Session::new();
        session.establish(gpa, SIZE, 0, &mem).unwrap();
        mem.shmem(gpa).write_csr(CSR_HGATP, 8 << 60);

        let err = session.establish(mem.shmem_gpa(1) + 8, SIZE, 0, &mem);
        assert_eq!(err, Err(Error::Misaligned(mem.shmem_gpa(1) + 8)));
        assert_eq!(SbiError::from(err.unwrap_err()), SbiError::InvalidAddress);
        assert_eq!(session.gpa(), Some(gpa));
        assert!(mem.is_mapped(gpa));
        assert_eq!(mem.num_mappings(), 1);
        assert!(mem.shmem(gpa).is_csr_dirty(CSR_HGATP));
    }

    #[test]
    fn mode_lock() {
        let mut session = Session::new();
        assert_eq!(session.mode(), NaclMode::Deferred);
        session.set_mode(NaclMode::Eager as u64, 0).unwrap();
        assert_eq!(session.mode(), NaclMode::Eager);
        assert_eq!(session.set_mode(2, 0), Err(Error::InvalidMode(2)));
        assert_eq!(session.set_mode(0, 2), Err(Error::InvalidMode(2)));
        session.set_mode(0, NACL_MODE_FLAG_LOCK).unwrap();
        assert!(session.mode_locked());
        assert_eq!(
            session.set_mode(NaclMode::Eager as u64, 0),
            Err(Error::ModeLocked)
        );
        assert_eq!(SbiError::from(Error::ModeLocked), SbiError::DeniedLocked);
        session.reset_mode();
        assert!(!session.mode_locked());
    }

    #[test]
    fn version_and_features() {
        let config = NaclConfig {
            features: FeatureSet::all().without(NaclFeature::Statistics),
            version: NaclVersion {
                major: 1,
                minor: 2,
                patch: 3,
            },
            ..NaclConfig::default()
        };
        assert_eq!(query_version(&config), (1 << 32) | (2 << 16) | 3);
        assert_eq!(query_feature(&config, NaclFeature::SyncSret as u64), 1);
        assert_eq!(query_feature(&config, NaclFeature::Statistics as u64), 0);
        assert_eq!(query_feature(&config, 99), 0);
    }
}
