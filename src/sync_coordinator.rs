// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The synchronization calls: applying dirty CSRs, processing the HFENCE list and emulating
//! `sret`. Each call validates everything it is about to apply before applying any of it.

use riscv_regs::{PrivilegeLevel, CSR_HSTATUS};
use sbi_rs::{Error as SbiError, NACL_SRET_FLAG_AUTOSWAP};

use crate::csr_table::CSR_TABLE_LEN;
use crate::dirty::{DirtyTracker, SyncMask};
use crate::hfence::{self, HfenceSelect};
use crate::host::{HostError, NaclHost};
use crate::shmem::ShmemRegion;
use crate::validator::{self, AccessValidator};

/// Progress of a synchronization call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncState {
    /// No call in progress.
    #[default]
    Idle,
    /// Validating the values to be applied.
    AwaitingSync,
    /// Applying validated values to the host.
    Applying,
}

/// Errors from the synchronization calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A synchronization call was already in progress.
    Busy(SyncState),
    /// The mask selects slots beyond the CSR table.
    MaskOutOfRange,
    /// A value failed validation.
    Invalid(validator::Error),
    /// HFENCE processing failed.
    Fence(hfence::Error),
    /// The host failed to apply a value.
    Host(HostError),
    /// Unknown `SyncSret` flags.
    InvalidFlags(u64),
    /// Auto-swap was requested but isn't enabled.
    AutoswapDisabled,
    /// `SyncSret` was called from below supervisor mode.
    NotSupervisor(PrivilegeLevel),
}

impl From<Error> for SbiError {
    fn from(error: Error) -> SbiError {
        use Error::*;
        match error {
            Busy(_) => SbiError::InvalidState,
            MaskOutOfRange | InvalidFlags(_) => SbiError::InvalidParam,
            Invalid(e) => e.into(),
            Fence(e) => e.into(),
            Host(e) => e.into(),
            AutoswapDisabled => SbiError::NotSupported,
            NotSupervisor(_) => SbiError::Denied,
        }
    }
}

impl From<validator::Error> for Error {
    fn from(error: validator::Error) -> Error {
        Error::Invalid(error)
    }
}

impl From<hfence::Error> for Error {
    fn from(error: hfence::Error) -> Error {
        Error::Fence(error)
    }
}

impl From<HostError> for Error {
    fn from(error: HostError) -> Error {
        Error::Host(error)
    }
}

/// Holds the result of a synchronization call.
pub type Result<T> = core::result::Result<T, Error>;

/// What a successful `SyncSret` applied before returning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SretSummary {
    /// Number of CSRs applied.
    pub csrs: usize,
    /// Number of HFENCE entries processed.
    pub fences: usize,
    /// True if `hstatus` was swapped.
    pub swapped: bool,
}

/// Runs the synchronization calls for a hart.
#[derive(Debug, Default)]
pub struct SyncCoordinator {
    state: SyncState,
}

impl SyncCoordinator {
    /// Creates an idle coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    // Runs `f` as one synchronization call, returning to `Idle` however it completes. Callers
    // hold `&mut self`, so a coordinator is only found busy if a previous call was abandoned
    // mid-way, e.g. by a panic in the host.
    fn run<T>(&mut self, f: impl FnOnce(&mut SyncState) -> Result<T>) -> Result<T> {
        if self.state != SyncState::Idle {
            return Err(Error::Busy(self.state));
        }
        self.state = SyncState::AwaitingSync;
        let result = f(&mut self.state);
        self.state = SyncState::Idle;
        result
    }

    /// Applies the dirty CSRs selected by `mask`. Returns the number applied. If any selected
    /// value is invalid nothing is applied.
    pub fn sync_csrs<H: NaclHost>(
        &mut self,
        region: &mut ShmemRegion,
        validator: &AccessValidator,
        host: &mut H,
        mask: SyncMask,
    ) -> Result<usize> {
        self.run(|state| {
            if mask.exceeds(CSR_TABLE_LEN) {
                return Err(Error::MaskOutOfRange);
            }
            let mut tracker = DirtyTracker::new(region);
            validate_dirty(&tracker, validator, mask)?;
            *state = SyncState::Applying;
            apply_dirty(&mut tracker, validator, host, mask)
        })
    }

    /// Processes the HFENCE entries selected by `entry_index`. Returns the number processed.
    pub fn sync_hfences<H: NaclHost>(
        &mut self,
        region: &mut ShmemRegion,
        validator: &AccessValidator,
        host: &mut H,
        entry_index: u64,
    ) -> Result<usize> {
        self.run(|state| {
            let select = HfenceSelect::from_raw(entry_index)?;
            let pending = hfence::validate_pending(region, validator, select)?;
            *state = SyncState::Applying;
            Ok(hfence::apply_pending(region, host, &pending)?)
        })
    }

    /// Applies every dirty CSR and then has the host return from the guest hypervisor's trap
    /// handler using the `sret` context. With `NACL_SRET_FLAG_AUTOSWAP`, pending HFENCEs are
    /// processed and `hstatus` is swapped with the auto-swap context first.
    pub fn sync_sret<H: NaclHost>(
        &mut self,
        region: &mut ShmemRegion,
        validator: &AccessValidator,
        host: &mut H,
        flags: u64,
        caller: PrivilegeLevel,
        autoswap_enabled: bool,
    ) -> Result<SretSummary> {
        if flags & !NACL_SRET_FLAG_AUTOSWAP != 0 {
            return Err(Error::InvalidFlags(flags));
        }
        let autoswap = flags & NACL_SRET_FLAG_AUTOSWAP != 0;
        if autoswap && !autoswap_enabled {
            return Err(Error::AutoswapDisabled);
        }
        if caller != PrivilegeLevel::Supervisor {
            return Err(Error::NotSupervisor(caller));
        }
        self.run(|state| {
            let ret_state = validator.check_sret(region.read_sret())?;
            let (swap, fences) = if autoswap {
                let swap = validator.check_autoswap(region.read_autoswap())?;
                let fences = hfence::validate_pending(region, validator, HfenceSelect::All)?;
                (swap, fences)
            } else {
                (None, hfence::PendingFences::new())
            };
            let mut tracker = DirtyTracker::new(region);
            validate_dirty(&tracker, validator, SyncMask::all())?;

            *state = SyncState::Applying;
            let csrs = apply_dirty(&mut tracker, validator, host, SyncMask::all())?;
            let fences = hfence::apply_pending(region, host, &fences)?;
            // The swap goes last so a failed call leaves both copies of hstatus untouched.
            let old = match swap.as_ref() {
                Some(_) => Some(host.read_csr(&validator.internal_read(CSR_HSTATUS)?)?),
                None => None,
            };
            host.sret(&ret_state)?;
            if let (Some(swap), Some(old)) = (swap.as_ref(), old) {
                host.write_csr(swap)?;
                region.write_autoswap_hstatus(old);
            }
            Ok(SretSummary {
                csrs,
                fences,
                swapped: swap.is_some(),
            })
        })
    }
}

fn validate_dirty(
    tracker: &DirtyTracker,
    validator: &AccessValidator,
    mask: SyncMask,
) -> Result<()> {
    for slot in tracker.dirty_slots(mask) {
        validator.check_slot_write(slot, tracker.value(slot))?;
    }
    Ok(())
}

fn apply_dirty<H: NaclHost>(
    tracker: &mut DirtyTracker,
    validator: &AccessValidator,
    host: &mut H,
    mask: SyncMask,
) -> Result<usize> {
    tracker.consume(mask, |slot, value| {
        let write = validator.check_slot_write(slot, value)?;
        host.write_csr(&write)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shmem::GuestMemory;
    use crate::test_stubs::{TestGuestMemory, TestHost};
    use riscv_regs::{GeneralPurposeRegisters, GprIndex};
    use riscv_regs::{CSR_HGATP, CSR_HGEIP, CSR_VSEPC, CSR_VSSTATUS, CSR_VSTVEC};
    use sbi_rs::{AutoswapContext, HfenceEntry, HfenceKind, NaclShmem, SretContext};
    use sbi_rs::NACL_SHMEM_SIZE;

    const HSTATUS_64: u64 = 2 << 32;
    const SSTATUS_RET_S: u64 = (2 << 32) | (1 << 8);

    struct Fixture {
        mem: TestGuestMemory,
        region: ShmemRegion,
        host: TestHost,
        validator: AccessValidator,
        sync: SyncCoordinator,
    }

    impl Fixture {
        fn new() -> Self {
            let mem = TestGuestMemory::new();
            let ptr = mem.map(mem.base(), NACL_SHMEM_SIZE as u64).unwrap();
            let region = unsafe { ShmemRegion::new(mem.base(), ptr) }.unwrap();
            Self {
                mem,
                region,
                host: TestHost::new(),
                validator: AccessValidator::new(1),
                sync: SyncCoordinator::new(),
            }
        }

        fn shmem(&self) -> &mut NaclShmem {
            self.mem.shmem(self.mem.base())
        }

        fn sync_csrs(&mut self, mask: SyncMask) -> Result<usize> {
            self.sync.sync_csrs(&mut self.region, &self.validator, &mut self.host, mask)
        }

        fn sync_sret(&mut self, flags: u64) -> Result<SretSummary> {
            self.sync.sync_sret(
                &mut self.region,
                &self.validator,
                &mut self.host,
                flags,
                PrivilegeLevel::Supervisor,
                true,
            )
        }
    }

    #[test]
    fn sync_all_with_zero_mask() {
        let mut f = Fixture::new();
        f.shmem().write_csr(CSR_HGATP, (8 << 60) | 0x100);
        f.shmem().write_csr(CSR_VSTVEC, 0x8000_0000);
        assert_eq!(f.sync_csrs(SyncMask::all()), Ok(2));
        assert_eq!(f.host.csr(CSR_HGATP), (8 << 60) | 0x100);
        assert_eq!(f.host.csr(CSR_VSTVEC), 0x8000_0000);
        assert!(!f.shmem().is_csr_dirty(CSR_HGATP));
        // Syncing again is a no-op.
        assert_eq!(f.sync_csrs(SyncMask::all()), Ok(0));
        assert_eq!(f.host.writes().len(), 2);
        assert_eq!(f.sync.state(), SyncState::Idle);
    }

    #[test]
    fn masked_sync() {
        let mut f = Fixture::new();
        f.shmem().write_csr(CSR_VSSTATUS, HSTATUS_64);
        f.shmem().write_csr(CSR_HGATP, 0);
        // Group 0 holds vsstatus.
        assert_eq!(f.sync_csrs(SyncMask::new(1, 0)), Ok(1));
        assert!(f.shmem().is_csr_dirty(CSR_HGATP));
        assert_eq!(
            f.sync_csrs(SyncMask::new(0, 1 << 63)),
            Err(Error::MaskOutOfRange)
        );
        assert!(f.shmem().is_csr_dirty(CSR_HGATP));
    }

    #[test]
    fn denied_sync_applies_nothing() {
        let mut f = Fixture::new();
        f.shmem().write_csr(CSR_VSSTATUS, HSTATUS_64);
        f.shmem().write_csr(CSR_HSTATUS, HSTATUS_64);
        // hgeip is read-only.
        f.shmem().write_csr(CSR_HGEIP, 1);
        let err = f.sync_csrs(SyncMask::all()).unwrap_err();
        assert_eq!(err, Error::Invalid(validator::Error::ReadOnly(CSR_HGEIP)));
        assert_eq!(SbiError::from(err), SbiError::Denied);
        assert!(f.host.writes().is_empty());
        assert!(f.shmem().is_csr_dirty(CSR_VSSTATUS));
        assert!(f.shmem().is_csr_dirty(CSR_HSTATUS));
        assert_eq!(f.sync.state(), SyncState::Idle);
    }

    #[test]
    fn transient_failure_is_retryable() {
        let mut f = Fixture::new();
        f.shmem().write_csr(CSR_VSSTATUS, HSTATUS_64);
        f.shmem().write_csr(CSR_HSTATUS, HSTATUS_64);
        f.shmem().write_csr(CSR_HGATP, 0);
        f.host.fail_after(1);
        let err = f.sync_csrs(SyncMask::all()).unwrap_err();
        assert_eq!(SbiError::from(err), SbiError::Io);
        assert!(!f.shmem().is_csr_dirty(CSR_VSSTATUS));
        assert!(f.shmem().is_csr_dirty(CSR_HSTATUS));
        f.host.fail_after(u64::MAX);
        assert_eq!(f.sync_csrs(SyncMask::all()), Ok(2));
        assert_eq!(f.host.writes().len(), 3);
    }

    #[test]
    fn busy_coordinator_rejects_calls() {
        let mut f = Fixture::new();
        f.shmem().write_csr(CSR_HGATP, 0);
        f.sync.state = SyncState::Applying;
        let err = f.sync_csrs(SyncMask::all()).unwrap_err();
        assert_eq!(err, Error::Busy(SyncState::Applying));
        assert_eq!(SbiError::from(err), SbiError::InvalidState);
        assert!(f.shmem().is_csr_dirty(CSR_HGATP));
        assert!(f.host.writes().is_empty());
    }

    #[test]
    fn hfence_sync_rejects_bad_index() {
        let mut f = Fixture::new();
        let err = f
            .sync
            .sync_hfences(&mut f.region, &f.validator, &mut f.host, 56)
            .unwrap_err();
        assert_eq!(SbiError::from(err), SbiError::InvalidParam);
        f.shmem().push_hfence(HfenceEntry::new(HfenceKind::Gvma, 0, 0, 0, 0));
        assert_eq!(
            f.sync.sync_hfences(&mut f.region, &f.validator, &mut f.host, u64::MAX),
            Ok(1)
        );
    }

    #[test]
    fn sret_applies_and_returns() {
        let mut f = Fixture::new();
        let mut gprs = GeneralPurposeRegisters::default();
        gprs.set_reg(GprIndex::A0, 42);
        f.shmem().sret = SretContext::new(&gprs, 0x8020_0000, SSTATUS_RET_S);
        f.shmem().write_csr(CSR_VSEPC, 0x1000);
        f.shmem().push_hfence(HfenceEntry::new(HfenceKind::Gvma, 0, 0, 0, 0));

        let summary = f.sync_sret(0).unwrap();
        assert_eq!(summary.csrs, 1);
        // Without auto-swap the HFENCE list is left alone.
        assert_eq!(summary.fences, 0);
        assert!(f.shmem().hfence[0].is_pending());
        let ret = f.host.last_sret().unwrap();
        assert_eq!(ret.sepc, 0x8020_0000);
        assert_eq!(ret.gprs.reg(GprIndex::A0), 42);
        assert_eq!(f.host.csr(CSR_VSEPC), 0x1000);
    }

    #[test]
    fn sret_with_autoswap() {
        let mut f = Fixture::new();
        f.host.set_csr(CSR_HSTATUS, HSTATUS_64 | (1 << 7));
        f.shmem().sret =
            SretContext::new(&GeneralPurposeRegisters::default(), 0x8020_0000, SSTATUS_RET_S);
        f.shmem().autoswap = AutoswapContext::with_hstatus(HSTATUS_64 | (1 << 21));
        f.shmem().push_hfence(HfenceEntry::new(HfenceKind::Gvma, 0, 0, 0, 0));

        let summary = f.sync_sret(NACL_SRET_FLAG_AUTOSWAP).unwrap();
        assert_eq!(summary.fences, 1);
        assert!(summary.swapped);
        assert_eq!(f.host.csr(CSR_HSTATUS), HSTATUS_64 | (1 << 21));
        assert_eq!(f.shmem().autoswap.hstatus(), HSTATUS_64 | (1 << 7));
        assert!(!f.shmem().hfence[0].is_pending());
        assert!(f.host.last_sret().is_some());
    }

    #[test]
    fn failed_sret_keeps_hstatus() {
        let mut f = Fixture::new();
        let host_hstatus = HSTATUS_64 | (1 << 7);
        let guest_hstatus = HSTATUS_64 | (1 << 21);
        f.host.set_csr(CSR_HSTATUS, host_hstatus);
        f.shmem().sret =
            SretContext::new(&GeneralPurposeRegisters::default(), 0x8020_0000, SSTATUS_RET_S);
        f.shmem().autoswap = AutoswapContext::with_hstatus(guest_hstatus);

        // The trap return itself fails.
        f.host.fail_after(0);
        let err = f.sync_sret(NACL_SRET_FLAG_AUTOSWAP).unwrap_err();
        assert_eq!(SbiError::from(err), SbiError::Io);
        assert_eq!(f.host.csr(CSR_HSTATUS), host_hstatus);
        assert_eq!(f.shmem().autoswap.hstatus(), guest_hstatus);

        // The trap return succeeds but the swap fails.
        f.host.fail_after(1);
        let err = f.sync_sret(NACL_SRET_FLAG_AUTOSWAP).unwrap_err();
        assert_eq!(SbiError::from(err), SbiError::Io);
        assert_eq!(f.host.csr(CSR_HSTATUS), host_hstatus);
        assert_eq!(f.shmem().autoswap.hstatus(), guest_hstatus);

        f.host.fail_after(u64::MAX);
        assert!(f.sync_sret(NACL_SRET_FLAG_AUTOSWAP).unwrap().swapped);
        assert_eq!(f.host.csr(CSR_HSTATUS), guest_hstatus);
        assert_eq!(f.shmem().autoswap.hstatus(), host_hstatus);
    }

    #[test]
    fn sret_errors() {
        let mut f = Fixture::new();
        let sbi_err = |r: Result<SretSummary>| SbiError::from(r.unwrap_err());
        // Never populated.
        assert_eq!(sbi_err(f.sync_sret(0)), SbiError::InvalidState);
        assert_eq!(sbi_err(f.sync_sret(2)), SbiError::InvalidParam);

        f.shmem().sret =
            SretContext::new(&GeneralPurposeRegisters::default(), 0x8020_0000, SSTATUS_RET_S);
        let disabled = f.sync.sync_sret(
            &mut f.region,
            &f.validator,
            &mut f.host,
            NACL_SRET_FLAG_AUTOSWAP,
            PrivilegeLevel::Supervisor,
            false,
        );
        assert_eq!(sbi_err(disabled), SbiError::NotSupported);
        let from_user = f.sync.sync_sret(
            &mut f.region,
            &f.validator,
            &mut f.host,
            0,
            PrivilegeLevel::User,
            true,
        );
        assert_eq!(sbi_err(from_user), SbiError::Denied);

        // An invalid dirty CSR stops the return before anything is applied.
        f.shmem().write_csr(CSR_VSEPC, 0x1000);
        f.shmem().write_csr(CSR_HSTATUS, 0);
        assert_eq!(sbi_err(f.sync_sret(0)), SbiError::Denied);
        assert!(f.host.writes().is_empty());
        assert!(f.host.last_sret().is_none());
        assert!(f.shmem().is_csr_dirty(CSR_VSEPC));
    }
}
