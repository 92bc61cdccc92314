// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use arrayvec::ArrayVec;
use riscv_regs::PrivilegeLevel;
use s_mode_utils::{log_debug, log_info, log_warn};
use sbi_rs::{Error as SbiError, NaclFeature, NaclFunction, NaclMode, NaclStatId, NACL_SHMEM_SIZE};
use spin::Mutex;

use crate::batch::BatchInterpreter;
use crate::config::{self, NaclConfig, MAX_HARTS};
use crate::dirty::SyncMask;
use crate::host::NaclHost;
use crate::session::{self, query_feature, query_version, Session};
use crate::shmem::{ranges_overlap, GuestMemory};
use crate::stats::NaclStats;
use crate::sync_coordinator::SyncCoordinator;
use crate::validator::{AccessValidator, Untrusted};

/// Errors from operations on the hart table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The hart ID isn't in the table.
    NoSuchHart(u64),
    /// Registering or unregistering the shared-memory area failed.
    Session(session::Error),
}

impl From<Error> for SbiError {
    fn from(error: Error) -> SbiError {
        match error {
            Error::NoSuchHart(_) => SbiError::InvalidParam,
            Error::Session(e) => e.into(),
        }
    }
}

impl From<session::Error> for Error {
    fn from(error: session::Error) -> Error {
        Error::Session(error)
    }
}

/// Holds the result of a hart table operation.
pub type Result<T> = core::result::Result<T, Error>;

/// How a NACL call completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NaclOutcome {
    /// Return `value` to the caller in a1.
    Value(u64),
    /// The host has returned from the caller's trap handler; the caller's registers must be left
    /// as the host loaded them.
    TrapReturn,
}

/// The NACL state of a single hart.
pub struct NaclHart {
    hart_id: u64,
    config: NaclConfig,
    session: Session,
    sync: SyncCoordinator,
    stats: NaclStats,
    validator: AccessValidator,
    batch: BatchInterpreter,
}

impl NaclHart {
    fn new(hart_id: u64, config: NaclConfig) -> Self {
        Self {
            hart_id,
            config,
            session: Session::new(),
            sync: SyncCoordinator::new(),
            stats: NaclStats::default(),
            validator: AccessValidator::new(config.num_harts),
            batch: BatchInterpreter::new(config.max_batch_len),
        }
    }

    /// Returns the ID of this hart.
    pub fn hart_id(&self) -> u64 {
        self.hart_id
    }

    /// Returns the hart's shared-memory session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the hart's counters.
    pub fn stats(&self) -> &NaclStats {
        &self.stats
    }

    fn feature(&self, feature: NaclFeature) -> core::result::Result<(), SbiError> {
        if self.config.features.contains(feature) {
            Ok(())
        } else {
            Err(SbiError::NotSupported)
        }
    }

    /// Handles a NACL call other than `SetShmem`, which needs the hart table. `claimed` holds the
    /// address of every registered shared-memory area; batches may not overlap any of them.
    pub fn handle<H: NaclHost, M: GuestMemory + ?Sized>(
        &mut self,
        func: NaclFunction,
        caller: PrivilegeLevel,
        claimed: &[u64],
        host: &mut H,
        mem: &M,
    ) -> core::result::Result<NaclOutcome, SbiError> {
        log_debug!("hart {}: {:?}", self.hart_id, func);
        let result = self.dispatch(func, caller, claimed, host, mem);
        if let Err(e) = result {
            if e == SbiError::Denied {
                self.stats.inc(NaclStatId::Denials);
                log_warn!("hart {}: {:?} denied", self.hart_id, func);
            } else {
                log_debug!("hart {}: {:?} failed: {:?}", self.hart_id, func, e);
            }
        }
        result
    }

    fn dispatch<H: NaclHost, M: GuestMemory + ?Sized>(
        &mut self,
        func: NaclFunction,
        caller: PrivilegeLevel,
        claimed: &[u64],
        host: &mut H,
        mem: &M,
    ) -> core::result::Result<NaclOutcome, SbiError> {
        use NaclFunction::*;
        if !matches!(func, SyncCsr { .. } | SyncSret { .. }) {
            self.drain_eager(host)?;
        }
        let value = match func {
            ProbeFeature { feature_id } => query_feature(&self.config, feature_id),
            // Registration goes through `HartTable`.
            SetShmem { .. } => return Err(SbiError::InvalidState),
            SyncCsr { mask_lo, mask_hi } => {
                self.feature(NaclFeature::SyncCsr)?;
                self.sync_csrs(host, SyncMask::new(mask_lo, mask_hi))?
            }
            SyncHfence { entry_index } => {
                self.feature(NaclFeature::SyncHfence)?;
                self.sync_hfences(host, entry_index)?
            }
            SyncSret { flags } => {
                self.feature(NaclFeature::SyncSret)?;
                self.sync_sret(host, flags, caller)?;
                return Ok(NaclOutcome::TrapReturn);
            }
            BatchExecute { addr, count } => {
                self.feature(NaclFeature::Batch)?;
                self.batch_execute(host, mem, claimed, addr, count)?
            }
            InjectInterrupt {
                kind,
                number,
                target,
            } => {
                self.feature(NaclFeature::InjectInterrupt)?;
                let request = self.validator.check_interrupt(
                    Untrusted::new(kind),
                    Untrusted::new(number),
                    Untrusted::new(target),
                )?;
                host.inject_interrupt(&request)?;
                self.stats.inc(NaclStatId::InterruptsInjected);
                0
            }
            GetVersion => query_version(&self.config),
            GetMode => self.session.mode() as u64,
            SetMode { mode, flags } => {
                self.session.set_mode(mode, flags)?;
                log_debug!("hart {}: mode {:?}", self.hart_id, self.session.mode());
                0
            }
            GetStatistic { stat_id, clear } => {
                self.feature(NaclFeature::Statistics)?;
                let id = NaclStatId::from_id(stat_id).ok_or(SbiError::InvalidParam)?;
                self.stats.read(id, clear != 0)
            }
        };
        Ok(NaclOutcome::Value(value))
    }

    // Applies every dirty CSR if the hart is in eager mode.
    fn drain_eager<H: NaclHost>(&mut self, host: &mut H) -> core::result::Result<(), SbiError> {
        if self.session.mode() != NaclMode::Eager {
            return Ok(());
        }
        let region = match self.session.region_mut() {
            Ok(r) => r,
            Err(_) => return Ok(()),
        };
        let count = self
            .sync
            .sync_csrs(region, &self.validator, host, SyncMask::all())?;
        self.stats.add(NaclStatId::CsrsSynced, count as u64);
        Ok(())
    }

    fn sync_csrs<H: NaclHost>(
        &mut self,
        host: &mut H,
        mask: SyncMask,
    ) -> core::result::Result<u64, SbiError> {
        self.stats.inc(NaclStatId::SyncCsrCalls);
        let region = self.session.region_mut()?;
        let count = self.sync.sync_csrs(region, &self.validator, host, mask)? as u64;
        self.stats.add(NaclStatId::CsrsSynced, count);
        Ok(count)
    }

    fn sync_hfences<H: NaclHost>(
        &mut self,
        host: &mut H,
        entry_index: u64,
    ) -> core::result::Result<u64, SbiError> {
        self.stats.inc(NaclStatId::SyncHfenceCalls);
        let region = self.session.region_mut()?;
        let count = self
            .sync
            .sync_hfences(region, &self.validator, host, entry_index)? as u64;
        self.stats.add(NaclStatId::HfencesApplied, count);
        Ok(count)
    }

    fn sync_sret<H: NaclHost>(
        &mut self,
        host: &mut H,
        flags: u64,
        caller: PrivilegeLevel,
    ) -> core::result::Result<(), SbiError> {
        self.stats.inc(NaclStatId::SyncSretCalls);
        let autoswap = self.config.features.contains(NaclFeature::AutoswapCsr);
        let region = self.session.region_mut()?;
        let summary = self
            .sync
            .sync_sret(region, &self.validator, host, flags, caller, autoswap)?;
        self.stats.add(NaclStatId::CsrsSynced, summary.csrs as u64);
        self.stats
            .add(NaclStatId::HfencesApplied, summary.fences as u64);
        Ok(())
    }

    fn batch_execute<H: NaclHost, M: GuestMemory + ?Sized>(
        &mut self,
        host: &mut H,
        mem: &M,
        claimed: &[u64],
        addr: u64,
        count: u64,
    ) -> core::result::Result<u64, SbiError> {
        self.stats.inc(NaclStatId::BatchCalls);
        let summary = self
            .batch
            .execute(
                self.session.region_mut().ok(),
                &self.validator,
                host,
                mem,
                claimed,
                addr,
                count,
            )
            .map_err(|e| {
                log_warn!("hart {}: batch at {:#x} aborted: {:?}", self.hart_id, addr, e);
                e
            })?;
        self.stats
            .add(NaclStatId::BatchOpsSucceeded, summary.succeeded);
        self.stats.add(NaclStatId::BatchOpsFailed, summary.failed);
        self.stats.add(NaclStatId::Denials, summary.denied);
        self.stats.add(NaclStatId::HfencesApplied, summary.fences);
        self.stats
            .add(NaclStatId::InterruptsInjected, summary.interrupts);
        if summary.denied != 0 {
            log_warn!(
                "hart {}: {} batch operations denied",
                self.hart_id,
                summary.denied
            );
        }
        Ok(summary.succeeded)
    }
}

/// The NACL state of every hart, indexed by hart ID, along with the registry of shared-memory
/// areas used to keep harts from registering overlapping areas.
pub struct HartTable {
    harts: ArrayVec<Mutex<NaclHart>, MAX_HARTS>,
    // (hart ID, area address) for every registered area. Always locked before a hart.
    claims: Mutex<ArrayVec<(u64, u64), MAX_HARTS>>,
}

impl HartTable {
    /// Creates a table for the harts described by `config`.
    pub fn new(config: NaclConfig) -> config::Result<Self> {
        config.validate()?;
        let harts = (0..config.num_harts)
            .map(|id| Mutex::new(NaclHart::new(id as u64, config)))
            .collect();
        Ok(Self {
            harts,
            claims: Mutex::new(ArrayVec::new()),
        })
    }

    /// Returns the number of harts in the table.
    pub fn num_harts(&self) -> usize {
        self.harts.len()
    }

    /// Returns the state of `hart_id`.
    pub fn hart(&self, hart_id: u64) -> Result<&Mutex<NaclHart>> {
        usize::try_from(hart_id)
            .ok()
            .and_then(|i| self.harts.get(i))
            .ok_or(Error::NoSuchHart(hart_id))
    }

    /// Handles a NACL call other than `SetShmem` from `hart_id`.
    pub fn handle<H: NaclHost, M: GuestMemory + ?Sized>(
        &self,
        hart_id: u64,
        func: NaclFunction,
        caller: PrivilegeLevel,
        host: &mut H,
        mem: &M,
    ) -> core::result::Result<NaclOutcome, SbiError> {
        let hart = self.hart(hart_id)?;
        if let NaclFunction::BatchExecute { .. } = func {
            // Held until the batch completes so no area can be registered under the array.
            let claims = self.claims.lock();
            let claimed: ArrayVec<u64, MAX_HARTS> = claims.iter().map(|(_, gpa)| *gpa).collect();
            return hart.lock().handle(func, caller, &claimed, host, mem);
        }
        hart.lock().handle(func, caller, &[], host, mem)
    }

    /// Registers the shared-memory area at `gpa` for `hart_id`. Fails without changing any state
    /// if the area overlaps one registered by another hart.
    pub fn establish<M: GuestMemory + ?Sized>(
        &self,
        hart_id: u64,
        gpa: u64,
        flags: u64,
        mem: &M,
    ) -> Result<()> {
        let size = NACL_SHMEM_SIZE as u64;
        let mut claims = self.claims.lock();
        let mut hart = self.hart(hart_id)?.lock();
        hart.session.check_establish(gpa, size, flags)?;
        if let Some((other, _)) = claims
            .iter()
            .find(|(h, g)| *h != hart_id && ranges_overlap(*g, size, gpa, size))
        {
            log_warn!(
                "hart {}: shared memory at {:#x} overlaps hart {}",
                hart_id,
                gpa,
                other
            );
            return Err(session::Error::Overlap(gpa).into());
        }
        hart.session.establish(gpa, size, flags, mem)?;
        // A hart holds at most one claim, so this can't overflow.
        claims.push((hart_id, gpa));
        log_info!("hart {}: shared memory at {:#x}", hart_id, gpa);
        Ok(())
    }

    /// Unregisters the shared-memory area of `hart_id`, if any.
    pub fn teardown<M: GuestMemory + ?Sized>(&self, hart_id: u64, mem: &M) -> Result<()> {
        let mut claims = self.claims.lock();
        let mut hart = self.hart(hart_id)?.lock();
        if let Some(gpa) = hart.session.teardown(mem) {
            claims.retain(|(h, _)| *h != hart_id);
            log_info!("hart {}: released shared memory at {:#x}", hart_id, gpa);
        }
        Ok(())
    }

    /// Releases everything `hart_id` holds when it goes offline.
    pub fn hart_offline<M: GuestMemory + ?Sized>(&self, hart_id: u64, mem: &M) -> Result<()> {
        self.teardown(hart_id, mem)?;
        self.hart(hart_id)?.lock().session.reset_mode();
        Ok(())
    }
}
