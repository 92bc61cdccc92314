// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use crate::error::*;
use crate::function::*;

/// Address passed to `SetShmem` to unregister the shared-memory area.
pub const NACL_SHMEM_DISABLE: u64 = u64::MAX;
/// `SetShmem` flag: leave the contents of the area as-is instead of zeroing it.
pub const NACL_SHMEM_FLAG_NO_CLEAR: u64 = 1 << 0;
/// Entry index passed to `SyncHfence` to process every pending entry.
pub const NACL_HFENCE_ALL: u64 = u64::MAX;
/// `SyncSret` flag: swap the auto-swap CSRs and process pending HFENCEs before returning.
pub const NACL_SRET_FLAG_AUTOSWAP: u64 = 1 << 0;
/// `SetMode` flag: refuse any further mode changes.
pub const NACL_MODE_FLAG_LOCK: u64 = 1 << 0;

/// Optional NACL features that can be discovered with `ProbeFeature`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NaclFeature {
    /// `SyncCsr` is available.
    SyncCsr = 0,
    /// `SyncHfence` is available.
    SyncHfence = 1,
    /// `SyncSret` is available.
    SyncSret = 2,
    /// `SyncSret` honors `NACL_SRET_FLAG_AUTOSWAP`.
    AutoswapCsr = 3,
    /// `BatchExecute` is available.
    Batch = 4,
    /// `InjectInterrupt` is available.
    InjectInterrupt = 5,
    /// `GetStatistic` is available.
    Statistics = 6,
}

impl NaclFeature {
    /// Every defined feature.
    pub const ALL: [NaclFeature; 7] = [
        NaclFeature::SyncCsr,
        NaclFeature::SyncHfence,
        NaclFeature::SyncSret,
        NaclFeature::AutoswapCsr,
        NaclFeature::Batch,
        NaclFeature::InjectInterrupt,
        NaclFeature::Statistics,
    ];

    /// Returns the feature with ID `id`, if it is known.
    pub fn from_id(id: u64) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| *f as u64 == id)
    }
}

/// How writes to the CSR array take effect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NaclMode {
    /// Dirty CSRs are only applied by an explicit `SyncCsr` or `SyncSret`.
    #[default]
    Deferred = 0,
    /// Dirty CSRs are applied on entry to every NACL call.
    Eager = 1,
}

impl NaclMode {
    /// Returns the mode encoded by `raw`, if any.
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(NaclMode::Deferred),
            1 => Some(NaclMode::Eager),
            _ => None,
        }
    }
}

/// Kinds of interrupt that can be injected with `InjectInterrupt`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NaclInterruptKind {
    /// A VS-level software, timer or external interrupt, identified by its cause number.
    VsLocal = 0,
    /// A guest external interrupt line, identified by its `hgeip` bit.
    GuestExternal = 1,
}

impl NaclInterruptKind {
    /// Returns the kind encoded by `raw`, if any.
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(NaclInterruptKind::VsLocal),
            1 => Some(NaclInterruptKind::GuestExternal),
            _ => None,
        }
    }
}

/// Counters that can be read with `GetStatistic`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NaclStatId {
    /// Number of `SyncCsr` calls.
    SyncCsrCalls = 0,
    /// Number of CSRs applied from the CSR array.
    CsrsSynced = 1,
    /// Number of `SyncHfence` calls.
    SyncHfenceCalls = 2,
    /// Number of HFENCE entries processed.
    HfencesApplied = 3,
    /// Number of `SyncSret` calls.
    SyncSretCalls = 4,
    /// Number of `BatchExecute` calls.
    BatchCalls = 5,
    /// Number of batch descriptors that completed successfully.
    BatchOpsSucceeded = 6,
    /// Number of batch descriptors that failed.
    BatchOpsFailed = 7,
    /// Number of values rejected by the host.
    Denials = 8,
    /// Number of interrupts injected.
    InterruptsInjected = 9,
}

impl NaclStatId {
    /// Number of defined counters.
    pub const COUNT: usize = 10;

    /// Returns the counter with ID `id`, if it is known.
    pub fn from_id(id: u64) -> Option<Self> {
        use NaclStatId::*;
        match id {
            0 => Some(SyncCsrCalls),
            1 => Some(CsrsSynced),
            2 => Some(SyncHfenceCalls),
            3 => Some(HfencesApplied),
            4 => Some(SyncSretCalls),
            5 => Some(BatchCalls),
            6 => Some(BatchOpsSucceeded),
            7 => Some(BatchOpsFailed),
            8 => Some(Denials),
            9 => Some(InterruptsInjected),
            _ => None,
        }
    }
}

/// Version of the NACL interface implemented by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct NaclVersion {
    /// Incompatible interface changes.
    pub major: u16,
    /// Backwards-compatible additions.
    pub minor: u16,
    /// Fixes.
    pub patch: u16,
}

impl NaclVersion {
    /// Packs the version as returned by `GetVersion`.
    pub fn to_raw(self) -> u64 {
        ((self.major as u64) << 32) | ((self.minor as u64) << 16) | self.patch as u64
    }

    /// Unpacks a version returned by `GetVersion`.
    pub fn from_raw(raw: u64) -> Self {
        Self {
            major: (raw >> 32) as u16,
            minor: (raw >> 16) as u16,
            patch: raw as u16,
        }
    }
}

/// Functions provided by the Nested Virtualization Acceleration (NACL) extension.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NaclFunction {
    /// Returns the version of `feature_id` if it is supported, or 0 if it isn't. Unknown features
    /// are reported as unsupported rather than as an error.
    ///
    /// a6 = 0
    ProbeFeature {
        /// a0 = one of `NaclFeature`
        feature_id: u64,
    },
    /// Registers the nested hypervisor <-> host hypervisor shared memory area for the calling CPU.
    /// `shmem_addr` is the guest physical address of where the `NaclShmem` struct will be placed
    /// and must be 4kB aligned. The entire range of memory occupied by the `NaclShmem` struct must
    /// remain accessible to the caller until the area is unregistered by calling this function
    /// with `shmem_addr` set to `NACL_SHMEM_DISABLE`.
    ///
    /// a6 = 1
    SetShmem {
        /// a0 = address of shared memory area
        shmem_addr: u64,
        /// a1 = `NACL_SHMEM_FLAG_*`
        flags: u64,
    },
    /// Applies the dirty CSRs in the groups selected by the 128-bit mask. Bit `n` of the mask
    /// selects CSR slots `8n` to `8n + 7`; an all-zero mask selects every slot. Returns the number
    /// of CSRs applied.
    ///
    /// a6 = 2
    SyncCsr {
        /// a0 = mask bits 0-63
        mask_lo: u64,
        /// a1 = mask bits 64-127
        mask_hi: u64,
    },
    /// Processes the pending HFENCE entry at `entry_index`, or every pending entry if
    /// `entry_index` is `NACL_HFENCE_ALL`. Returns the number of entries processed.
    ///
    /// a6 = 3
    SyncHfence {
        /// a0 = entry index
        entry_index: u64,
    },
    /// Applies the dirty CSRs and returns from the guest hypervisor's trap handler using the
    /// `sret` context in the scratch area. Only returns to the caller on error.
    ///
    /// a6 = 4
    SyncSret {
        /// a0 = `NACL_SRET_FLAG_*`
        flags: u64,
    },
    /// Executes `count` `BatchDescriptor`s starting at guest physical address `addr`. Returns the
    /// number of descriptors that succeeded; the status of each is written to its `ret` field.
    ///
    /// a6 = 5
    BatchExecute {
        /// a0 = address of the descriptor array
        addr: u64,
        /// a1 = number of descriptors
        count: u64,
    },
    /// Injects an interrupt into a virtual hart of the guest hypervisor.
    ///
    /// a6 = 6
    InjectInterrupt {
        /// a0 = one of `NaclInterruptKind`
        kind: u64,
        /// a1 = interrupt number
        number: u64,
        /// a2 = target hart ID
        target: u64,
    },
    /// Returns the packed `NaclVersion` implemented by the host.
    ///
    /// a6 = 7
    GetVersion,
    /// Returns the current `NaclMode`.
    ///
    /// a6 = 8
    GetMode,
    /// Changes the `NaclMode` of the calling hart.
    ///
    /// a6 = 9
    SetMode {
        /// a0 = one of `NaclMode`
        mode: u64,
        /// a1 = `NACL_MODE_FLAG_*`
        flags: u64,
    },
    /// Returns the value of the counter `stat_id`, clearing it afterwards if `clear` is non-zero.
    ///
    /// a6 = 10
    GetStatistic {
        /// a0 = one of `NaclStatId`
        stat_id: u64,
        /// a1 = non-zero to clear
        clear: u64,
    },
}

impl NaclFunction {
    /// Attempts to parse `Self` from the passed in `a0-a7`.
    pub(crate) fn from_regs(args: &[u64]) -> Result<Self> {
        use NaclFunction::*;
        match args[6] {
            0 => Ok(ProbeFeature {
                feature_id: args[0],
            }),
            1 => Ok(SetShmem {
                shmem_addr: args[0],
                flags: args[1],
            }),
            2 => Ok(SyncCsr {
                mask_lo: args[0],
                mask_hi: args[1],
            }),
            3 => Ok(SyncHfence {
                entry_index: args[0],
            }),
            4 => Ok(SyncSret { flags: args[0] }),
            5 => Ok(BatchExecute {
                addr: args[0],
                count: args[1],
            }),
            6 => Ok(InjectInterrupt {
                kind: args[0],
                number: args[1],
                target: args[2],
            }),
            7 => Ok(GetVersion),
            8 => Ok(GetMode),
            9 => Ok(SetMode {
                mode: args[0],
                flags: args[1],
            }),
            10 => Ok(GetStatistic {
                stat_id: args[0],
                clear: args[1],
            }),
            _ => Err(Error::NotSupported),
        }
    }
}

impl SbiFunction for NaclFunction {
    fn function_id(&self) -> u64 {
        use NaclFunction::*;
        match self {
            ProbeFeature { .. } => 0,
            SetShmem { .. } => 1,
            SyncCsr { .. } => 2,
            SyncHfence { .. } => 3,
            SyncSret { .. } => 4,
            BatchExecute { .. } => 5,
            InjectInterrupt { .. } => 6,
            GetVersion => 7,
            GetMode => 8,
            SetMode { .. } => 9,
            GetStatistic { .. } => 10,
        }
    }

    fn args(&self) -> [u64; SBI_FUNCTION_ARGS] {
        use NaclFunction::*;
        match *self {
            ProbeFeature { feature_id } => [feature_id, 0, 0, 0, 0, 0],
            SetShmem { shmem_addr, flags } => [shmem_addr, flags, 0, 0, 0, 0],
            SyncCsr { mask_lo, mask_hi } => [mask_lo, mask_hi, 0, 0, 0, 0],
            SyncHfence { entry_index } => [entry_index, 0, 0, 0, 0, 0],
            SyncSret { flags } => [flags, 0, 0, 0, 0, 0],
            BatchExecute { addr, count } => [addr, count, 0, 0, 0, 0],
            InjectInterrupt {
                kind,
                number,
                target,
            } => [kind, number, target, 0, 0, 0],
            SetMode { mode, flags } => [mode, flags, 0, 0, 0, 0],
            GetStatistic { stat_id, clear } => [stat_id, clear, 0, 0, 0, 0],
            GetVersion | GetMode => [0; SBI_FUNCTION_ARGS],
        }
    }
}
