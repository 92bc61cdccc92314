// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use crate::NaclFunction::*;
use crate::{ecall_send, BaseFunction, Error, Result, SbiMessage, EXT_NACL};
use crate::{
    BatchDescriptor, NaclFeature, NaclInterruptKind, NaclMode, NaclShmem, NaclStatId, NaclVersion,
    NACL_HFENCE_ALL, NACL_SHMEM_DISABLE,
};

/// Returns true if the host implements the NACL extension.
pub fn nacl_present() -> bool {
    let msg = SbiMessage::Base(BaseFunction::ProbeSbiExtension(EXT_NACL));
    // Safety: This ecall doesn't touch memory
    matches!(unsafe { ecall_send(&msg) }, Ok(v) if v != 0)
}

/// Registers the nested hypervisor <-> host hypervisor shared memory area for the calling CPU.
/// `shmem_ptr` must be page-aligned and refer to a sufficient number of accessible, contiguous
/// pages to hold a `NaclShmem` struct. The pages must remain accessible until the shared-memory area
/// is unregistered by calling `unregister_shmem()`.
///
/// # Safety
///
/// The caller must own the pages referenced by `shmem_ptr`, for the number of pages sufficient to
/// hold the `NaclShmem` structure. Since memory within the shared-memory communication area may be
/// read or written by the host hypervisor at any time, the caller must treat the memory as volatile
/// until it is unregistered.
pub unsafe fn register_shmem(shmem_ptr: *mut NaclShmem, flags: u64) -> Result<()> {
    let msg = SbiMessage::Nacl(SetShmem {
        shmem_addr: shmem_ptr as u64,
        flags,
    });
    ecall_send(&msg)?;
    Ok(())
}

/// Unregisters the nested hypervisor <-> host hypervisor  shared memory area for the calling CPU.
/// Any CSRs still marked dirty are discarded.
pub fn unregister_shmem() -> Result<()> {
    let msg = SbiMessage::Nacl(SetShmem {
        shmem_addr: NACL_SHMEM_DISABLE,
        flags: 0,
    });
    // Safety: Doesn't access host memory.
    unsafe { ecall_send(&msg) }?;
    Ok(())
}

/// Returns the version of `feature` implemented by the host, or `None` if it isn't supported.
pub fn probe_feature(feature: NaclFeature) -> Result<Option<u64>> {
    let msg = SbiMessage::Nacl(ProbeFeature {
        feature_id: feature as u64,
    });
    // Safety: This ecall doesn't touch memory
    let version = unsafe { ecall_send(&msg) }?;
    Ok(if version == 0 { None } else { Some(version) })
}

/// Mask selecting the groups of CSR slots applied by `sync_csrs`. Bit `n` selects slots `8n` to
/// `8n + 7`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CsrSyncMask {
    lo: u64,
    hi: u64,
}

impl CsrSyncMask {
    /// Selects every dirty CSR.
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds the group containing `csr_num` to the mask.
    pub fn with_csr(mut self, csr_num: u16) -> Self {
        let group = NaclShmem::csr_index(csr_num) / 8;
        if group < 64 {
            self.lo |= 1 << group;
        } else {
            self.hi |= 1 << (group - 64);
        }
        self
    }
}

/// Asks the host to apply the dirty CSRs selected by `mask`. Returns the number applied.
pub fn sync_csrs(mask: CsrSyncMask) -> Result<u64> {
    let msg = SbiMessage::Nacl(SyncCsr {
        mask_lo: mask.lo,
        mask_hi: mask.hi,
    });
    // Safety: The host only accesses the registered shared-memory area.
    unsafe { ecall_send(&msg) }
}

/// Asks the host to process the pending HFENCE entry at `index`, or all of them if `index` is
/// `None`. Returns the number of entries processed.
pub fn sync_hfence(index: Option<usize>) -> Result<u64> {
    let msg = SbiMessage::Nacl(SyncHfence {
        entry_index: index.map(|i| i as u64).unwrap_or(NACL_HFENCE_ALL),
    });
    // Safety: The host only accesses the registered shared-memory area.
    unsafe { ecall_send(&msg) }
}

/// Returns from the current trap using the `sret` context in the shared-memory area. Only
/// returns on failure.
pub fn sync_sret(flags: u64) -> Error {
    let msg = SbiMessage::Nacl(SyncSret { flags });
    // Safety: The host only accesses the registered shared-memory area.
    match unsafe { ecall_send(&msg) } {
        Ok(_) => Error::Failed,
        Err(e) => e,
    }
}

/// Submits `descs` for execution and returns the number that succeeded. The status of each
/// descriptor is written back to its `ret` field.
///
/// # Safety
///
/// `descs` must be in memory the host can access at the guest physical address equal to its
/// pointer value, and must not be accessed by anyone else until the call returns.
pub unsafe fn batch_execute(descs: &mut [BatchDescriptor]) -> Result<u64> {
    let msg = SbiMessage::Nacl(BatchExecute {
        addr: descs.as_mut_ptr() as u64,
        count: descs.len() as u64,
    });
    ecall_send(&msg)
}

/// Injects interrupt `number` of `kind` into hart `target`.
pub fn inject_interrupt(kind: NaclInterruptKind, number: u64, target: u64) -> Result<()> {
    let msg = SbiMessage::Nacl(InjectInterrupt {
        kind: kind as u64,
        number,
        target,
    });
    // Safety: This ecall doesn't touch memory
    unsafe { ecall_send(&msg) }?;
    Ok(())
}

/// Returns the NACL version implemented by the host.
pub fn get_version() -> Result<NaclVersion> {
    let msg = SbiMessage::Nacl(GetVersion);
    // Safety: This ecall doesn't touch memory
    unsafe { ecall_send(&msg) }.map(NaclVersion::from_raw)
}

/// Returns the mode of the calling hart.
pub fn get_mode() -> Result<NaclMode> {
    let msg = SbiMessage::Nacl(GetMode);
    // Safety: This ecall doesn't touch memory
    let raw = unsafe { ecall_send(&msg) }?;
    NaclMode::from_raw(raw).ok_or(Error::Failed)
}

/// Sets the mode of the calling hart, optionally locking it.
pub fn set_mode(mode: NaclMode, flags: u64) -> Result<()> {
    let msg = SbiMessage::Nacl(SetMode {
        mode: mode as u64,
        flags,
    });
    // Safety: This ecall doesn't touch memory
    unsafe { ecall_send(&msg) }?;
    Ok(())
}

/// Returns the calling hart's counter `id`, clearing it if `clear` is set.
pub fn get_statistic(id: NaclStatId, clear: bool) -> Result<u64> {
    let msg = SbiMessage::Nacl(GetStatistic {
        stat_id: id as u64,
        clear: clear as u64,
    });
    // Safety: This ecall doesn't touch memory
    unsafe { ecall_send(&msg) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riscv_regs::{CSR_HGATP, CSR_HGEIP, CSR_VSSTATUS};

    #[test]
    fn sync_mask_groups() {
        assert_eq!(CsrSyncMask::all(), CsrSyncMask { lo: 0, hi: 0 });
        let mask = CsrSyncMask::all()
            .with_csr(CSR_VSSTATUS)
            .with_csr(CSR_HGATP)
            .with_csr(CSR_HGEIP);
        // Slot 0x180 is group 48, slot 0x312 is group 98.
        assert_eq!(mask.lo, 1 | (1 << 48));
        assert_eq!(mask.hi, 1 << (98 - 64));
    }
}
