// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! # Host side of the nested virtualization acceleration (NACL) SBI extension.
//!
//! A guest hypervisor registers a per-hart shared-memory area (`sbi_rs::NaclShmem`) and then
//! updates its virtual CSRs, queues guest TLB fences and prepares trap returns by writing to that
//! area instead of trapping on every access. It asks for the accumulated state to be applied with
//! one of the sync calls or a batch of operations.
//!
//! ## Key types
//!
//! - `HartTable` holds a `NaclHart` per hart and is the entry point for every call, via
//!   `handle_ecall`.
//! - `ShmemRegion` is the host's mapping of one hart's shared-memory area. Everything read from it
//!   comes back wrapped in `Untrusted`.
//! - `AccessValidator` is the only way to turn an `Untrusted` value into a `Validated` one, and
//!   `NaclHost`, the interface to the host's register and interrupt virtualization, only accepts
//!   `Validated` requests.
//! - `DirtyTracker`, `SyncCoordinator` and `BatchInterpreter` implement the sync and batch calls.
//!
//! ## Safety
//!
//! The shared-memory area is owned by the guest hypervisor, which may change it at any time. All
//! accesses to it are volatile and every value is validated after it has been copied out of the
//! area, so a value can't change between being checked and being used.
#![no_std]

// Include std when running unit tests.
#[cfg(test)]
#[macro_use]
extern crate std;

/// Execution of descriptor arrays submitted with `BatchExecute`.
pub mod batch;
/// Boot-time configuration.
pub mod config;
/// The table of CSRs accessible through the shared-memory area.
pub mod csr_table;
/// Tracking of CSR slots awaiting synchronization.
pub mod dirty;
/// SBI call decoding and routing.
pub mod ecall;
/// Per-hart NACL state.
pub mod hart;
/// Processing of the HFENCE list.
pub mod hfence;
/// The interface to the host's virtualization layer.
pub mod host;
/// Shared-memory registration and operating mode.
pub mod session;
/// Access to the shared-memory area.
pub mod shmem;
/// Per-hart statistics.
pub mod stats;
/// The sync calls.
pub mod sync_coordinator;
/// Provides stubs for test harnesses.
#[cfg(test)]
mod test_stubs;
/// Validation of values supplied by the guest hypervisor.
pub mod validator;

pub use batch::{BatchInterpreter, BatchOp, BatchSummary};
pub use config::{FeatureSet, NaclConfig};
pub use dirty::{DirtyTracker, SyncMask};
pub use ecall::{handle_ecall, EcallAction, EcallError, EcallResult};
pub use hart::{HartTable, NaclHart, NaclOutcome};
pub use host::{
    CsrRead, CsrWrite, FenceRequest, HostError, HostResult, InterruptRequest, NaclHost, PageRange,
    TrapReturnState,
};
pub use session::Session;
pub use shmem::{GuestMemory, GuestMemoryError, HfenceSlot, ShmemRegion};
pub use stats::NaclStats;
pub use sync_coordinator::{SyncCoordinator, SyncState};
pub use validator::{AccessValidator, Untrusted, Validated};
