// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use crate::consts::*;

/// Errors passed over the SBI protocol.
///
/// Constants from the SBI [spec](https://github.com/riscv-non-isa/riscv-sbi-doc/releases).
#[repr(i64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Generic failure in execution of the SBI call.
    Failed = SBI_ERR_FAILED,
    /// Extension or function is not supported.
    NotSupported = SBI_ERR_NOT_SUPPORTED,
    /// Parameter passed isn't valid.
    InvalidParam = SBI_ERR_INVALID_PARAM,
    /// Permission denied.
    Denied = SBI_ERR_DENIED,
    /// Address passed is invalid.
    InvalidAddress = SBI_ERR_INVALID_ADDRESS,
    /// The resource already exists, e.g. a shared-memory area is already registered.
    AlreadyAvailable = SBI_ERR_ALREADY_AVAILABLE,
    /// The resource has already been started.
    AlreadyStarted = SBI_ERR_ALREADY_STARTED,
    /// The resource has already been stopped.
    AlreadyStopped = SBI_ERR_ALREADY_STOPPED,
    /// No shared memory has been registered for the calling hart.
    NoShmem = SBI_ERR_NO_SHMEM,
    /// The call is invalid in the current state of the caller.
    InvalidState = SBI_ERR_INVALID_STATE,
    /// A parameter is outside of the range supported by the implementation.
    BadRange = SBI_ERR_BAD_RANGE,
    /// The operation timed out.
    Timeout = SBI_ERR_TIMEOUT,
    /// An I/O error occurred while performing the call. The call may be retried.
    Io = SBI_ERR_IO,
    /// Permission denied because the target is locked.
    DeniedLocked = SBI_ERR_DENIED_LOCKED,
    /// The implementation ran out of memory while performing the call.
    OutOfMemory = SBI_ERR_OUT_OF_MEMORY,
}

impl Error {
    /// Parse the given error code to an `Error` enum.
    pub fn from_code(e: i64) -> Self {
        use Error::*;
        match e {
            SBI_ERR_NOT_SUPPORTED => NotSupported,
            SBI_ERR_INVALID_PARAM => InvalidParam,
            SBI_ERR_DENIED => Denied,
            SBI_ERR_INVALID_ADDRESS => InvalidAddress,
            SBI_ERR_ALREADY_AVAILABLE => AlreadyAvailable,
            SBI_ERR_ALREADY_STARTED => AlreadyStarted,
            SBI_ERR_ALREADY_STOPPED => AlreadyStopped,
            SBI_ERR_NO_SHMEM => NoShmem,
            SBI_ERR_INVALID_STATE => InvalidState,
            SBI_ERR_BAD_RANGE => BadRange,
            SBI_ERR_TIMEOUT => Timeout,
            SBI_ERR_IO => Io,
            SBI_ERR_DENIED_LOCKED => DeniedLocked,
            SBI_ERR_OUT_OF_MEMORY => OutOfMemory,
            _ => Failed,
        }
    }

    /// Returns the code passed in a0 for this error.
    pub fn to_code(self) -> i64 {
        self as i64
    }
}

/// Holds the result of an SBI call.
pub type Result<T> = core::result::Result<T, Error>;
