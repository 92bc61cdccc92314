// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs, dead_code)]

// Extension constants
pub const EXT_BASE: u64 = 0x10;
pub const EXT_NACL: u64 = 0x4E41434C;

// Error constants from the sbi [spec](https://github.com/riscv-non-isa/riscv-sbi-doc/releases)
pub const SBI_SUCCESS: i64 = 0;
pub const SBI_ERR_FAILED: i64 = -1;
pub const SBI_ERR_NOT_SUPPORTED: i64 = -2;
pub const SBI_ERR_INVALID_PARAM: i64 = -3;
pub const SBI_ERR_DENIED: i64 = -4;
pub const SBI_ERR_INVALID_ADDRESS: i64 = -5;
pub const SBI_ERR_ALREADY_AVAILABLE: i64 = -6;
pub const SBI_ERR_ALREADY_STARTED: i64 = -7;
pub const SBI_ERR_ALREADY_STOPPED: i64 = -8;
pub const SBI_ERR_NO_SHMEM: i64 = -9;
pub const SBI_ERR_INVALID_STATE: i64 = -10;
pub const SBI_ERR_BAD_RANGE: i64 = -11;
pub const SBI_ERR_TIMEOUT: i64 = -12;
pub const SBI_ERR_IO: i64 = -13;
pub const SBI_ERR_DENIED_LOCKED: i64 = -14;
// Not assigned by the SBI spec; private to this implementation.
pub const SBI_ERR_OUT_OF_MEMORY: i64 = -15;
