// Copyright (c) 2021 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Rust SBI message parsing for the nested virtualization acceleration (NACL) extension.
//! `SbiMessage` is an enum of the supported SBI extensions.
//! For each extension, a function enum is defined to contain the SBI function data.
//! `nacl_shmem` defines the layout of the memory shared between the guest hypervisor and the
//! host, and `api` holds the guest-hypervisor side wrappers.
#![no_std]

mod base;
mod consts;
mod ecall;
mod error;
mod function;
mod nacl;
mod nacl_shmem;

pub mod api;

pub use base::*;
pub use consts::*;
pub use ecall::ecall_send;
pub use error::*;
pub use function::*;
pub use nacl::*;
pub use nacl_shmem::*;

use riscv_regs::{GeneralPurposeRegisters, GprIndex};

/// Return value of an SBI call, as placed in a0 and a1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SbiReturn {
    /// a0: zero on success, a negative `Error` code otherwise.
    pub error_code: i64,
    /// a1: the function's return value.
    pub return_value: u64,
}

impl SbiReturn {
    /// Returns a successful return carrying `return_value`.
    pub fn success(return_value: u64) -> Self {
        Self {
            error_code: SBI_SUCCESS,
            return_value,
        }
    }

    /// Writes `self` into the a0 and a1 registers of `gprs`.
    pub fn set_regs(&self, gprs: &mut GeneralPurposeRegisters) {
        gprs.set_reg(GprIndex::A0, self.error_code as u64);
        gprs.set_reg(GprIndex::A1, self.return_value);
    }
}

impl From<Result<u64>> for SbiReturn {
    fn from(result: Result<u64>) -> SbiReturn {
        match result {
            Ok(rv) => Self::success(rv),
            Err(e) => Self::from(e),
        }
    }
}

impl From<Error> for SbiReturn {
    fn from(error: Error) -> SbiReturn {
        SbiReturn {
            error_code: error.to_code(),
            return_value: 0,
        }
    }
}

/// SBI calls understood by the NACL host, keyed by extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SbiMessage {
    /// The base SBI extension functions.
    Base(BaseFunction),
    /// Nested virtualization acceleration functions.
    Nacl(NaclFunction),
}

impl SbiMessage {
    /// Creates an SbiMessage struct from the given GPRs. Intended for use from the ECALL handler
    /// passed the saved register state from the calling guest hypervisor.
    pub fn from_regs(gprs: &GeneralPurposeRegisters) -> Result<Self> {
        Self::from_args(gprs.a_regs())
    }

    /// Creates an SbiMessage struct from the a0-a7 argument registers.
    pub fn from_args(args: &[u64]) -> Result<Self> {
        if args.len() < 8 {
            return Err(Error::InvalidParam);
        }
        match args[7] {
            EXT_BASE => BaseFunction::from_regs(args).map(SbiMessage::Base),
            EXT_NACL => NaclFunction::from_regs(args).map(SbiMessage::Nacl),
            _ => Err(Error::NotSupported),
        }
    }

    /// Returns the register value for this `SbiMessage`.
    pub fn a7(&self) -> u64 {
        match self {
            SbiMessage::Base(_) => EXT_BASE,
            SbiMessage::Nacl(_) => EXT_NACL,
        }
    }

    /// Returns the register value for this `SbiMessage`.
    pub fn a6(&self) -> u64 {
        match self {
            SbiMessage::Base(f) => f.function_id(),
            SbiMessage::Nacl(f) => f.function_id(),
        }
    }

    /// Returns the a0-a5 register values for this `SbiMessage`.
    pub fn args(&self) -> [u64; SBI_FUNCTION_ARGS] {
        match self {
            SbiMessage::Base(f) => f.args(),
            SbiMessage::Nacl(f) => f.args(),
        }
    }

    /// Returns the result of this `SbiMessage` parsed from the a0 and a1 return registers.
    pub fn result(&self, a0: u64, a1: u64) -> Result<u64> {
        match self {
            SbiMessage::Base(f) => f.result(a0, a1),
            SbiMessage::Nacl(f) => f.result(a0, a1),
        }
    }
}

#[cfg(test)]
#[macro_use]
extern crate std;
