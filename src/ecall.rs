// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Decoding of SBI calls from a guest hypervisor hart and routing of the Base and NACL
//! extensions.

use riscv_regs::{GeneralPurposeRegisters, PrivilegeLevel};
use sbi_rs::{BaseFunction, Error as SbiError, NaclFunction, SbiMessage, SbiReturn};
use sbi_rs::{EXT_BASE, EXT_NACL, NACL_SHMEM_DISABLE};

use crate::hart::{self, HartTable, NaclOutcome};
use crate::host::NaclHost;
use crate::shmem::GuestMemory;

const SBI_SPEC_MAJOR_VERSION_SHIFT: u64 = 24;
/// SBI specification version reported by the Base extension.
pub const SBI_SPEC_VERSION: u64 = 2 << SBI_SPEC_MAJOR_VERSION_SHIFT;
/// SBI implementation ID reported by the Base extension.
pub const SBI_IMPL_ID_NACL_HYP: u64 = 7;

/// Possible error conditions from handling an ECALL from a guest hypervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EcallError {
    /// A standard SBI error.
    Sbi(SbiError),
    /// The calling hart isn't in the hart table.
    NoSuchHart(u64),
}

/// Holds the result of handling an ECALL.
pub type EcallResult<T> = core::result::Result<T, EcallError>;

impl From<SbiError> for EcallError {
    fn from(error: SbiError) -> EcallError {
        EcallError::Sbi(error)
    }
}

impl From<hart::Error> for EcallError {
    fn from(error: hart::Error) -> EcallError {
        match error {
            hart::Error::NoSuchHart(id) => EcallError::NoSuchHart(id),
            e => EcallError::Sbi(e.into()),
        }
    }
}

/// What the caller of `handle_ecall` must do with the calling hart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EcallAction {
    /// The call couldn't be attributed to a hart; `NotSupported` is returned.
    Unhandled,
    /// Resume after the ECALL with the given return values.
    Continue(SbiReturn),
    /// The host has already returned from the guest hypervisor's trap handler; resume there.
    TrapReturn,
}

impl From<EcallResult<u64>> for EcallAction {
    fn from(result: EcallResult<u64>) -> EcallAction {
        use EcallAction::*;
        match result {
            Ok(val) => Continue(SbiReturn::success(val)),
            Err(EcallError::Sbi(e)) => Continue(e.into()),
            Err(EcallError::NoSuchHart(_)) => Unhandled,
        }
    }
}

impl EcallAction {
    /// Writes the return values, if any, into a0 and a1 of `gprs`.
    pub fn apply(&self, gprs: &mut GeneralPurposeRegisters) {
        match self {
            EcallAction::Unhandled => SbiReturn::from(SbiError::NotSupported).set_regs(gprs),
            EcallAction::Continue(sbi_ret) => sbi_ret.set_regs(gprs),
            EcallAction::TrapReturn => (),
        }
    }
}

/// Handles an ECALL made by `hart_id` with the argument registers in `gprs`, updating `gprs` with
/// the result.
pub fn handle_ecall<H: NaclHost, M: GuestMemory + ?Sized>(
    table: &HartTable,
    hart_id: u64,
    caller: PrivilegeLevel,
    gprs: &mut GeneralPurposeRegisters,
    host: &mut H,
    mem: &M,
) -> EcallAction {
    let action = match SbiMessage::from_regs(gprs) {
        Ok(SbiMessage::Base(base_func)) => EcallAction::Continue(handle_base_msg(base_func)),
        Ok(SbiMessage::Nacl(nacl_func)) => {
            handle_nacl_msg(table, hart_id, nacl_func, caller, host, mem)
        }
        Err(e) => EcallAction::Continue(e.into()),
    };
    action.apply(gprs);
    action
}

fn handle_base_msg(base_func: BaseFunction) -> SbiReturn {
    use BaseFunction::*;
    let ret = match base_func {
        GetSpecificationVersion => SBI_SPEC_VERSION,
        GetImplementationID => SBI_IMPL_ID_NACL_HYP,
        GetImplementationVersion => 0,
        ProbeSbiExtension(ext) => match ext {
            EXT_BASE | EXT_NACL => 1,
            _ => 0,
        },
    };
    SbiReturn::success(ret)
}

fn handle_nacl_msg<H: NaclHost, M: GuestMemory + ?Sized>(
    table: &HartTable,
    hart_id: u64,
    nacl_func: NaclFunction,
    caller: PrivilegeLevel,
    host: &mut H,
    mem: &M,
) -> EcallAction {
    match nacl_func {
        NaclFunction::SetShmem { shmem_addr, flags } => {
            set_shmem(table, hart_id, shmem_addr, flags, mem).into()
        }
        _ => run_on_hart(table, hart_id, nacl_func, caller, host, mem),
    }
}

fn set_shmem<M: GuestMemory + ?Sized>(
    table: &HartTable,
    hart_id: u64,
    shmem_addr: u64,
    flags: u64,
    mem: &M,
) -> EcallResult<u64> {
    if shmem_addr == NACL_SHMEM_DISABLE {
        table.teardown(hart_id, mem)?;
    } else {
        table.establish(hart_id, shmem_addr, flags, mem)?;
    }
    Ok(0)
}

fn run_on_hart<H: NaclHost, M: GuestMemory + ?Sized>(
    table: &HartTable,
    hart_id: u64,
    nacl_func: NaclFunction,
    caller: PrivilegeLevel,
    host: &mut H,
    mem: &M,
) -> EcallAction {
    if let Err(e) = table.hart(hart_id) {
        return EcallAction::from(EcallResult::<u64>::Err(e.into()));
    }
    match table.handle(hart_id, nacl_func, caller, host, mem) {
        Ok(NaclOutcome::Value(val)) => EcallAction::Continue(SbiReturn::success(val)),
        Ok(NaclOutcome::TrapReturn) => EcallAction::TrapReturn,
        Err(e) => EcallAction::Continue(e.into()),
    }
}
