// Copyright (c) 2021 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

#![no_std]

//! Crate for handling RV64 registers.
//! regs - RV64 General Purpose Registers (GPRs), 0-31.
//! csrs - HS and VS-mode CSR numbers and bitfields
//! fence - memory ordering for memory shared across privilege levels

mod csrs;
mod fence;
mod regs;

pub use csrs::*;
pub use fence::*;
pub use regs::*;

#[cfg(test)]
#[macro_use]
extern crate std;
