// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Tock Register interface for decoding CSR values and the numbers of the CSRs a hypervisor
//! manages on behalf of a guest.

pub mod defs;
pub mod numbers;
pub mod traps;

pub use tock_registers::interfaces::ReadWriteable;
pub use tock_registers::interfaces::Readable;
pub use tock_registers::interfaces::Writeable;
pub use tock_registers::LocalRegisterCopy;

pub use defs::*;
pub use numbers::*;
pub use traps::*;
