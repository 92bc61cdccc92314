// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use crate::error::*;

/// Number of argument registers (a0-a5) an SBI function may use.
pub const SBI_FUNCTION_ARGS: usize = 6;

/// A Trait for an SbiFunction. Implementers use this trait to specify how to serialize into the
/// a0-a6 registers used to make SBI calls, and how to parse the a0/a1 return registers.
pub trait SbiFunction {
    /// Returns the function ID that should be stored in register a6 before making the ecall for
    /// this function.
    fn function_id(&self) -> u64;

    /// Returns the values that should be stored in registers a0-a5 before making the ecall for
    /// this function. Unused arguments are zero.
    fn args(&self) -> [u64; SBI_FUNCTION_ARGS] {
        [0; SBI_FUNCTION_ARGS]
    }

    /// Returns a result parsed from the a0 and a1 return value registers.
    fn result(&self, a0: u64, a1: u64) -> Result<u64> {
        match a0 {
            0 => Ok(a1),
            e => Err(Error::from_code(e as i64)),
        }
    }
}
