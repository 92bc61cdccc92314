// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use crate::{hvip, VS_INTERRUPT_BITS};
use tock_registers::fields::FieldValue;

/// Errors as a result of converting to/from CSR values and interrupt enums.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Unknown interrupt cause number.
    UnknownCause(u64),

    /// Interrupt cause can't be used with this CSR.
    InvalidCause,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Interrupt causes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Interrupt {
    UserSoft,
    SupervisorSoft,
    VirtualSupervisorSoft,
    MachineSoft,
    UserTimer,
    SupervisorTimer,
    VirtualSupervisorTimer,
    MachineTimer,
    UserExternal,
    SupervisorExternal,
    VirtualSupervisorExternal,
    MachineExternal,
    SupervisorGuestExternal,
}

impl Interrupt {
    /// Returns the interrupt with the given cause number.
    pub fn from_cause(val: u64) -> Result<Self> {
        use Interrupt::*;
        match val {
            0 => Ok(UserSoft),
            1 => Ok(SupervisorSoft),
            2 => Ok(VirtualSupervisorSoft),
            3 => Ok(MachineSoft),
            4 => Ok(UserTimer),
            5 => Ok(SupervisorTimer),
            6 => Ok(VirtualSupervisorTimer),
            7 => Ok(MachineTimer),
            8 => Ok(UserExternal),
            9 => Ok(SupervisorExternal),
            10 => Ok(VirtualSupervisorExternal),
            11 => Ok(MachineExternal),
            12 => Ok(SupervisorGuestExternal),
            v => Err(Error::UnknownCause(v)),
        }
    }

    /// Returns the cause number of this interrupt.
    pub fn cause(&self) -> u64 {
        *self as u64
    }

    /// Returns true if this interrupt is delivered to VS-mode.
    pub fn is_virtual_supervisor(&self) -> bool {
        VS_INTERRUPT_BITS & (1 << self.cause()) != 0
    }

    /// Returns the hvip field used to make this interrupt pending for a guest.
    pub fn to_hvip_field(&self) -> Result<FieldValue<u64, hvip::Register>> {
        match self {
            Interrupt::VirtualSupervisorSoft => Ok(hvip::vssoft.val(1)),
            Interrupt::VirtualSupervisorTimer => Ok(hvip::vstimer.val(1)),
            Interrupt::VirtualSupervisorExternal => Ok(hvip::vsext.val(1)),
            _ => Err(Error::InvalidCause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tock_registers::LocalRegisterCopy;

    #[test]
    fn vs_interrupts() {
        let int = Interrupt::from_cause(6).unwrap();
        assert_eq!(int, Interrupt::VirtualSupervisorTimer);
        assert!(int.is_virtual_supervisor());
        let mut vip = LocalRegisterCopy::<u64, hvip::Register>::new(0);
        vip.modify(int.to_hvip_field().unwrap());
        assert_eq!(vip.get(), 1 << 6);
        let int = Interrupt::from_cause(9).unwrap();
        assert!(!int.is_virtual_supervisor());
        assert!(int.to_hvip_field().is_err());
        assert_eq!(Interrupt::from_cause(13), Err(Error::UnknownCause(13)));
    }
}
