// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! CSR numbers for the HS and VS-level registers, and privilege levels.

// VS-level CSRs.
pub const CSR_VSSTATUS: u16 = 0x200;
pub const CSR_VSIE: u16 = 0x204;
pub const CSR_VSTVEC: u16 = 0x205;
pub const CSR_VSSCRATCH: u16 = 0x240;
pub const CSR_VSEPC: u16 = 0x241;
pub const CSR_VSCAUSE: u16 = 0x242;
pub const CSR_VSTVAL: u16 = 0x243;
pub const CSR_VSIP: u16 = 0x244;
pub const CSR_VSTIMECMP: u16 = 0x24d;
pub const CSR_VSISELECT: u16 = 0x250;
pub const CSR_VSIREG: u16 = 0x251;
pub const CSR_VSTOPEI: u16 = 0x25c;
pub const CSR_VSATP: u16 = 0x280;
pub const CSR_VSTOPI: u16 = 0xeb0;

// HS-level CSRs.
pub const CSR_HSTATUS: u16 = 0x600;
pub const CSR_HEDELEG: u16 = 0x602;
pub const CSR_HIDELEG: u16 = 0x603;
pub const CSR_HIE: u16 = 0x604;
pub const CSR_HTIMEDELTA: u16 = 0x605;
pub const CSR_HCOUNTEREN: u16 = 0x606;
pub const CSR_HGEIE: u16 = 0x607;
pub const CSR_HENVCFG: u16 = 0x60a;
pub const CSR_HTVAL: u16 = 0x643;
pub const CSR_HIP: u16 = 0x644;
pub const CSR_HVIP: u16 = 0x645;
pub const CSR_HTINST: u16 = 0x64a;
pub const CSR_HGATP: u16 = 0x680;
pub const CSR_HGEIP: u16 = 0xe12;

/// The largest valid CSR number.
pub const CSR_NUM_MAX: u16 = 0xfff;

/// RISC-V privilege levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrivilegeLevel {
    User = 0,
    Supervisor = 1,
    Machine = 3,
}

impl PrivilegeLevel {
    /// Returns the privilege level encoded by bits [9:8] of a CSR number, which is the lowest
    /// privilege level allowed to access that CSR.
    pub fn from_csr_num(csr_num: u16) -> Option<Self> {
        match (csr_num >> 8) & 0x3 {
            0 => Some(PrivilegeLevel::User),
            // Hypervisor CSRs are encoded as 2 but are accessed from (H)S-mode.
            1 | 2 => Some(PrivilegeLevel::Supervisor),
            3 => Some(PrivilegeLevel::Machine),
            _ => None,
        }
    }

    /// Returns true if `csr_num` is a read-only CSR, encoded by bits [11:10] being 0b11.
    pub fn csr_is_read_only(csr_num: u16) -> bool {
        (csr_num >> 10) & 0x3 == 0x3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csr_encoding() {
        assert_eq!(
            PrivilegeLevel::from_csr_num(CSR_VSATP),
            Some(PrivilegeLevel::Supervisor)
        );
        assert_eq!(
            PrivilegeLevel::from_csr_num(CSR_HGATP),
            Some(PrivilegeLevel::Supervisor)
        );
        assert_eq!(
            PrivilegeLevel::from_csr_num(0x300),
            Some(PrivilegeLevel::Machine)
        );
        assert!(PrivilegeLevel::csr_is_read_only(CSR_HGEIP));
        assert!(PrivilegeLevel::csr_is_read_only(CSR_VSTOPI));
        assert!(!PrivilegeLevel::csr_is_read_only(CSR_HSTATUS));
    }
}
