// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Bitfields of the CSRs a guest hypervisor can reach through the NACL shared-memory area. Only
//! the fields the host inspects are described.

use tock_registers::register_bitfields;

// sstatus, and vsstatus as seen by the guest hypervisor.
register_bitfields![u64,
    pub sstatus [
        sie OFFSET(1) NUMBITS(1) [],
        spie OFFSET(5) NUMBITS(1) [],
        // Set if the trap was taken from S-mode; `sret` returns there.
        spp OFFSET(8) NUMBITS(1) [
            User = 0,
            Supervisor = 1,
        ],
        // XLEN of U-mode. Only RV64 guests are supported.
        uxl OFFSET(32) NUMBITS(2) [
            Xlen32 = 1,
            Xlen64 = 2,
        ],
    ]
];

// Layout shared by stvec and vstvec.
register_bitfields![u64,
    pub stvec [
        mode OFFSET(0) NUMBITS(2) [
            Direct = 0,
            Vectored = 1
        ],
        base OFFSET(2) NUMBITS(62) [],
    ]
];

// Layout shared by satp and vsatp.
register_bitfields![u64,
    pub satp [
        ppn OFFSET(0) NUMBITS(44) [],
        asid OFFSET(44) NUMBITS(16) [],
        mode OFFSET(60) NUMBITS(4) [
            Bare = 0,
            Sv39 = 8,
            Sv48 = 9,
            Sv57 = 10,
            Sv64 = 11,
        ],
    ]
];

register_bitfields![u64,
    pub hstatus [
        spv OFFSET(7) NUMBITS(1) [],
        spvp OFFSET(8) NUMBITS(1) [],
        vgein OFFSET(12) NUMBITS(6) [],
        // XLEN of VS-mode; fixed at RV64.
        vsxl OFFSET(32) NUMBITS(2) [
            Xlen32 = 1,
            Xlen64 = 2,
        ],
    ]
];

register_bitfields![u64,
    pub hie [
        vssoft OFFSET(2) NUMBITS(1) [],
        vstimer OFFSET(6) NUMBITS(1) [],
        vsext OFFSET(10) NUMBITS(1) [],
        // Supervisor guest external interrupts.
        sgext OFFSET(12) NUMBITS(1) [],
    ]
];

// Pending VS-level interrupts injected by the hypervisor. hideleg uses the same bits.
register_bitfields![u64,
    pub hvip [
        vssoft OFFSET(2) NUMBITS(1) [],
        vstimer OFFSET(6) NUMBITS(1) [],
        vsext OFFSET(10) NUMBITS(1) [],
    ]
];

// G-stage translation. The VMID is 14 bits wide in Sv*x4 modes.
register_bitfields![u64,
    pub hgatp [
        ppn OFFSET(0) NUMBITS(44) [],
        vmid OFFSET(44) NUMBITS(14) [],
        mode OFFSET(60) NUMBITS(4) [
            Bare = 0,
            Sv39x4 = 8,
            Sv48x4 = 9,
            Sv57x4 = 10,
        ],
    ]
];

/// Bits of the interrupt-pending and enable registers that belong to VS-level interrupts.
pub const VS_INTERRUPT_BITS: u64 =
    hvip::vssoft::SET.value | hvip::vstimer::SET.value | hvip::vsext::SET.value;

/// Bits of hedeleg that are read-only zero: S-, VS- and M-mode ecalls and the guest-page faults.
pub const HEDELEG_READ_ONLY_ZERO: u64 = (0b111 << 9) | (0xf << 20);

#[cfg(test)]
mod tests {
    use super::*;
    use tock_registers::LocalRegisterCopy;

    #[test]
    fn vs_interrupt_bits() {
        assert_eq!(VS_INTERRUPT_BITS, 0x444);
        assert_eq!(hie::sgext::SET.value, 1 << 12);
    }

    #[test]
    fn mode_fields() {
        let reg = LocalRegisterCopy::<u64, hgatp::Register>::new((8 << 60) | (5 << 44));
        assert!(matches!(
            reg.read_as_enum(hgatp::mode),
            Some(hgatp::mode::Value::Sv39x4)
        ));
        assert_eq!(reg.read(hgatp::vmid), 5);
        let vstvec = LocalRegisterCopy::<u64, stvec::Register>::new(0x8000_0003);
        assert!(vstvec
            .read_as_enum::<stvec::mode::Value>(stvec::mode)
            .is_none());
    }
}
