// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! General purpose registers for RISC-V 64.

/// Array of rv64 general purpose registers with accessors/setters.
/// Used to carry a guest hypervisor's register state across an emulated trap return.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct GeneralPurposeRegisters([u64; 32]);

/// Index of risc-v general purpose registers in `GeneralPurposeRegisters`.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GprIndex {
    Zero = 0,
    RA,
    SP,
    GP,
    TP,
    T0,
    T1,
    T2,
    S0,
    S1,
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    S8,
    S9,
    S10,
    S11,
    T3,
    T4,
    T5,
    T6,
}

impl GprIndex {
    pub fn from_raw(raw: u32) -> Option<Self> {
        use GprIndex::*;
        let index = match raw {
            0 => Zero,
            1 => RA,
            2 => SP,
            3 => GP,
            4 => TP,
            5 => T0,
            6 => T1,
            7 => T2,
            8 => S0,
            9 => S1,
            10 => A0,
            11 => A1,
            12 => A2,
            13 => A3,
            14 => A4,
            15 => A5,
            16 => A6,
            17 => A7,
            18 => S2,
            19 => S3,
            20 => S4,
            21 => S5,
            22 => S6,
            23 => S7,
            24 => S8,
            25 => S9,
            26 => S10,
            27 => S11,
            28 => T3,
            29 => T4,
            30 => T5,
            31 => T6,
            _ => {
                return None;
            }
        };
        Some(index)
    }
}

impl GeneralPurposeRegisters {
    /// Creates a register set from raw values indexed by `GprIndex`. The value for `x0` is
    /// discarded.
    pub fn from_raw(mut raw: [u64; 32]) -> Self {
        raw[GprIndex::Zero as usize] = 0;
        Self(raw)
    }

    /// Returns the value of the given register.
    pub fn reg(&self, reg_index: GprIndex) -> u64 {
        self.0[reg_index as usize]
    }

    /// Sets the value of the given register.
    pub fn set_reg(&mut self, reg_index: GprIndex, val: u64) {
        if reg_index == GprIndex::Zero {
            return;
        }

        self.0[reg_index as usize] = val;
    }

    /// Returns the argument registers.
    /// This is avoids many calls when an SBI handler needs all of the argmuent regs.
    pub fn a_regs(&self) -> &[u64] {
        &self.0[GprIndex::A0 as usize..=GprIndex::A7 as usize]
    }

    /// Returns the arguments register as a mutable.
    pub fn a_regs_mut(&mut self) -> &mut [u64] {
        &mut self.0[GprIndex::A0 as usize..=GprIndex::A7 as usize]
    }

    /// Returns all 32 registers, `x0` first.
    pub fn as_raw(&self) -> &[u64; 32] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_register_is_hardwired() {
        let mut raw = [7u64; 32];
        raw[5] = 0x55;
        let mut gprs = GeneralPurposeRegisters::from_raw(raw);
        assert_eq!(gprs.reg(GprIndex::Zero), 0);
        assert_eq!(gprs.reg(GprIndex::T0), 0x55);
        gprs.set_reg(GprIndex::Zero, 1);
        assert_eq!(gprs.reg(GprIndex::Zero), 0);
    }

    #[test]
    fn argument_registers() {
        let mut gprs = GeneralPurposeRegisters::default();
        gprs.set_reg(GprIndex::A0, 1);
        gprs.set_reg(GprIndex::A7, 8);
        assert_eq!(gprs.a_regs().len(), 8);
        assert_eq!(gprs.a_regs()[0], 1);
        assert_eq!(gprs.a_regs()[7], 8);
        gprs.a_regs_mut()[1] = 2;
        assert_eq!(gprs.reg(GprIndex::A1), 2);
        assert_eq!(GprIndex::from_raw(17), Some(GprIndex::A7));
        assert_eq!(GprIndex::from_raw(32), None);
    }
}
