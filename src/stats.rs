// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use sbi_rs::NaclStatId;

/// Per-hart counters reported through `GetStatistic`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NaclStats {
    counters: [u64; NaclStatId::COUNT],
}

impl NaclStats {
    /// Increments `id` by one.
    pub fn inc(&mut self, id: NaclStatId) {
        self.add(id, 1);
    }

    /// Increments `id` by `count`.
    pub fn add(&mut self, id: NaclStatId, count: u64) {
        let c = &mut self.counters[id as usize];
        *c = c.wrapping_add(count);
    }

    /// Returns the value of `id`.
    pub fn get(&self, id: NaclStatId) -> u64 {
        self.counters[id as usize]
    }

    /// Returns the value of `id`, resetting it to zero if `clear` is set.
    pub fn read(&mut self, id: NaclStatId, clear: bool) -> u64 {
        let val = self.get(id);
        if clear {
            self.counters[id as usize] = 0;
        }
        val
    }
}
