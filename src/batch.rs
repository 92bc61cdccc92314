// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Execution of `BatchExecute` descriptor arrays.

use core::ptr::{addr_of, addr_of_mut, NonNull};
use sbi_rs::{BatchDescriptor, BatchTag, Error as SbiError, NACL_SHMEM_SIZE};

use crate::hfence::{self, HfenceSelect};
use crate::host::NaclHost;
use crate::shmem::{ranges_overlap, GuestMemory, GuestMemoryError, ShmemRegion};
use crate::validator::{self, AccessValidator, Untrusted};

/// Alignment required of the descriptor array.
pub const BATCH_ALIGN: u64 = 8;
const DESC_SIZE: u64 = core::mem::size_of::<BatchDescriptor>() as u64;

/// Errors that prevent any descriptor in a batch from running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// No shared-memory area is registered.
    NoSession,
    /// More descriptors than the configured maximum.
    TooMany(u64),
    /// The array address is misaligned or the array wraps.
    Address(validator::Error),
    /// The array overlaps the registered shared-memory area at the given address.
    SharedArea(u64),
    /// The array couldn't be mapped.
    Map(GuestMemoryError),
    /// The array was mapped at a host address that can't hold descriptors.
    BadMapping(u64),
    /// A descriptor has an unknown tag.
    UnknownTag {
        /// Position of the descriptor in the array.
        index: usize,
        /// The tag.
        tag: u64,
    },
}

impl From<Error> for SbiError {
    fn from(error: Error) -> SbiError {
        use Error::*;
        match error {
            NoSession => SbiError::NoShmem,
            TooMany(_) | UnknownTag { .. } => SbiError::InvalidParam,
            Address(e) => e.into(),
            SharedArea(_) => SbiError::InvalidAddress,
            Map(e) => e.into(),
            BadMapping(_) => SbiError::Failed,
        }
    }
}

/// Holds the result of a batch.
pub type Result<T> = core::result::Result<T, Error>;

/// A decoded batch descriptor. Operands are still unchecked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchOp {
    /// Read a CSR into `arg1`.
    CsrRead {
        /// CSR number.
        csr: Untrusted<u64>,
    },
    /// Write a CSR.
    CsrWrite {
        /// CSR number.
        csr: Untrusted<u64>,
        /// New value.
        value: Untrusted<u64>,
    },
    /// Process one entry of the HFENCE list.
    Hfence {
        /// Index into the HFENCE list.
        entry: Untrusted<u64>,
    },
    /// Inject an interrupt.
    InjectInterrupt {
        /// One of `NaclInterruptKind`.
        kind: Untrusted<u64>,
        /// Interrupt number.
        number: Untrusted<u64>,
        /// Target hart.
        target: Untrusted<u64>,
    },
}

impl BatchOp {
    /// Decodes `desc`, returning `None` if its tag is unknown.
    pub fn decode(desc: &BatchDescriptor) -> Option<Self> {
        let op = match BatchTag::from_raw(desc.tag)? {
            BatchTag::CsrRead => BatchOp::CsrRead {
                csr: Untrusted::new(desc.arg0),
            },
            BatchTag::CsrWrite => BatchOp::CsrWrite {
                csr: Untrusted::new(desc.arg0),
                value: Untrusted::new(desc.arg1),
            },
            BatchTag::Hfence => BatchOp::Hfence {
                entry: Untrusted::new(desc.arg0),
            },
            BatchTag::InjectInterrupt => BatchOp::InjectInterrupt {
                kind: Untrusted::new(desc.arg0 >> 32),
                number: Untrusted::new(desc.arg0 & 0xffff_ffff),
                target: Untrusted::new(desc.arg1),
            },
        };
        Some(op)
    }
}

/// Tally of a completed batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Descriptors that completed successfully.
    pub succeeded: u64,
    /// Descriptors that failed.
    pub failed: u64,
    /// Failures due to values rejected by the validator.
    pub denied: u64,
    /// HFENCE entries processed.
    pub fences: u64,
    /// Interrupts injected.
    pub interrupts: u64,
}

// What a successful operation produced.
enum OpOutput {
    None,
    Value(u64),
    Fences(usize),
    Interrupt,
}

/// Runs batches of operations submitted by the guest hypervisor.
#[derive(Clone, Copy, Debug)]
pub struct BatchInterpreter {
    max_len: u64,
}

impl BatchInterpreter {
    /// Creates an interpreter accepting up to `max_len` descriptors per batch.
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len as u64,
        }
    }

    /// Runs the `count` descriptors at guest physical address `addr` in order, writing the status
    /// of each to its `ret` field. A failing descriptor doesn't stop the batch. Nothing runs if the
    /// array can't be accessed, overlaps one of the registered shared-memory areas in `claimed`,
    /// or contains an unknown tag.
    #[allow(clippy::too_many_arguments)]
    pub fn execute<H: NaclHost, M: GuestMemory + ?Sized>(
        &self,
        region: Option<&mut ShmemRegion>,
        validator: &AccessValidator,
        host: &mut H,
        mem: &M,
        claimed: &[u64],
        addr: u64,
        count: u64,
    ) -> Result<BatchSummary> {
        let region = region.ok_or(Error::NoSession)?;
        if count > self.max_len {
            return Err(Error::TooMany(count));
        }
        let len = count * DESC_SIZE;
        let addr = validator
            .check_guest_range(Untrusted::new(addr), len, BATCH_ALIGN)
            .map_err(Error::Address)?;
        if count == 0 {
            return Ok(BatchSummary::default());
        }
        // Results are written back into the array, which must not land in any hart's area.
        if let Some(gpa) = claimed
            .iter()
            .find(|gpa| ranges_overlap(addr, len, **gpa, NACL_SHMEM_SIZE as u64))
        {
            return Err(Error::SharedArea(*gpa));
        }
        let ptr = mem.map(addr, len).map_err(Error::Map)?;
        let result = Self::descriptors(ptr, addr).and_then(|descs| {
            // Safety: `descs` points to `count` descriptors that stay mapped until `unmap` below.
            unsafe {
                Self::prescan(descs, count as usize)?;
                Ok(self.run_all(descs, count as usize, region, validator, host))
            }
        });
        mem.unmap(addr, len);
        result
    }

    fn descriptors(ptr: NonNull<u8>, addr: u64) -> Result<*mut BatchDescriptor> {
        if ptr
            .as_ptr()
            .align_offset(core::mem::align_of::<BatchDescriptor>())
            != 0
        {
            return Err(Error::BadMapping(addr));
        }
        Ok(ptr.as_ptr() as *mut BatchDescriptor)
    }

    // Safety: `descs` must point to `count` mapped descriptors.
    unsafe fn read_desc(descs: *mut BatchDescriptor, index: usize) -> BatchDescriptor {
        descs.add(index).read_volatile()
    }

    // Checks every tag before anything runs.
    unsafe fn prescan(descs: *mut BatchDescriptor, count: usize) -> Result<()> {
        for index in 0..count {
            let tag = addr_of!((*descs.add(index)).tag).read_volatile();
            if BatchTag::from_raw(tag).is_none() {
                return Err(Error::UnknownTag { index, tag });
            }
        }
        Ok(())
    }

    unsafe fn run_all<H: NaclHost>(
        &self,
        descs: *mut BatchDescriptor,
        count: usize,
        region: &mut ShmemRegion,
        validator: &AccessValidator,
        host: &mut H,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for index in 0..count {
            let desc = Self::read_desc(descs, index);
            let result = BatchOp::decode(&desc)
                .ok_or(SbiError::InvalidParam)
                .and_then(|op| self.run_op(op, region, validator, host));
            let desc_ptr = descs.add(index);
            match result {
                Ok(output) => {
                    summary.succeeded += 1;
                    match output {
                        OpOutput::Value(val) => addr_of_mut!((*desc_ptr).arg1).write_volatile(val),
                        OpOutput::Fences(n) => summary.fences += n as u64,
                        OpOutput::Interrupt => summary.interrupts += 1,
                        OpOutput::None => (),
                    }
                    addr_of_mut!((*desc_ptr).ret).write_volatile(0);
                }
                Err(e) => {
                    summary.failed += 1;
                    if e == SbiError::Denied {
                        summary.denied += 1;
                    }
                    addr_of_mut!((*desc_ptr).ret).write_volatile(e.to_code() as u64);
                }
            }
        }
        summary
    }

    fn run_op<H: NaclHost>(
        &self,
        op: BatchOp,
        region: &mut ShmemRegion,
        validator: &AccessValidator,
        host: &mut H,
    ) -> core::result::Result<OpOutput, SbiError> {
        let output = match op {
            BatchOp::CsrRead { csr } => {
                let read = validator.check_csr_read(csr)?;
                OpOutput::Value(host.read_csr(&read)?)
            }
            BatchOp::CsrWrite { csr, value } => {
                let write = validator.check_csr_write(csr, value)?;
                host.write_csr(&write)?;
                OpOutput::None
            }
            BatchOp::Hfence { entry } => {
                let slot = validator.check_hfence_slot(entry)?;
                let count = hfence::sync(region, validator, host, HfenceSelect::Entry(slot))?;
                OpOutput::Fences(count)
            }
            BatchOp::InjectInterrupt {
                kind,
                number,
                target,
            } => {
                let request = validator.check_interrupt(kind, number, target)?;
                host.inject_interrupt(&request)?;
                OpOutput::Interrupt
            }
        };
        Ok(output)
    }
}
