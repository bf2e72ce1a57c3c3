// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # MSR device access
//!
//! Thin wrapper around the Linux `msr` driver. Each `/dev/cpu/<N>/msr`
//! file exposes the model specific registers of CPU N, one 64-bit little
//! endian value at the file offset equal to the register number. Reading or
//! writing it requires `CAP_SYS_RAWIO`.
//!
//! ```no_run
//!     use pstate_tweak::msr::Msr;
//!     let msr = Msr::open(0).unwrap();
//!     let hwcr = msr.read(0xc001_0015).unwrap();
//! ```

use anyhow::Context;
use anyhow::Result;
use log::trace;
use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::path::PathBuf;

#[derive(Debug)]
pub struct Msr {
    file: File,
    path: PathBuf,
}

impl Msr {
    /// Open the register file of `cpu`.
    pub fn open(cpu: usize) -> Result<Msr> {
        Self::open_path(Path::new(&format!("/dev/cpu/{cpu}/msr")))
    }

    pub fn open_path(path: &Path) -> Result<Msr> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open {:?}", path))?;
        Ok(Msr {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn read(&self, reg: u32) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.file
            .read_exact_at(&mut buf, reg as u64)
            .with_context(|| format!("Failed to read MSR {:#x} from {:?}", reg, self.path))?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn write(&self, reg: u32, val: u64) -> Result<()> {
        trace!("wrmsr {:?} {:#x} <- {:#018x}", self.path, reg, val);
        self.file
            .write_all_at(&val.to_le_bytes(), reg as u64)
            .with_context(|| format!("Failed to write MSR {:#x} to {:?}", reg, self.path))
    }

    /// Replace the bits selected by `mask` with the matching bits of `val`
    /// and return the value written.
    pub fn update_bits(&self, reg: u32, mask: u64, val: u64) -> Result<u64> {
        let new = (self.read(reg)? & !mask) | (val & mask);
        self.write(reg, new)?;
        Ok(new)
    }
}
