// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Hardware capability
//!
//! The register layer is supplied by the caller. [`Capabilities`] is the
//! static description needed to parse directives, [`Hardware`] adds the
//! register accessors needed to apply them. Core-local accessors act on the
//! CPU the calling thread is currently bound to.

use crate::NbPStateChange;
use crate::PStateChange;
use anyhow::Result;

pub const FAMILY_10H: u32 = 0x10;
pub const FAMILY_15H: u32 = 0x15;

#[derive(Debug, Clone, PartialEq)]
pub struct HwInfo {
    /// Processor family, e.g. [`FAMILY_15H`].
    pub family: u32,
    pub nr_pstates: usize,
    pub nr_nb_pstates: usize,
    /// Number of boost P-states at the top of the table. The first P-state
    /// after them clocks the TSC.
    pub nr_boost_states: usize,
    pub boost_supported: bool,
    /// Factor applied to user supplied core multipliers.
    pub multi_scale: f64,
}

impl HwInfo {
    /// Index of the highest non-boost P-state, the one tied to the TSC.
    pub fn reference_pstate(&self) -> usize {
        self.nr_boost_states
    }

    /// The northbridge P-states live in their own registers.
    pub fn has_nb_pstate_table(&self) -> bool {
        self.family == FAMILY_15H
    }

    /// The northbridge voltage is carried in each core P-state register.
    pub fn has_per_pstate_nb_vid(&self) -> bool {
        self.family == FAMILY_10H
    }

    pub fn apm_supported(&self) -> bool {
        self.family == FAMILY_15H
    }
}

/// Live contents of a core P-state register.
#[derive(Debug, Clone, PartialEq)]
pub struct PStateSnapshot {
    pub index: usize,
    pub multiplier: f64,
    pub vid: u32,
    pub nb_pstate: usize,
}

pub trait Capabilities {
    fn info(&self) -> &HwInfo;

    /// Encode a voltage in volts into a voltage identifier.
    fn encode_vid(&self, volts: f64) -> u32;
}

pub trait Hardware: Capabilities {
    fn read_pstate(&self, index: usize) -> Result<PStateSnapshot>;

    /// Write the set fields of `change` into the P-state register of the
    /// current CPU, leaving unset fields untouched.
    fn write_pstate(&self, change: &PStateChange) -> Result<()>;

    fn write_nb_pstate(&self, change: &NbPStateChange) -> Result<()>;

    /// Index of the P-state the current CPU is running at.
    fn current_pstate(&self) -> Result<usize>;

    fn set_current_pstate(&self, index: usize) -> Result<()>;

    /// Package wide boost source enable.
    fn set_boost_source(&self, enabled: bool) -> Result<()>;

    /// Core performance boost disable bit of the current CPU.
    fn set_cpb_disabled(&self, disabled: bool) -> Result<()>;

    fn set_apm(&self, enabled: bool) -> Result<()>;
}
