// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Change sets
//!
//! A [`ChangeSet`] is the complete, validated description of what one
//! invocation wants to change. It mirrors the hardware tables: one
//! [`PStateChange`] per P-state and one [`NbPStateChange`] per northbridge
//! P-state, each with every field unset until a directive sets it.
//!
//! Change sets are built by [`ChangeSet::from_directives`] and are
//! read-only afterwards.

use log::info;
use serde::Serialize;

/// Requested changes for one core P-state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PStateChange {
    index: usize,
    /// Scaled frequency multiplier.
    pub multiplier: Option<f64>,
    /// Encoded core voltage identifier.
    pub vid: Option<u32>,
    /// Encoded northbridge voltage identifier. Never set by a directive, it
    /// is derived at apply time on families which carry the NB voltage in
    /// the core P-state registers.
    pub nb_vid: Option<u32>,
    /// Northbridge P-state this P-state is associated with.
    pub nb_pstate: Option<usize>,
}

impl PStateChange {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            multiplier: None,
            vid: None,
            nb_vid: None,
            nb_pstate: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Does this entry request any register change at all?
    pub fn has_changes(&self) -> bool {
        self.multiplier.is_some()
            || self.vid.is_some()
            || self.nb_vid.is_some()
            || self.nb_pstate.is_some()
    }
}

/// Requested changes for one northbridge P-state. The multiplier is in the
/// northbridge's raw units and is not scaled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NbPStateChange {
    index: usize,
    pub multiplier: Option<f64>,
    pub vid: Option<u32>,
}

impl NbPStateChange {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            multiplier: None,
            vid: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn has_changes(&self) -> bool {
        self.multiplier.is_some() || self.vid.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSet {
    pstates: Vec<PStateChange>,
    nb_pstates: Vec<NbPStateChange>,
    target_pstate: Option<usize>,
    boost: Option<bool>,
    apm: Option<bool>,
}

impl ChangeSet {
    /// Build an empty change set sized for the given tables.
    pub fn new(nr_pstates: usize, nr_nb_pstates: usize) -> Self {
        Self {
            pstates: (0..nr_pstates).map(PStateChange::new).collect(),
            nb_pstates: (0..nr_nb_pstates).map(NbPStateChange::new).collect(),
            target_pstate: None,
            boost: None,
            apm: None,
        }
    }

    pub fn pstates(&self) -> &[PStateChange] {
        &self.pstates
    }

    pub fn nb_pstates(&self) -> &[NbPStateChange] {
        &self.nb_pstates
    }

    pub fn pstate(&self, index: usize) -> Option<&PStateChange> {
        self.pstates.get(index)
    }

    pub fn nb_pstate(&self, index: usize) -> Option<&NbPStateChange> {
        self.nb_pstates.get(index)
    }

    /// P-state every CPU should be switched to once the tables are written.
    pub fn target_pstate(&self) -> Option<usize> {
        self.target_pstate
    }

    /// Requested core performance boost state.
    pub fn boost(&self) -> Option<bool> {
        self.boost
    }

    /// Requested APM state.
    pub fn apm(&self) -> Option<bool> {
        self.apm
    }

    /// True if applying this change set would not write anything.
    pub fn is_empty(&self) -> bool {
        !self.pstates.iter().any(|p| p.has_changes())
            && !self.nb_pstates.iter().any(|p| p.has_changes())
            && self.target_pstate.is_none()
            && self.boost.is_none()
            && self.apm.is_none()
    }

    pub(crate) fn pstate_mut(&mut self, index: usize) -> Option<&mut PStateChange> {
        self.pstates.get_mut(index)
    }

    pub(crate) fn nb_pstate_mut(&mut self, index: usize) -> Option<&mut NbPStateChange> {
        self.nb_pstates.get_mut(index)
    }

    pub(crate) fn set_target_pstate(&mut self, index: usize) {
        self.target_pstate = Some(index);
    }

    pub(crate) fn set_boost(&mut self, enabled: bool) {
        self.boost = Some(enabled);
    }

    pub(crate) fn set_apm(&mut self, enabled: bool) {
        self.apm = Some(enabled);
    }

    /// Associate P-states below `nr_low` with NB P0 and the rest with NB P1.
    pub(crate) fn set_nb_low(&mut self, nr_low: usize) {
        for ps in self.pstates.iter_mut() {
            ps.nb_pstate = Some(if ps.index < nr_low { 0 } else { 1 });
        }
    }

    pub fn log_summary(&self) {
        if self.is_empty() {
            info!("No changes requested");
            return;
        }

        for ps in self.pstates.iter().filter(|p| p.has_changes()) {
            info!(
                "P{}: multi={} vid={} nb_pstate={}",
                ps.index,
                fmt_opt(ps.multiplier),
                fmt_opt(ps.vid),
                fmt_opt(ps.nb_pstate)
            );
        }
        for nb in self.nb_pstates.iter().filter(|p| p.has_changes()) {
            info!(
                "NB_P{}: multi={} vid={}",
                nb.index,
                fmt_opt(nb.multiplier),
                fmt_opt(nb.vid)
            );
        }
        if let Some(target) = self.target_pstate {
            info!("Switch to P{}", target);
        }
        if let Some(boost) = self.boost {
            info!("Turbo: {}", if boost { "on" } else { "off" });
        }
        if let Some(apm) = self.apm {
            info!("APM: {}", if apm { "on" } else { "off" });
        }
    }
}

fn fmt_opt<T: std::fmt::Display>(v: Option<T>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => "-".to_string(),
    }
}
