// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Applying a change set
//!
//! The order below matters and must not be shuffled:
//!
//! 1. Northbridge P-state table (15h). Written before the reference state
//!    check, so it is kept even when the check aborts.
//! 2. Per-P-state northbridge VIDs are derived from the NB table (10h).
//! 3. The multiplier of the first non-boost P-state, which clocks the TSC,
//!    must not change unless explicitly allowed. Changing it resets the TSC
//!    and consumers of the TSC stay broken until the boot frequency is
//!    restored.
//! 4. Package wide boost source and APM.
//! 5. The thread is moved to realtime priority until we are done.
//! 6. Every CPU gets its P-state table and CPB disable bit written.
//! 7. Every CPU is switched to its new P-state. A CPU already sitting in a
//!    P-state that was just rewritten is bounced through another P-state so
//!    the hardware picks up the new values.
//!
//! Steps 6 and 7 are separate passes. The second one must only start once
//! the tables are written on every CPU.

use crate::ChangeSet;
use crate::Hardware;
use crate::PStateChange;
use crate::Platform;
use crate::SchedPolicy;
use crate::TweakError;
use anyhow::Context;
use anyhow::Result;
use log::debug;
use log::info;
use log::warn;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ApplyOpts {
    /// Allow retuning the multiplier of the TSC reference P-state.
    pub allow_reference_change: bool,
    /// Delay between the two switches used to re-latch a P-state.
    pub settle: Duration,
}

impl Default for ApplyOpts {
    fn default() -> Self {
        Self {
            allow_reference_change: false,
            settle: Duration::from_millis(1),
        }
    }
}

pub struct Applier<'a, H: Hardware, P: Platform> {
    hw: &'a H,
    platform: &'a P,
    opts: ApplyOpts,
}

/// Restores the saved scheduling policy when dropped.
struct PriorityGuard<'a, P: Platform> {
    platform: &'a P,
    prev: Option<SchedPolicy>,
}

impl<'a, P: Platform> PriorityGuard<'a, P> {
    fn raise(platform: &'a P) -> Self {
        let prev = match platform.raise_priority() {
            Ok(prev) => {
                debug!("Raised priority (previous {:?})", prev);
                Some(prev)
            }
            Err(e) => {
                warn!("Failed to raise priority, continuing at current priority ({:#})", e);
                None
            }
        };
        Self { platform, prev }
    }
}

impl<'a, P: Platform> Drop for PriorityGuard<'a, P> {
    fn drop(&mut self) {
        if let Some(prev) = self.prev.take() {
            match self.platform.restore_priority(prev) {
                Ok(()) => debug!("Restored priority {:?}", prev),
                Err(e) => warn!("{:#}", e),
            }
        }
    }
}

impl<'a, H: Hardware, P: Platform> Applier<'a, H, P> {
    pub fn new(hw: &'a H, platform: &'a P, opts: ApplyOpts) -> Self {
        Self { hw, platform, opts }
    }

    /// Apply `cs` to every CPU.
    ///
    /// Fails with [`TweakError::ReferenceStateChange`] before any core
    /// register is written if `cs` retunes the TSC reference state without
    /// permission. Errors from the hardware or platform are returned as is.
    pub fn apply(&self, cs: &ChangeSet) -> Result<()> {
        self.write_nb_pstates(cs)?;

        let pstates = self.derive_nb_vids(cs)?;

        self.check_reference_pstate(&pstates)?;

        self.set_global_toggles(cs)?;

        let nr_cpus = self.platform.nr_cpus();
        info!("Applying changes on {} CPUs", nr_cpus);

        let _prio = PriorityGuard::raise(self.platform);

        for cpu in 0..nr_cpus {
            self.platform
                .with_bound_cpu(cpu, || self.write_core_tables(cs, &pstates, cpu))?;
        }

        for cpu in 0..nr_cpus {
            self.platform
                .with_bound_cpu(cpu, || self.select_pstate(cs, &pstates, cpu))?;
        }

        Ok(())
    }

    fn write_nb_pstates(&self, cs: &ChangeSet) -> Result<()> {
        if !self.hw.info().has_nb_pstate_table() {
            return Ok(());
        }

        for nb in cs.nb_pstates().iter().filter(|nb| nb.has_changes()) {
            debug!("Writing NB_P{}", nb.index());
            self.hw
                .write_nb_pstate(nb)
                .with_context(|| format!("Failed to write NB_P{}", nb.index()))?;
        }
        Ok(())
    }

    /// Copy of the P-state table with `nb_vid` filled in from the NB
    /// P-state each P-state is, or will be, associated with.
    fn derive_nb_vids(&self, cs: &ChangeSet) -> Result<Vec<PStateChange>> {
        let mut pstates = cs.pstates().to_vec();

        if !self.hw.info().has_per_pstate_nb_vid()
            || !cs.nb_pstates().iter().any(|nb| nb.vid.is_some())
        {
            return Ok(pstates);
        }

        for ps in pstates.iter_mut() {
            let nb_index = match ps.nb_pstate {
                Some(nb_index) => nb_index,
                None => self.hw.read_pstate(ps.index())?.nb_pstate,
            };

            match cs.nb_pstate(nb_index) {
                Some(nb) => {
                    if let Some(vid) = nb.vid {
                        ps.nb_vid = Some(vid);
                    }
                }
                None => warn!(
                    "P{} is associated with unknown NB_P{}, leaving its NB VID alone",
                    ps.index(),
                    nb_index
                ),
            }
        }

        Ok(pstates)
    }

    fn check_reference_pstate(&self, pstates: &[PStateChange]) -> Result<()> {
        let index = self.hw.info().reference_pstate();
        let requested = match pstates.get(index).and_then(|ps| ps.multiplier) {
            Some(requested) => requested,
            None => return Ok(()),
        };

        let current = self.hw.read_pstate(index)?.multiplier;
        if requested == current {
            return Ok(());
        }

        if self.opts.allow_reference_change {
            warn!(
                "Changing multiplier of P{} from {} to {}, the TSC will be reset",
                index, current, requested
            );
            return Ok(());
        }

        Err(TweakError::ReferenceStateChange {
            index,
            current,
            requested,
        }
        .into())
    }

    fn set_global_toggles(&self, cs: &ChangeSet) -> Result<()> {
        let info = self.hw.info();

        if let Some(boost) = cs.boost() {
            if info.boost_supported {
                self.hw.set_boost_source(boost)?;
            } else {
                warn!("Core performance boost not supported, ignoring Turbo");
            }
        }

        if let Some(apm) = cs.apm() {
            if info.apm_supported() {
                self.hw.set_apm(apm)?;
            } else {
                warn!("APM not supported on family {:#x}, ignoring", info.family);
            }
        }

        Ok(())
    }

    fn write_core_tables(&self, cs: &ChangeSet, pstates: &[PStateChange], cpu: usize) -> Result<()> {
        for ps in pstates.iter().filter(|ps| ps.has_changes()) {
            self.hw
                .write_pstate(ps)
                .with_context(|| format!("Failed to write P{} on CPU {}", ps.index(), cpu))?;
        }

        if let Some(boost) = cs.boost() {
            if self.hw.info().boost_supported {
                self.hw
                    .set_cpb_disabled(!boost)
                    .with_context(|| format!("Failed to set CPB on CPU {}", cpu))?;
            }
        }

        Ok(())
    }

    fn select_pstate(&self, cs: &ChangeSet, pstates: &[PStateChange], cpu: usize) -> Result<()> {
        let current = self.hw.current_pstate()?;
        let desired = cs.target_pstate().unwrap_or(current);

        if desired != current {
            debug!("CPU {}: P{} -> P{}", cpu, current, desired);
            return self.hw.set_current_pstate(desired);
        }

        if pstates.get(current).is_some_and(|ps| ps.has_changes()) {
            let last = self.hw.info().nr_pstates.saturating_sub(1);
            let temp = if current == last { 0 } else { last };
            debug!("CPU {}: re-latching P{} through P{}", cpu, current, temp);
            self.hw.set_current_pstate(temp)?;
            self.platform.settle(self.opts.settle);
            self.hw.set_current_pstate(current)?;
        }

        Ok(())
    }
}
