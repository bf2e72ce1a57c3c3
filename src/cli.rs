// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! CLI argument utilities for P-state retuning tools.
//!

use crate::Applier;
use crate::ApplyOpts;
use crate::Capabilities;
use crate::ChangeSet;
use crate::Hardware;
use crate::Platform;
use anyhow::bail;
use anyhow::Result;
use clap::Args;
use std::time::Duration;

/// P-state retuning arguments, meant to be flattened into a tool's `Parser`.
#[derive(Args, Debug, Clone)]
pub struct TweakArgs {
    /// Directives applied in order, later ones override earlier ones.
    ///
    /// Examples:
    ///   P1=18@1.1     (P1 at multiplier 18 and 1.1V)
    ///   NB_P0=@1.05   (NB P0 at 1.05V, multiplier unchanged)
    ///   NB_low=2      (P0-P1 use NB P0, the others NB P1)
    ///   Turbo=0       (disable core performance boost)
    ///   APM=1         (enable APM)
    ///   P2            (switch to P2 afterwards)
    #[clap(value_name = "DIRECTIVE", verbatim_doc_comment)]
    pub directives: Vec<String>,

    /// Allow changing the multiplier of the first non-boost P-state. The TSC
    /// runs off that P-state and will be reset.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    pub allow_reference_change: bool,

    /// Delay between the two switches used to reload a rewritten P-state, in
    /// microseconds.
    #[clap(long, default_value = "1000")]
    pub settle_us: u64,

    /// Print the parsed changes as JSON and exit without touching the
    /// hardware.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    pub print_plan: bool,
}

impl TweakArgs {
    pub fn validate(&self) -> Result<()> {
        if self.directives.is_empty() {
            bail!("No directives given");
        }
        if self.settle_us > 1_000_000 {
            bail!("Settle delay ({}us) must not exceed one second", self.settle_us);
        }
        Ok(())
    }

    pub fn apply_opts(&self) -> ApplyOpts {
        ApplyOpts {
            allow_reference_change: self.allow_reference_change,
            settle: Duration::from_micros(self.settle_us),
        }
    }

    /// Parse the directives against `caps`.
    pub fn plan<C: Capabilities + ?Sized>(&self, caps: &C) -> Result<ChangeSet> {
        self.validate()?;
        Ok(ChangeSet::from_directives(caps, self.directives.as_slice())?)
    }

    /// Parse the directives and apply them, or only print them with
    /// `--print-plan`.
    pub fn run<H: Hardware, P: Platform>(&self, hw: &H, platform: &P) -> Result<()> {
        let cs = self.plan(hw)?;

        if self.print_plan {
            println!("{}", serde_json::to_string_pretty(&cs)?);
            return Ok(());
        }

        cs.log_summary();
        Applier::new(hw, platform, self.apply_opts()).apply(&cs)
    }
}

impl Default for TweakArgs {
    fn default() -> Self {
        Self {
            directives: vec![],
            allow_reference_change: false,
            settle_us: 1000,
            print_plan: false,
        }
    }
}
