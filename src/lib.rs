// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # P-state retuning for multi-core processors
//!
//! This crate rewrites the per-P-state clock multiplier and voltage table of
//! a running processor, optionally retunes the northbridge P-states, and
//! toggles core performance boost and APM, without a reboot.
//!
//! The work happens in two steps.
//!
//! ## Building a change set
//!
//! An ordered list of directives such as `P2=20@1.1`, `NB_low=2` or
//! `Turbo=0` is turned into a [`ChangeSet`] by
//! [`ChangeSet::from_directives`]. Every field of every P-state is
//! independently optional, so a directive touching only the voltage of a
//! state leaves its multiplier alone.
//!
//! ## Applying it
//!
//! An [`Applier`] walks the change set across every logical CPU. P-state
//! registers are core-local, so the calling thread is pinned to each CPU in
//! turn through a [`Platform`], and the registers themselves are reached
//! through a [`Hardware`] backend. The first non-boost P-state clocks the
//! TSC and is never retuned unless the caller explicitly allows it.
//!
//! Register encodings are the backend's business. The [`msr`] module
//! provides the raw `/dev/cpu/<N>/msr` accessor backends are written on.

mod error;
pub use error::TweakError;

mod changeset;
pub use changeset::ChangeSet;
pub use changeset::NbPStateChange;
pub use changeset::PStateChange;

mod directive;

mod hw;
pub use hw::Capabilities;
pub use hw::Hardware;
pub use hw::HwInfo;
pub use hw::PStateSnapshot;
pub use hw::FAMILY_10H;
pub use hw::FAMILY_15H;

mod apply;
pub use apply::Applier;
pub use apply::ApplyOpts;

mod platform;
pub use platform::LinuxPlatform;
pub use platform::Platform;
pub use platform::SchedPolicy;

pub mod msr;

mod cli;
pub use cli::TweakArgs;
