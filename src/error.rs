// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::fmt;

/// Failures of the retuning protocol itself.
///
/// Both kinds abort before any core-local register is touched. They travel
/// inside [`anyhow::Error`] like every other failure and can be told apart
/// with `downcast_ref::<TweakError>()`.
#[derive(Debug, Clone, PartialEq)]
pub enum TweakError {
    /// A directive was malformed, out of range or unknown. Carries the
    /// directive exactly as it was given.
    InvalidDirective(String),
    /// The change set retunes the multiplier of the P-state that clocks the
    /// TSC and the caller did not allow it.
    ReferenceStateChange {
        index: usize,
        current: f64,
        requested: f64,
    },
}

impl fmt::Display for TweakError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TweakError::InvalidDirective(directive) => {
                write!(f, "invalid parameter {}", directive)
            }
            TweakError::ReferenceStateChange {
                index,
                current,
                requested,
            } => write!(
                f,
                "refusing to change the multiplier of P{} (TSC reference state) from {} to {}",
                index, current, requested
            ),
        }
    }
}

impl std::error::Error for TweakError {}
