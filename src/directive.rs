// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Directive parsing.
//!
//! Directives are `KEY` or `KEY=VALUE` strings, matched case-insensitively:
//!
//! - `P<N>`: switch every CPU to P-state N after applying.
//! - `P<N>=<multi>[@<volts>]`: retune core P-state N. The multiplier is
//!   scaled by the hardware's multiplier scale factor.
//! - `NB_P<N>=<multi>[@<volts>]`: retune northbridge P-state N. The
//!   multiplier is taken as is.
//! - `NB_low=<N>`: P-states below N use NB P0, the others NB P1.
//! - `Turbo=0|1`, `APM=0|1`: toggle core performance boost and APM.
//!
//! Either half of `<multi>@<volts>` may be left empty.

use crate::Capabilities;
use crate::ChangeSet;
use crate::TweakError;
use log::debug;

impl ChangeSet {
    /// Parse `directives` in order into a change set sized for `caps`.
    ///
    /// A repeated directive silently overrides the fields set by an earlier
    /// one. The first directive which cannot be parsed fails the whole list.
    pub fn from_directives<C, S>(caps: &C, directives: &[S]) -> Result<ChangeSet, TweakError>
    where
        C: Capabilities + ?Sized,
        S: AsRef<str>,
    {
        let info = caps.info();
        let mut cs = ChangeSet::new(info.nr_pstates, info.nr_nb_pstates);

        for directive in directives {
            let directive = directive.as_ref();
            if parse_directive(&mut cs, caps, directive).is_none() {
                return Err(TweakError::InvalidDirective(directive.to_string()));
            }
            debug!("Parsed directive {}", directive);
        }

        Ok(cs)
    }
}

fn parse_directive<C>(cs: &mut ChangeSet, caps: &C, directive: &str) -> Option<()>
where
    C: Capabilities + ?Sized,
{
    let info = caps.info();

    let (key, value) = match directive.split_once('=') {
        Some(kv) => kv,
        None => {
            let index = parse_index(strip_prefix_ci(directive, "P")?)?;
            if index >= info.nr_pstates {
                return None;
            }
            cs.set_target_pstate(index);
            return Some(());
        }
    };

    if key.eq_ignore_ascii_case("NB_low") {
        cs.set_nb_low(parse_count(value)?);
    } else if key.eq_ignore_ascii_case("Turbo") {
        cs.set_boost(parse_flag(value)?);
    } else if key.eq_ignore_ascii_case("APM") {
        cs.set_apm(parse_flag(value)?);
    } else if let Some(index) = strip_prefix_ci(key, "NB_P") {
        let (multi, volts) = parse_multi_volts(value)?;
        let nb = cs.nb_pstate_mut(parse_index(index)?)?;
        if let Some(multi) = multi {
            nb.multiplier = Some(multi);
        }
        if let Some(volts) = volts {
            nb.vid = Some(caps.encode_vid(volts));
        }
    } else if let Some(index) = strip_prefix_ci(key, "P") {
        let (multi, volts) = parse_multi_volts(value)?;
        let ps = cs.pstate_mut(parse_index(index)?)?;
        if let Some(multi) = multi {
            ps.multiplier = Some(info.multi_scale * multi);
        }
        if let Some(volts) = volts {
            ps.vid = Some(caps.encode_vid(volts));
        }
    } else {
        return None;
    }

    Some(())
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    match s.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => Some(&s[prefix.len()..]),
        _ => None,
    }
}

/// Plain decimal index, no sign and no surrounding garbage.
fn parse_index(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Like [`parse_index`], but a count too large for `usize` saturates.
fn parse_count(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(s.parse().unwrap_or(usize::MAX))
}

fn parse_flag(s: &str) -> Option<bool> {
    match s {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

fn parse_value(s: &str) -> Option<f64> {
    let v: f64 = s.parse().ok()?;
    if v.is_finite() && v >= 0.0 {
        Some(v)
    } else {
        None
    }
}

/// Split `<multi>[@<volts>]`. `None` on a malformed half, `Some(None)` for
/// an omitted one.
fn parse_multi_volts(value: &str) -> Option<(Option<f64>, Option<f64>)> {
    let (multi, volts) = value.split_once('@').unwrap_or((value, ""));

    let multi = match multi {
        "" => None,
        m => Some(parse_value(m)?),
    };
    let volts = match volts {
        "" => None,
        v => Some(parse_value(v)?),
    };

    Some((multi, volts))
}
