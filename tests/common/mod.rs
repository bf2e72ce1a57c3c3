// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

#![allow(dead_code)]

use anyhow::bail;
use anyhow::Result;
use pstate_tweak::Capabilities;
use pstate_tweak::Hardware;
use pstate_tweak::HwInfo;
use pstate_tweak::NbPStateChange;
use pstate_tweak::PStateChange;
use pstate_tweak::PStateSnapshot;
use pstate_tweak::Platform;
use pstate_tweak::SchedPolicy;
use std::cell::Cell;
use std::cell::RefCell;
use std::sync::Once;
use std::time::Duration;

pub const NORMAL: SchedPolicy = SchedPolicy {
    policy: 0,
    priority: 0,
};
pub const REALTIME: SchedPolicy = SchedPolicy {
    policy: 1,
    priority: 99,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ReadPState { cpu: Option<usize>, index: usize },
    WritePState { cpu: Option<usize>, change: PStateChange },
    WriteNbPState { cpu: Option<usize>, change: NbPStateChange },
    CurrentPState { cpu: usize },
    SetPState { cpu: usize, index: usize },
    BoostSource(bool),
    CpbDisabled { cpu: usize, disabled: bool },
    Apm(bool),
    Bind(usize),
    Unbind(usize),
    RaisePriority,
    RestorePriority(SchedPolicy),
    Settle(Duration),
}

/// Simulated processor. Implements both the register layer and the
/// platform so every call can be recorded against the CPU the thread was
/// bound to at the time.
pub struct FakeCpu {
    pub info: HwInfo,
    pub live: Vec<PStateSnapshot>,
    pub active: RefCell<Vec<usize>>,
    pub nr_cpus: usize,
    pub calls: RefCell<Vec<Call>>,
    pub bound: Cell<Option<usize>>,
    pub priority: Cell<SchedPolicy>,
    pub fail_write_on: Option<usize>,
    pub fail_raise: bool,
}

impl FakeCpu {
    pub fn new(family: u32, nr_cpus: usize) -> Self {
        let info = HwInfo {
            family,
            nr_pstates: 5,
            nr_nb_pstates: 2,
            nr_boost_states: 1,
            boost_supported: true,
            multi_scale: 1.0,
        };
        let live = (0..info.nr_pstates)
            .map(|index| PStateSnapshot {
                index,
                multiplier: 24.0 - 4.0 * index as f64,
                vid: 140 - 10 * index as u32,
                nb_pstate: if index < 2 { 0 } else { 1 },
            })
            .collect();
        Self {
            info,
            live,
            active: RefCell::new(vec![1; nr_cpus]),
            nr_cpus,
            calls: RefCell::new(vec![]),
            bound: Cell::new(None),
            priority: Cell::new(NORMAL),
            fail_write_on: None,
            fail_raise: false,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn bound_cpu(&self) -> Result<usize> {
        match self.bound.get() {
            Some(cpu) => Ok(cpu),
            None => bail!("core-local register accessed while unbound"),
        }
    }

    pub fn pstate_writes(&self) -> Vec<(Option<usize>, usize)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::WritePState { cpu, change } => Some((cpu, change.index())),
                _ => None,
            })
            .collect()
    }

    pub fn pstate_switches(&self) -> Vec<(usize, usize)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SetPState { cpu, index } => Some((cpu, index)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }
}

impl Capabilities for FakeCpu {
    fn info(&self) -> &HwInfo {
        &self.info
    }

    fn encode_vid(&self, volts: f64) -> u32 {
        (volts * 100.0).round() as u32
    }
}

impl Hardware for FakeCpu {
    fn read_pstate(&self, index: usize) -> Result<PStateSnapshot> {
        self.record(Call::ReadPState {
            cpu: self.bound.get(),
            index,
        });
        Ok(self.live[index].clone())
    }

    fn write_pstate(&self, change: &PStateChange) -> Result<()> {
        let cpu = self.bound_cpu()?;
        if self.fail_write_on == Some(cpu) {
            bail!("simulated write failure");
        }
        self.record(Call::WritePState {
            cpu: Some(cpu),
            change: change.clone(),
        });
        Ok(())
    }

    fn write_nb_pstate(&self, change: &NbPStateChange) -> Result<()> {
        self.record(Call::WriteNbPState {
            cpu: self.bound.get(),
            change: change.clone(),
        });
        Ok(())
    }

    fn current_pstate(&self) -> Result<usize> {
        let cpu = self.bound_cpu()?;
        self.record(Call::CurrentPState { cpu });
        Ok(self.active.borrow()[cpu])
    }

    fn set_current_pstate(&self, index: usize) -> Result<()> {
        let cpu = self.bound_cpu()?;
        self.record(Call::SetPState { cpu, index });
        self.active.borrow_mut()[cpu] = index;
        Ok(())
    }

    fn set_boost_source(&self, enabled: bool) -> Result<()> {
        self.record(Call::BoostSource(enabled));
        Ok(())
    }

    fn set_cpb_disabled(&self, disabled: bool) -> Result<()> {
        let cpu = self.bound_cpu()?;
        self.record(Call::CpbDisabled { cpu, disabled });
        Ok(())
    }

    fn set_apm(&self, enabled: bool) -> Result<()> {
        self.record(Call::Apm(enabled));
        Ok(())
    }
}

impl Platform for FakeCpu {
    fn nr_cpus(&self) -> usize {
        self.nr_cpus
    }

    fn with_bound_cpu<R, F>(&self, cpu: usize, f: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>,
    {
        let prev = self.bound.replace(Some(cpu));
        self.record(Call::Bind(cpu));
        let res = f();
        self.bound.set(prev);
        self.record(Call::Unbind(cpu));
        res
    }

    fn raise_priority(&self) -> Result<SchedPolicy> {
        if self.fail_raise {
            bail!("permission denied");
        }
        self.record(Call::RaisePriority);
        Ok(self.priority.replace(REALTIME))
    }

    fn restore_priority(&self, prev: SchedPolicy) -> Result<()> {
        self.record(Call::RestorePriority(prev));
        self.priority.set(prev);
        Ok(())
    }

    fn settle(&self, dur: Duration) {
        self.record(Call::Settle(dur));
    }
}

static INIT_LOGGER: Once = Once::new();

pub fn init_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = simplelog::TestLogger::init(
            simplelog::LevelFilter::Trace,
            simplelog::Config::default(),
        );
    });
}
