// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Execution context primitives
//!
//! Core-local registers can only be reached from code running on that core,
//! so applying a change set means moving the calling thread from CPU to CPU.
//! [`Platform`] is the seam for doing so. [`LinuxPlatform`] implements it
//! with thread affinity and realtime scheduling syscalls.

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use log::trace;
use log::warn;
use std::io;
use std::mem;
use std::time::Duration;

/// Scheduling policy and static priority of a thread, as returned by
/// [`Platform::raise_priority`] so it can be put back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedPolicy {
    pub policy: i32,
    pub priority: i32,
}

pub trait Platform {
    /// Number of logical CPUs. CPUs are visited as `0..nr_cpus()`.
    fn nr_cpus(&self) -> usize;

    /// Run `f` with the calling thread bound exclusively to `cpu`. The
    /// previous binding is restored once `f` returns.
    fn with_bound_cpu<R, F>(&self, cpu: usize, f: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>;

    /// Move the calling thread to the highest available priority and return
    /// what it had before.
    fn raise_priority(&self) -> Result<SchedPolicy>;

    fn restore_priority(&self, prev: SchedPolicy) -> Result<()>;

    /// Give the hardware time to settle between two P-state switches.
    fn settle(&self, dur: Duration) {
        std::thread::sleep(dur);
    }
}

#[derive(Debug, Default)]
pub struct LinuxPlatform;

impl LinuxPlatform {
    pub fn new() -> Self {
        Self
    }
}

fn get_affinity() -> Result<libc::cpu_set_t> {
    unsafe {
        let mut set: libc::cpu_set_t = mem::zeroed();
        if libc::sched_getaffinity(0, mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
            return Err(io::Error::last_os_error()).context("Failed to read thread affinity");
        }
        Ok(set)
    }
}

fn set_affinity(set: &libc::cpu_set_t) -> io::Result<()> {
    let ret = unsafe { libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), set) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_scheduler(policy: i32, priority: i32) -> io::Result<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    if unsafe { libc::sched_setscheduler(0, policy, &param) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl Platform for LinuxPlatform {
    fn nr_cpus(&self) -> usize {
        let nr = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if nr < 1 {
            1
        } else {
            nr as usize
        }
    }

    fn with_bound_cpu<R, F>(&self, cpu: usize, f: F) -> Result<R>
    where
        F: FnOnce() -> Result<R>,
    {
        if cpu >= libc::CPU_SETSIZE as usize {
            bail!("CPU {} exceeds CPU_SETSIZE ({})", cpu, libc::CPU_SETSIZE);
        }

        let prev = get_affinity()?;

        let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
        unsafe { libc::CPU_SET(cpu, &mut set) };
        set_affinity(&set).with_context(|| format!("Failed to bind to CPU {}", cpu))?;
        trace!("Bound to CPU {}", cpu);

        let res = f();

        if let Err(e) = set_affinity(&prev) {
            warn!("Failed to restore thread affinity after CPU {} ({})", cpu, e);
        }

        res
    }

    fn raise_priority(&self) -> Result<SchedPolicy> {
        let policy = unsafe { libc::sched_getscheduler(0) };
        if policy < 0 {
            return Err(io::Error::last_os_error()).context("Failed to read scheduling policy");
        }

        let mut param: libc::sched_param = unsafe { mem::zeroed() };
        if unsafe { libc::sched_getparam(0, &mut param) } != 0 {
            return Err(io::Error::last_os_error()).context("Failed to read scheduling priority");
        }

        let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
        if max < 0 {
            return Err(io::Error::last_os_error()).context("Failed to query SCHED_FIFO priority");
        }

        set_scheduler(libc::SCHED_FIFO, max)
            .with_context(|| format!("Failed to switch to SCHED_FIFO priority {}", max))?;

        Ok(SchedPolicy {
            policy,
            priority: param.sched_priority,
        })
    }

    fn restore_priority(&self, prev: SchedPolicy) -> Result<()> {
        set_scheduler(prev.policy, prev.priority).with_context(|| {
            format!(
                "Failed to restore scheduling policy {} priority {}",
                prev.policy, prev.priority
            )
        })
    }
}
