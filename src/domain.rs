#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use anyhow::{bail, Result as AnyResult};
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;

pub const MIB: u64 = 1024 * 1024;

/// Where a `MemoryStats` snapshot came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsOrigin {
    Cgroup,
    Host,
}

/// One snapshot of memory accounting, fresh per tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryStats {
    pub total_bytes: u64,
    /// Actively used, non-reclaimable memory (anonymous plus shared).
    pub used_bytes: u64,
    pub free_bytes: u64,
    /// Cache and buffers the kernel can drop under pressure.
    pub reclaimable_bytes: u64,
    pub source: StatsOrigin,
}

impl MemoryStats {
    /// Capacity the engine may still claim. Reclaimable memory only counts when asked for.
    pub fn available_bytes(&self, include_reclaimable: bool) -> u64 {
        if include_reclaimable {
            self.free_bytes.saturating_add(self.reclaimable_bytes)
        } else {
            self.free_bytes
        }
    }
}

/// Active fill policy for a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillPolicy {
    /// Fill until used memory reaches this share of total.
    Percent(u8),
    /// Fill until only this many megabytes stay free.
    ReserveMb(u64),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FillIntent {
    pub percent: Option<u8>,
    pub reserve_mb: Option<u64>,
    pub include_reclaimable: bool,
}

impl FillIntent {
    pub fn percent(percent: u8) -> Self {
        Self {
            percent: Some(percent),
            ..Self::default()
        }
    }

    pub fn reserve(reserve_mb: u64) -> Self {
        Self {
            reserve_mb: Some(reserve_mb),
            ..Self::default()
        }
    }

    /// Percent wins over reserve; with neither set the run fills to 100%.
    pub fn policy(&self) -> FillPolicy {
        match (self.percent, self.reserve_mb) {
            (Some(p), _) => FillPolicy::Percent(p),
            (None, Some(r)) => FillPolicy::ReserveMb(r),
            (None, None) => FillPolicy::Percent(100),
        }
    }
}

/// Per-tick outcome of the target calculation. A non-positive delta means no fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FillPlan {
    pub current_total_mb: i64,
    pub target_delta_mb: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Grow page-cache backed files on a tmpfs mount.
    Cache,
    /// Grow in-process heap allocations.
    Ram,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Cache => f.write_str("cache"),
            Mode::Ram => f.write_str("ram"),
        }
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> AnyResult<Self> {
        match s {
            "cache" => Ok(Self::Cache),
            "ram" => Ok(Self::Ram),
            other => bail!(format!("unsupported mode: {other}")),
        }
    }
}

/// Identifies a detached pressure process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunHandle {
    pub pid: u32,
    pub mode: Mode,
    pub mount_path: Option<PathBuf>,
}
