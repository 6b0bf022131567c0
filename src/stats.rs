#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::domain::{MemoryStats, StatsOrigin};
use crate::error::{EngineError, EngineResult};

/// cgroup v1 reports an unlimited group with a limit at or above this value.
pub const PAGE_COUNTER_MAX: u64 = 9_223_372_036_854_770_000;

pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";
pub const DEFAULT_MEMINFO: &str = "/proc/meminfo";

pub trait StatsSource {
    /// Takes one snapshot.
    fn collect(&self) -> EngineResult<MemoryStats>;
}

/// Host-wide counters from a meminfo-formatted file.
#[derive(Clone, Debug)]
pub struct HostSource {
    meminfo: PathBuf,
}

impl HostSource {
    pub fn new(meminfo: impl Into<PathBuf>) -> Self {
        Self {
            meminfo: meminfo.into(),
        }
    }
}

impl Default for HostSource {
    fn default() -> Self {
        Self::new(DEFAULT_MEMINFO)
    }
}

impl StatsSource for HostSource {
    fn collect(&self) -> EngineResult<MemoryStats> {
        let text = fs::read_to_string(&self.meminfo).map_err(|e| {
            EngineError::StatsUnavailable(format!("read {}: {e}", self.meminfo.display()))
        })?;
        let fields = parse_meminfo(&text);
        let field = |key: &str| fields.get(key).copied().unwrap_or(0);
        let total = fields.get("MemTotal").copied().ok_or_else(|| {
            EngineError::StatsUnavailable(format!("MemTotal missing in {}", self.meminfo.display()))
        })?;
        let free = field("MemFree");
        let buffers = field("Buffers");
        let cached = field("Cached");
        let shmem = field("Shmem");
        // shmem lives inside Cached; tmpfs pages are held, not reclaimable
        let used = total.saturating_sub(free).saturating_sub(cached).saturating_add(shmem);
        debug!(total, free, buffers, cached, shmem, used, "host memory stats");
        Ok(MemoryStats {
            total_bytes: total,
            used_bytes: used,
            free_bytes: free,
            reclaimable_bytes: buffers.saturating_add(cached),
            source: StatsOrigin::Host,
        })
    }
}

/// Parses `Key:   value kB` lines into bytes.
fn parse_meminfo(text: &str) -> HashMap<&str, u64> {
    text.lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let mut parts = rest.split_whitespace();
            let value: u64 = parts.next()?.parse().ok()?;
            let bytes = match parts.next() {
                Some("kB") => value.saturating_mul(1024),
                _ => value,
            };
            Some((key.trim(), bytes))
        })
        .collect()
}

/// Raw reading of a cgroup memory controller. `limit == None` means unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CgroupReading {
    pub limit: Option<u64>,
    pub usage: u64,
    pub cache: u64,
    /// Anonymous memory including shmem/tmpfs pages.
    pub used: u64,
    pub shmem: u64,
}

/// Memory controller accounting of the current resource boundary, with host fallback.
#[derive(Clone, Debug)]
pub struct CgroupSource {
    root: PathBuf,
    host: HostSource,
}

impl CgroupSource {
    pub fn new(root: impl Into<PathBuf>, host: HostSource) -> Self {
        Self {
            root: root.into(),
            host,
        }
    }

    /// Reads the controller, preferring the unified (v2) layout.
    pub fn read(&self) -> EngineResult<CgroupReading> {
        if self.root.join("memory.max").exists() {
            read_v2(&self.root)
        } else if self.root.join("memory").join("memory.limit_in_bytes").exists() {
            read_v1(&self.root.join("memory"))
        } else {
            Err(EngineError::StatsUnavailable(format!(
                "no memory controller under {}",
                self.root.display()
            )))
        }
    }
}

impl StatsSource for CgroupSource {
    fn collect(&self) -> EngineResult<MemoryStats> {
        let reading = match self.read() {
            Ok(r) => r,
            Err(e) => {
                info!(error = %e, "get memory stats by cgroup failed, using host stats");
                return self.host.collect();
            }
        };
        let used = reading.used;
        match reading.limit {
            Some(limit) => {
                debug!(limit, usage = reading.usage, cache = reading.cache, used, "cgroup memory stats");
                Ok(MemoryStats {
                    total_bytes: limit,
                    used_bytes: used,
                    free_bytes: limit.saturating_sub(reading.usage),
                    // shmem is accounted inside the cache counter
                    reclaimable_bytes: reading.cache.saturating_sub(reading.shmem),
                    source: StatsOrigin::Cgroup,
                })
            }
            None => {
                debug!(used, "cgroup has no memory limit, sizing against host");
                let host = self.host.collect()?;
                Ok(MemoryStats {
                    used_bytes: used,
                    ..host
                })
            }
        }
    }
}

/// Selects the stats source for a run.
#[derive(Clone, Debug)]
pub enum Collector {
    Cgroup(CgroupSource),
    Host(HostSource),
}

impl Collector {
    pub fn new(is_host: bool, cgroup_root: &Path, meminfo: &Path) -> Self {
        let host = HostSource::new(meminfo);
        if is_host {
            Collector::Host(host)
        } else {
            Collector::Cgroup(CgroupSource::new(cgroup_root, host))
        }
    }
}

impl StatsSource for Collector {
    fn collect(&self) -> EngineResult<MemoryStats> {
        match self {
            Collector::Cgroup(c) => c.collect(),
            Collector::Host(h) => h.collect(),
        }
    }
}

fn read_counter(path: &Path) -> EngineResult<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| EngineError::StatsUnavailable(format!("read {}: {e}", path.display())))
}

fn parse_counter(path: &Path, raw: &str) -> EngineResult<u64> {
    raw.parse().map_err(|_| {
        EngineError::StatsUnavailable(format!("malformed counter {raw:?} in {}", path.display()))
    })
}

fn read_stat_file(path: &Path) -> EngineResult<HashMap<String, u64>> {
    let text = read_counter(path)?;
    Ok(text
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(' ')?;
            Some((key.to_string(), value.trim().parse().ok()?))
        })
        .collect())
}

fn read_v1(dir: &Path) -> EngineResult<CgroupReading> {
    let limit_path = dir.join("memory.limit_in_bytes");
    let usage_path = dir.join("memory.usage_in_bytes");
    let limit = parse_counter(&limit_path, &read_counter(&limit_path)?)?;
    let usage = parse_counter(&usage_path, &read_counter(&usage_path)?)?;
    let stat = read_stat_file(&dir.join("memory.stat"))?;
    let field = |key: &str| stat.get(key).copied().unwrap_or(0);
    Ok(CgroupReading {
        limit: (limit < PAGE_COUNTER_MAX).then_some(limit),
        usage,
        cache: field("cache"),
        // the anon LRU lists already hold shmem pages
        used: field("active_anon").saturating_add(field("inactive_anon")),
        shmem: field("shmem"),
    })
}

fn read_v2(dir: &Path) -> EngineResult<CgroupReading> {
    let max_path = dir.join("memory.max");
    let current_path = dir.join("memory.current");
    let max = read_counter(&max_path)?;
    let limit = if max == "max" {
        None
    } else {
        Some(parse_counter(&max_path, &max)?)
    };
    let usage = parse_counter(&current_path, &read_counter(&current_path)?)?;
    let stat = read_stat_file(&dir.join("memory.stat"))?;
    let field = |key: &str| stat.get(key).copied().unwrap_or(0);
    Ok(CgroupReading {
        limit,
        usage,
        cache: field("file"),
        used: field("anon").saturating_add(field("shmem")),
        shmem: field("shmem"),
    })
}
