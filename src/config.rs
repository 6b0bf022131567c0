#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result as AnyResult};
use clap::{ArgAction, Parser};

use crate::domain::{FillIntent, Mode};
use crate::lib_cache::TMPFS_DIR_NAME;
use crate::stats::{DEFAULT_CGROUP_ROOT, DEFAULT_MEMINFO};

pub const DEFAULT_RATE_MB: u64 = 100;

#[derive(Parser, Debug, Clone)]
#[command(name = "chimp_burnmem", version, about = "Memory pressure injector for chaos experiments")]
pub struct Cli {
    /// Start a detached pressure run.
    #[arg(long, action = ArgAction::SetTrue)]
    pub start: bool,
    /// Stop every detached pressure run and clean up.
    #[arg(long, action = ArgAction::SetTrue)]
    pub stop: bool,
    /// Run the pressure loop in the foreground (used by the detached process).
    #[arg(long, action = ArgAction::SetTrue)]
    pub nohup: bool,
    /// Percent of total memory to fill up to (0-100).
    #[arg(long = "mem-percent", env = "CHIMP_BURNMEM_PERCENT")]
    pub mem_percent: Option<u8>,
    /// Megabytes to leave free. Ignored when --mem-percent is set.
    #[arg(long, env = "CHIMP_BURNMEM_RESERVE")]
    pub reserve: Option<u64>,
    /// Fill rate cap in MB per second.
    #[arg(long, env = "CHIMP_BURNMEM_RATE", default_value_t = DEFAULT_RATE_MB)]
    pub rate: u64,
    /// Fill mode, cache or ram.
    #[arg(long, env = "CHIMP_BURNMEM_MODE", default_value = "cache")]
    pub mode: Mode,
    /// Count buffer/cache memory as capacity the ram mode may claim.
    #[arg(long = "include-buffer-cache", env = "CHIMP_BURNMEM_INCLUDE_BUFFER_CACHE")]
    pub include_buffer_cache: bool,
    /// Size against host memory rather than the cgroup limit.
    #[arg(long = "is-host", env = "CHIMP_BURNMEM_IS_HOST")]
    pub is_host: bool,
    #[arg(long, env = "CHIMP_BURNMEM_DEBUG")]
    pub debug: bool,
    /// Write JSON logs to this file instead of stderr.
    #[arg(long = "log-file", env = "CHIMP_BURNMEM_LOG_FILE")]
    pub log_file: Option<PathBuf>,
    /// Rewrite Prometheus text exposition to this file every tick.
    #[arg(long = "metrics-file", env = "CHIMP_BURNMEM_METRICS_FILE")]
    pub metrics_file: Option<PathBuf>,
    /// Directory holding the tmpfs mount point. Defaults to the executable's directory.
    #[arg(long = "work-dir", env = "CHIMP_BURNMEM_WORK_DIR")]
    pub work_dir: Option<PathBuf>,
    #[arg(long = "cgroup-root", env = "CHIMP_BURNMEM_CGROUP_ROOT", default_value = DEFAULT_CGROUP_ROOT)]
    pub cgroup_root: PathBuf,
    #[arg(long = "proc-meminfo", env = "CHIMP_BURNMEM_PROC_MEMINFO", default_value = DEFAULT_MEMINFO)]
    pub proc_meminfo: PathBuf,
}

/// What the invocation asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Nohup,
}

impl Cli {
    pub fn action(&self) -> AnyResult<Action> {
        match (self.start, self.stop, self.nohup) {
            (true, false, false) => Ok(Action::Start),
            (false, true, false) => Ok(Action::Stop),
            (false, false, true) => Ok(Action::Nohup),
            (false, false, false) => bail!("less --start or --stop flag"),
            _ => bail!("--start, --stop and --nohup are mutually exclusive"),
        }
    }
}

/// Immutable settings for one run, threaded through the loop and lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub intent: FillIntent,
    pub mode: Mode,
    pub rate_mb: u64,
    pub is_host: bool,
    pub debug: bool,
    pub work_dir: PathBuf,
    pub cgroup_root: PathBuf,
    pub proc_meminfo: PathBuf,
    pub log_file: Option<PathBuf>,
    pub metrics_file: Option<PathBuf>,
}

impl EngineConfig {
    /// Config with defaults for everything but the intent and mode.
    pub fn new(intent: FillIntent, mode: Mode, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            intent,
            mode,
            rate_mb: DEFAULT_RATE_MB,
            is_host: false,
            debug: false,
            work_dir: work_dir.into(),
            cgroup_root: PathBuf::from(DEFAULT_CGROUP_ROOT),
            proc_meminfo: PathBuf::from(DEFAULT_MEMINFO),
            log_file: None,
            metrics_file: None,
        }
    }

    pub fn from_cli(cli: &Cli) -> AnyResult<Self> {
        let work_dir = match &cli.work_dir {
            Some(dir) => dir.clone(),
            None => program_dir()?,
        };
        Ok(Self {
            intent: FillIntent {
                percent: cli.mem_percent,
                reserve_mb: cli.reserve,
                include_reclaimable: cli.include_buffer_cache,
            },
            mode: cli.mode,
            rate_mb: if cli.rate == 0 { DEFAULT_RATE_MB } else { cli.rate },
            is_host: cli.is_host,
            debug: cli.debug,
            work_dir,
            cgroup_root: cli.cgroup_root.clone(),
            proc_meminfo: cli.proc_meminfo.clone(),
            log_file: cli.log_file.clone(),
            metrics_file: cli.metrics_file.clone(),
        })
    }

    pub fn tmpfs_dir(&self) -> PathBuf {
        self.work_dir.join(TMPFS_DIR_NAME)
    }

    /// Flags that reproduce this config in the detached `--nohup` process.
    pub fn nohup_args(&self) -> Vec<String> {
        let mut args = vec!["--nohup".to_string()];
        if let Some(p) = self.intent.percent {
            args.extend(["--mem-percent".into(), p.to_string()]);
        }
        if let Some(r) = self.intent.reserve_mb {
            args.extend(["--reserve".into(), r.to_string()]);
        }
        args.extend([
            "--rate".into(),
            self.rate_mb.to_string(),
            "--mode".into(),
            self.mode.to_string(),
        ]);
        if self.intent.include_reclaimable {
            args.push("--include-buffer-cache".into());
        }
        if self.is_host {
            args.push("--is-host".into());
        }
        if self.debug {
            args.push("--debug".into());
        }
        args.push("--work-dir".into());
        args.push(path_arg(&self.work_dir));
        args.push("--cgroup-root".into());
        args.push(path_arg(&self.cgroup_root));
        args.push("--proc-meminfo".into());
        args.push(path_arg(&self.proc_meminfo));
        if let Some(p) = &self.log_file {
            args.push("--log-file".into());
            args.push(path_arg(p));
        }
        if let Some(p) = &self.metrics_file {
            args.push("--metrics-file".into());
            args.push(path_arg(p));
        }
        args
    }
}

fn path_arg(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

/// Directory of the running executable.
pub fn program_dir() -> AnyResult<PathBuf> {
    let exe = env::current_exe().context("resolve current executable")?;
    Ok(exe
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf))
}
