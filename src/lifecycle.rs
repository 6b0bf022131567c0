#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use sysinfo::{Pid, Signal, System};
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::domain::{Mode, RunHandle};
use crate::error::{EngineError, EngineResult};
use crate::lib_cache::{cleanup_tmpfs, TmpfsMount};
use crate::validation::validate_config;

pub const BINARY_NAME: &str = "chimp_burnmem";
pub const NOHUP_FLAG: &str = "--nohup";
pub const STOP_FLAG: &str = "--stop";

/// Process-table operations the lifecycle needs.
pub trait ProcessSupervisor {
    /// Spawns this program detached with `args`, returning its pid.
    fn spawn_detached(&self, args: &[String]) -> EngineResult<u32>;

    /// Pids of processes called `name` whose arguments contain `include` and not `exclude`.
    /// The calling process is never returned.
    fn find_by_name(&self, name: &str, include: &str, exclude: Option<&str>) -> EngineResult<Vec<u32>>;

    /// Kills `pid` with SIGKILL. A process that is already gone is not an error.
    fn kill(&self, pid: u32) -> EngineResult<()>;
}

/// `ProcessSupervisor` over `std::process` and `sysinfo`.
#[derive(Clone, Debug)]
pub struct SysinfoSupervisor {
    exe: PathBuf,
}

impl SysinfoSupervisor {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    /// Supervisor that re-launches the running executable.
    pub fn current() -> EngineResult<Self> {
        std::env::current_exe()
            .map(Self::new)
            .map_err(|e| EngineError::SetupFailure(format!("resolve current executable: {e}")))
    }
}

impl ProcessSupervisor for SysinfoSupervisor {
    fn spawn_detached(&self, args: &[String]) -> EngineResult<u32> {
        let mut cmd = Command::new(&self.exe);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let child = cmd
            .spawn()
            .map_err(|e| EngineError::SetupFailure(format!("spawn {}: {e}", self.exe.display())))?;
        Ok(child.id())
    }

    fn find_by_name(&self, name: &str, include: &str, exclude: Option<&str>) -> EngineResult<Vec<u32>> {
        let me = sysinfo::get_current_pid().map_err(|e| EngineError::SetupFailure(e.to_string()))?;
        let mut sys = System::new();
        sys.refresh_processes();
        let mut pids: Vec<u32> = sys
            .processes()
            .iter()
            .filter(|(pid, p)| {
                let has = |pat: &str| p.cmd().iter().any(|a| a.contains(pat));
                **pid != me && p.name() == name && has(include) && !exclude.is_some_and(has)
            })
            .map(|(pid, _)| pid.as_u32())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn kill(&self, pid: u32) -> EngineResult<()> {
        let pid = Pid::from_u32(pid);
        let mut sys = System::new();
        if !sys.refresh_process(pid) {
            return Ok(());
        }
        match sys.process(pid).and_then(|p| p.kill_with(Signal::Kill)) {
            Some(true) => Ok(()),
            _ => Err(EngineError::TeardownFailure(vec![format!("kill -9 {pid} failed")])),
        }
    }
}

pub struct Lifecycle<P: ProcessSupervisor, M: TmpfsMount> {
    supervisor: P,
    mounter: M,
}

impl<P: ProcessSupervisor, M: TmpfsMount> Lifecycle<P, M> {
    pub fn new(supervisor: P, mounter: M) -> Self {
        Self { supervisor, mounter }
    }

    /// Prepares the run and launches the detached pressure process.
    ///
    /// A failure after any side effect runs `stop_run` first, so nothing is left running.
    pub fn start_run(&self, cfg: &EngineConfig) -> EngineResult<RunHandle> {
        validate_config(cfg)?;
        let mount_path = match cfg.mode {
            Mode::Cache => {
                let dir = cfg.tmpfs_dir();
                if !dir.exists() {
                    fs::create_dir_all(&dir).map_err(|e| {
                        EngineError::SetupFailure(format!("create {}: {e}", dir.display()))
                    })?;
                }
                if let Err(e) = self.mounter.mount(&dir) {
                    return Err(self.abort_start(cfg, e));
                }
                Some(dir)
            }
            Mode::Ram => None,
        };

        let pid = match self.supervisor.spawn_detached(&cfg.nohup_args()) {
            Ok(pid) => pid,
            Err(e) => return Err(self.abort_start(cfg, e)),
        };
        match self.supervisor.find_by_name(BINARY_NAME, NOHUP_FLAG, None) {
            Ok(pids) if !pids.is_empty() => {}
            Ok(_) => {
                let e = EngineError::SetupFailure(format!(
                    "run burn memory by {} mode failed, cannot find the burning program pid",
                    cfg.mode
                ));
                return Err(self.abort_start(cfg, e));
            }
            Err(e) => {
                let e = EngineError::SetupFailure(format!(
                    "run burn memory by {} mode failed, cannot get the burning program pid, {e}",
                    cfg.mode
                ));
                return Err(self.abort_start(cfg, e));
            }
        }
        info!(pid, mode = %cfg.mode, "burn memory process started");
        Ok(RunHandle {
            pid,
            mode: cfg.mode,
            mount_path,
        })
    }

    fn abort_start(&self, cfg: &EngineConfig, cause: EngineError) -> EngineError {
        error!(kind = cause.kind(), error = %cause, "start failed, cleaning up");
        if let Err(e) = self.stop_run(cfg) {
            warn!(error = %e, "cleanup after failed start");
        }
        cause
    }

    /// Kills every detached pressure process and, in cache mode, removes the tmpfs.
    ///
    /// Every step is attempted. Running it again on a clean system does nothing.
    pub fn stop_run(&self, cfg: &EngineConfig) -> EngineResult<()> {
        let mut failures = Vec::new();
        match self.supervisor.find_by_name(BINARY_NAME, NOHUP_FLAG, Some(STOP_FLAG)) {
            Ok(pids) => {
                for pid in pids {
                    match self.supervisor.kill(pid) {
                        Ok(()) => info!(pid, "burn memory process killed"),
                        Err(e) => failures.push(e.to_string()),
                    }
                }
            }
            Err(e) => failures.push(e.to_string()),
        }
        if cfg.mode == Mode::Cache {
            if let Err(e) = cleanup_tmpfs(&self.mounter, &cfg.tmpfs_dir()) {
                match e {
                    EngineError::TeardownFailure(mut steps) => failures.append(&mut steps),
                    other => failures.push(other.to_string()),
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::TeardownFailure(failures))
        }
    }
}
