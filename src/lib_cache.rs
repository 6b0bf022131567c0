#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::domain::{Mode, MIB};
use crate::error::{EngineError, EngineResult};
use crate::service::{FillStrategy, TailPolicy};

pub const TMPFS_DIR_NAME: &str = "burnmem_tmpfs";
pub const FILL_FILE_PREFIX: &str = "file";

/// Mounting of the memory-backed filesystem used by cache mode.
pub trait TmpfsMount {
    /// Mounts a tmpfs at `dir` sized to all of host memory.
    fn mount(&self, dir: &Path) -> EngineResult<()>;

    /// Unmounts `dir`. Returns `Ok(false)` when nothing was mounted there.
    fn unmount(&self, dir: &Path) -> EngineResult<bool>;
}

/// Drives the system `mount`/`umount` commands.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommandMount;

impl TmpfsMount for CommandMount {
    fn mount(&self, dir: &Path) -> EngineResult<()> {
        let out = Command::new("mount")
            .args(["-t", "tmpfs", "tmpfs"])
            .arg(dir)
            .args(["-o", "size=100%"])
            .output()
            .map_err(|e| EngineError::SetupFailure(format!("run mount: {e}")))?;
        if !out.status.success() {
            return Err(EngineError::SetupFailure(format!(
                "mount tmpfs on {}: {}",
                dir.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        info!(dir = %dir.display(), "tmpfs mounted");
        Ok(())
    }

    fn unmount(&self, dir: &Path) -> EngineResult<bool> {
        let out = Command::new("umount")
            .arg(dir)
            .output()
            .map_err(|e| EngineError::TeardownFailure(vec![format!("run umount: {e}")]))?;
        if out.status.success() {
            info!(dir = %dir.display(), "tmpfs unmounted");
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&out.stderr);
        if stderr.contains("not mounted") {
            debug!(dir = %dir.display(), "tmpfs already unmounted");
            return Ok(false);
        }
        Err(EngineError::TeardownFailure(vec![format!(
            "umount {}: {}",
            dir.display(),
            stderr.trim()
        )]))
    }
}

/// Unmounts and removes the tmpfs directory, attempting every step.
///
/// A missing directory is already clean.
pub fn cleanup_tmpfs(mounter: &dyn TmpfsMount, dir: &Path) -> EngineResult<()> {
    if !dir.exists() {
        return Ok(());
    }
    let mut failures = Vec::new();
    if let Err(e) = mounter.unmount(dir) {
        match e {
            EngineError::TeardownFailure(mut steps) => failures.append(&mut steps),
            other => failures.push(other.to_string()),
        }
    }
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => failures.push(format!("remove {}: {e}", dir.display())),
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(EngineError::TeardownFailure(failures))
    }
}

/// "cache" mode: one new zero-filled file per tick on the tmpfs mount.
pub struct FileGrowth<M: TmpfsMount> {
    dir: PathBuf,
    next_seq: u64,
    written_mb: u64,
    mounter: M,
}

impl<M: TmpfsMount> FileGrowth<M> {
    pub fn new(dir: impl Into<PathBuf>, mounter: M) -> Self {
        Self {
            dir: dir.into(),
            next_seq: 1,
            written_mb: 0,
            mounter,
        }
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn file_path(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("{FILL_FILE_PREFIX}{seq}"))
    }

    fn write_zero_file(path: &Path, mb: u64) -> std::io::Result<()> {
        // create_new: a fill file is never overwritten
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let block = vec![0u8; usize::try_from(MIB).unwrap_or(1 << 20)];
        for _ in 0..mb {
            file.write_all(&block)?;
        }
        file.sync_all()
    }
}

impl<M: TmpfsMount> FillStrategy for FileGrowth<M> {
    fn mode(&self) -> Mode {
        Mode::Cache
    }

    fn tail_policy(&self) -> TailPolicy {
        TailPolicy::Direct
    }

    fn setup(&mut self) -> EngineResult<()> {
        if self.dir.is_dir() {
            Ok(())
        } else {
            Err(EngineError::SetupFailure(format!(
                "fill directory {} does not exist",
                self.dir.display()
            )))
        }
    }

    fn fill(&mut self, amount_mb: u64, _target_delta_mb: u64) -> EngineResult<()> {
        let path = self.file_path(self.next_seq);
        Self::write_zero_file(&path, amount_mb)
            .map_err(|e| EngineError::FillFailure(format!("write {}: {e}", path.display())))?;
        debug!(file = %path.display(), amount_mb, "fill file written");
        self.next_seq += 1;
        self.written_mb += amount_mb;
        Ok(())
    }

    fn footprint_mb(&self) -> u64 {
        self.written_mb
    }

    fn teardown(&mut self) -> EngineResult<()> {
        let res = cleanup_tmpfs(&self.mounter, &self.dir);
        if let Err(e) = &res {
            warn!(error = %e, "tmpfs teardown incomplete");
        }
        res
    }
}
