#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chimp_burnmem::domain::{Mode, MIB};
use chimp_burnmem::error::{EngineError, EngineResult};
use chimp_burnmem::lib_cache::{cleanup_tmpfs, FileGrowth, TmpfsMount};
use chimp_burnmem::service::{FillStrategy, TailPolicy};
use parking_lot::Mutex;

#[derive(Clone, Default)]
struct FakeMount {
    unmounts: Arc<Mutex<Vec<String>>>,
    fail_unmount: bool,
}

impl TmpfsMount for FakeMount {
    fn mount(&self, _dir: &Path) -> EngineResult<()> {
        Ok(())
    }

    fn unmount(&self, dir: &Path) -> EngineResult<bool> {
        self.unmounts.lock().push(dir.display().to_string());
        if self.fail_unmount {
            Err(EngineError::TeardownFailure(vec!["device busy".into()]))
        } else {
            Ok(false)
        }
    }
}

#[test]
fn one_numbered_file_per_fill() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut files = FileGrowth::new(dir.path(), FakeMount::default());
    assert_eq!(files.mode(), Mode::Cache);
    assert_eq!(files.tail_policy(), TailPolicy::Direct);
    files.setup().expect("setup");

    let deltas = [2u64, 1, 3];
    for d in deltas {
        files.fill(d, d).expect("fill");
    }
    assert_eq!(files.next_seq(), 4);
    assert_eq!(files.footprint_mb(), 6);
    for (i, d) in deltas.iter().enumerate() {
        let path = dir.path().join(format!("file{}", i + 1));
        let meta = fs::metadata(&path).expect("fill file");
        assert_eq!(meta.len(), d * MIB);
    }
    assert_eq!(fs::read_dir(dir.path()).expect("read_dir").count(), 3);
}

#[test]
fn existing_file_is_never_overwritten() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("file1"), b"keep").expect("write");
    let mut files = FileGrowth::new(dir.path(), FakeMount::default());
    let res = files.fill(1, 1);
    assert!(matches!(res, Err(EngineError::FillFailure(_))));
    assert_eq!(fs::read(dir.path().join("file1")).expect("read"), b"keep");
    assert_eq!(files.next_seq(), 1);
}

#[test]
fn setup_requires_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut files = FileGrowth::new(dir.path().join("absent"), FakeMount::default());
    assert!(matches!(files.setup(), Err(EngineError::SetupFailure(_))));
}

#[test]
fn teardown_unmounts_and_removes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tmpfs = dir.path().join("burnmem_tmpfs");
    fs::create_dir(&tmpfs).expect("mkdir");
    let mount = FakeMount::default();
    let mut files = FileGrowth::new(&tmpfs, mount.clone());
    files.fill(1, 1).expect("fill");
    files.teardown().expect("teardown");
    assert!(!tmpfs.exists());
    assert_eq!(mount.unmounts.lock().len(), 1);
    // already clean
    files.teardown().expect("teardown again");
    assert_eq!(mount.unmounts.lock().len(), 1);
}

#[test]
fn failed_unmount_still_removes_tree() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tmpfs = dir.path().join("burnmem_tmpfs");
    fs::create_dir(&tmpfs).expect("mkdir");
    let mount = FakeMount {
        fail_unmount: true,
        ..FakeMount::default()
    };
    let res = cleanup_tmpfs(&mount, &tmpfs);
    match res {
        Err(EngineError::TeardownFailure(steps)) => assert_eq!(steps, vec!["device busy".to_string()]),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!tmpfs.exists());
}
