#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::fs;
use std::path::Path;

use chimp_burnmem::calculator::compute_target;
use chimp_burnmem::domain::{FillIntent, StatsOrigin, MIB};
use chimp_burnmem::error::EngineError;
use chimp_burnmem::stats::{CgroupSource, Collector, HostSource, StatsSource, PAGE_COUNTER_MAX};

const MEMINFO: &str = "\
MemTotal:        8388608 kB
MemFree:         4194304 kB
MemAvailable:    6291456 kB
Buffers:          262144 kB
Cached:          1048576 kB
SwapCached:            0 kB
Shmem:            131072 kB
";

fn write_meminfo(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("meminfo");
    fs::write(&path, MEMINFO).expect("write meminfo");
    path
}

fn write_v1(root: &Path, limit: u64, usage: u64) {
    let mem = root.join("memory");
    fs::create_dir_all(&mem).expect("mkdir");
    fs::write(mem.join("memory.limit_in_bytes"), format!("{limit}\n")).expect("write");
    fs::write(mem.join("memory.usage_in_bytes"), format!("{usage}\n")).expect("write");
    let stat = format!(
        "cache {}\nrss {}\nshmem {}\nactive_anon {}\ninactive_anon {}\n",
        300 * MIB,
        400 * MIB,
        100 * MIB,
        450 * MIB,
        50 * MIB
    );
    fs::write(mem.join("memory.stat"), stat).expect("write");
}

#[test]
fn host_stats_from_meminfo() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stats = HostSource::new(write_meminfo(dir.path())).collect().expect("ok");
    assert_eq!(stats.source, StatsOrigin::Host);
    assert_eq!(stats.total_bytes, 8192 * MIB);
    assert_eq!(stats.free_bytes, 4096 * MIB);
    assert_eq!(stats.reclaimable_bytes, 1280 * MIB);
    // total - free - cached + shmem
    assert_eq!(stats.used_bytes, (8192 - 4096 - 1024 + 128) * MIB);
    assert_eq!(stats.available_bytes(false), 4096 * MIB);
    assert_eq!(stats.available_bytes(true), (4096 + 1280) * MIB);
}

#[test]
fn host_without_meminfo_is_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let res = HostSource::new(dir.path().join("missing")).collect();
    assert!(matches!(res, Err(EngineError::StatsUnavailable(_))));
}

#[test]
fn cgroup_v1_limited() {
    let dir = tempfile::tempdir().expect("tempdir");
    let meminfo = write_meminfo(dir.path());
    let root = dir.path().join("cgroup");
    write_v1(&root, 2048 * MIB, 800 * MIB);
    let stats = CgroupSource::new(&root, HostSource::new(meminfo)).collect().expect("ok");
    assert_eq!(stats.source, StatsOrigin::Cgroup);
    assert_eq!(stats.total_bytes, 2048 * MIB);
    // active_anon + inactive_anon, shmem is already on those lists
    assert_eq!(stats.used_bytes, 500 * MIB);
    assert_eq!(stats.free_bytes, 1248 * MIB);
    assert_eq!(stats.reclaimable_bytes, 200 * MIB);
}

#[test]
fn cgroup_v1_shmem_counted_once_in_target() {
    let dir = tempfile::tempdir().expect("tempdir");
    let meminfo = write_meminfo(dir.path());
    let root = dir.path().join("cgroup");
    write_v1(&root, 2048 * MIB, 800 * MIB);
    let stats = CgroupSource::new(&root, HostSource::new(meminfo)).collect().expect("ok");
    let plan = compute_target(&stats, &FillIntent::percent(50)).expect("ok");
    assert_eq!(plan.current_total_mb, 2048);
    assert_eq!(plan.target_delta_mb, 1024 - 500);
}

#[test]
fn cgroup_v1_unbounded_falls_back_to_host() {
    let dir = tempfile::tempdir().expect("tempdir");
    let meminfo = write_meminfo(dir.path());
    let root = dir.path().join("cgroup");
    write_v1(&root, PAGE_COUNTER_MAX, 800 * MIB);
    let stats = CgroupSource::new(&root, HostSource::new(meminfo)).collect().expect("ok");
    assert_eq!(stats.source, StatsOrigin::Host);
    assert_eq!(stats.total_bytes, 8192 * MIB);
    assert_eq!(stats.used_bytes, 500 * MIB);
}

#[test]
fn cgroup_v2_limited_and_unbounded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let meminfo = write_meminfo(dir.path());
    let root = dir.path().join("unified");
    fs::create_dir_all(&root).expect("mkdir");
    fs::write(root.join("memory.max"), format!("{}\n", 1024 * MIB)).expect("write");
    fs::write(root.join("memory.current"), format!("{}\n", 512 * MIB)).expect("write");
    let stat = format!("anon {}\nfile {}\nshmem {}\n", 256 * MIB, 256 * MIB, 64 * MIB);
    fs::write(root.join("memory.stat"), stat).expect("write");

    let source = CgroupSource::new(&root, HostSource::new(&meminfo));
    let reading = source.read().expect("read");
    assert_eq!(reading.limit, Some(1024 * MIB));
    let stats = source.collect().expect("ok");
    assert_eq!(stats.source, StatsOrigin::Cgroup);
    assert_eq!(stats.total_bytes, 1024 * MIB);
    assert_eq!(stats.used_bytes, 320 * MIB);
    assert_eq!(stats.free_bytes, 512 * MIB);
    assert_eq!(stats.reclaimable_bytes, 192 * MIB);

    fs::write(root.join("memory.max"), "max\n").expect("write");
    let stats = source.collect().expect("ok");
    assert_eq!(stats.source, StatsOrigin::Host);
    assert_eq!(stats.total_bytes, 8192 * MIB);
}

#[test]
fn missing_cgroup_uses_host() {
    let dir = tempfile::tempdir().expect("tempdir");
    let meminfo = write_meminfo(dir.path());
    let collector = Collector::new(false, &dir.path().join("nocgroup"), &meminfo);
    let stats = collector.collect().expect("ok");
    assert_eq!(stats.source, StatsOrigin::Host);
    assert_eq!(stats.total_bytes, 8192 * MIB);
}

#[test]
fn nothing_readable_is_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let collector = Collector::new(false, &dir.path().join("a"), &dir.path().join("b"));
    assert!(matches!(collector.collect(), Err(EngineError::StatsUnavailable(_))));
}

#[test]
fn malformed_counter_falls_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let meminfo = write_meminfo(dir.path());
    let root = dir.path().join("cgroup");
    write_v1(&root, 1, 1);
    fs::write(root.join("memory").join("memory.limit_in_bytes"), "garbage").expect("write");
    let source = CgroupSource::new(&root, HostSource::new(meminfo));
    assert!(source.read().is_err());
    assert_eq!(source.collect().expect("ok").source, StatsOrigin::Host);
}
