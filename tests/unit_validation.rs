#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use chimp_burnmem::config::{Action, Cli, EngineConfig};
use chimp_burnmem::domain::{FillIntent, FillPolicy, Mode};
use chimp_burnmem::validation::validate_config;
use clap::Parser;

fn parse(args: &[&str]) -> Cli {
    let mut argv = vec!["chimp_burnmem"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).expect("parse")
}

#[test]
fn ok_defaults() {
    let cli = parse(&["--start", "--work-dir", "/opt/chaos"]);
    assert_eq!(cli.action().expect("action"), Action::Start);
    let cfg = EngineConfig::from_cli(&cli).expect("cfg");
    assert_eq!(cfg.mode, Mode::Cache);
    assert_eq!(cfg.rate_mb, 100);
    assert_eq!(cfg.intent.policy(), FillPolicy::Percent(100));
    assert_eq!(cfg.tmpfs_dir(), std::path::PathBuf::from("/opt/chaos/burnmem_tmpfs"));
    assert!(validate_config(&cfg).is_ok());
}

#[test]
fn ok_ram_reserve() {
    let cli = parse(&["--nohup", "--mode", "ram", "--reserve", "200", "--rate", "0", "--work-dir", "/x"]);
    assert_eq!(cli.action().expect("action"), Action::Nohup);
    let cfg = EngineConfig::from_cli(&cli).expect("cfg");
    assert_eq!(cfg.mode, Mode::Ram);
    assert_eq!(cfg.intent.policy(), FillPolicy::ReserveMb(200));
    assert_eq!(cfg.rate_mb, 100);
}

#[test]
fn err_no_action() {
    let cli = parse(&["--mem-percent", "50"]);
    let err = cli.action().expect_err("no action");
    assert!(err.to_string().contains("less --start or --stop flag"));
}

#[test]
fn err_two_actions() {
    assert!(parse(&["--start", "--stop"]).action().is_err());
}

#[test]
fn err_bad_mode() {
    assert!(Cli::try_parse_from(["chimp_burnmem", "--start", "--mode", "disk"]).is_err());
}

#[test]
fn err_percent_range() {
    let mut cfg = EngineConfig::new(FillIntent::percent(101), Mode::Ram, "/x");
    assert!(validate_config(&cfg).is_err());
    cfg.intent.percent = Some(100);
    assert!(validate_config(&cfg).is_ok());
    cfg.intent.percent = Some(0);
    assert!(validate_config(&cfg).is_ok());
}

#[test]
fn nohup_args_round_trip() {
    let cli = parse(&[
        "--start",
        "--mode",
        "ram",
        "--mem-percent",
        "70",
        "--rate",
        "50",
        "--include-buffer-cache",
        "--is-host",
        "--work-dir",
        "/opt/chaos",
    ]);
    let cfg = EngineConfig::from_cli(&cli).expect("cfg");
    let args = cfg.nohup_args();
    let mut argv = vec!["chimp_burnmem".to_string()];
    argv.extend(args);
    let child = Cli::try_parse_from(argv).expect("child parse");
    assert_eq!(child.action().expect("action"), Action::Nohup);
    assert_eq!(EngineConfig::from_cli(&child).expect("cfg"), cfg);
}
