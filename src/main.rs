#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::process::ExitCode;

use chimp_burnmem::config::{Action, Cli, EngineConfig};
use chimp_burnmem::lib_cache::CommandMount;
use chimp_burnmem::lifecycle::{Lifecycle, SysinfoSupervisor};
use chimp_burnmem::logging::init_tracing;
use chimp_burnmem::{run_detached, EngineError};
use clap::Parser;
use serde_json::json;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let cfg = match EngineConfig::from_cli(&cli) {
        Ok(cfg) => cfg,
        Err(e) => return fail("InvalidConfig", &format!("{e:#}")),
    };
    let _guard = match init_tracing(cfg.debug, cfg.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => return fail("SetupFailure", &format!("{e:#}")),
    };
    let action = match cli.action() {
        Ok(action) => action,
        Err(e) => return fail("InvalidConfig", &format!("{e:#}")),
    };
    info!(?action, mode = %cfg.mode, "burn memory invoked");

    let res = match action {
        Action::Start => lifecycle().and_then(|lc| lc.start_run(&cfg)).map(|handle| json!(handle)),
        Action::Stop => lifecycle().and_then(|lc| lc.stop_run(&cfg)).map(|()| json!(null)),
        Action::Nohup => run_detached(&cfg).await.map(|()| json!(null)),
    };
    match res {
        Ok(result) => {
            println!("{}", json!({"status": "ok", "result": result}));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(kind = e.kind(), error = %e, "burn memory failed");
            fail(e.kind(), &e.to_string())
        }
    }
}

fn lifecycle() -> Result<Lifecycle<SysinfoSupervisor, CommandMount>, EngineError> {
    Ok(Lifecycle::new(SysinfoSupervisor::current()?, CommandMount))
}

fn fail(kind: &str, reason: &str) -> ExitCode {
    eprintln!("{}", json!({"status": "error", "kind": kind, "reason": reason}));
    ExitCode::FAILURE
}
