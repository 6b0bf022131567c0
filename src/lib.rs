#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

pub mod calculator;
pub mod config;
pub mod domain;
pub mod error;
pub mod lib_cache;
pub mod lib_mem;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod service;
pub mod stats;
pub mod validation;

pub use calculator::compute_target;
pub use config::{Action, Cli, EngineConfig};
pub use domain::{FillIntent, FillPlan, FillPolicy, MemoryStats, Mode, RunHandle, StatsOrigin};
pub use error::{EngineError, EngineResult};
pub use lib_cache::{CommandMount, FileGrowth, TmpfsMount};
pub use lib_mem::HeapGrowth;
pub use lifecycle::{Lifecycle, ProcessSupervisor, SysinfoSupervisor};
pub use metrics::Metrics;
pub use service::{FillStrategy, PressureLoop, run_detached};
pub use stats::{CgroupSource, Collector, HostSource, StatsSource};
pub use validation::validate_config;
