#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Rejects configs the engine cannot run.
pub fn validate_config(cfg: &EngineConfig) -> EngineResult<()> {
    if let Some(p) = cfg.intent.percent {
        if p > 100 {
            return Err(EngineError::InvalidConfig(
                "mem-percent must be a positive integer and not bigger than 100".into(),
            ));
        }
    }
    if cfg.rate_mb == 0 {
        return Err(EngineError::InvalidConfig("rate must be a positive integer".into()));
    }
    if cfg.work_dir.as_os_str().is_empty() {
        return Err(EngineError::InvalidConfig("work-dir is empty".into()));
    }
    Ok(())
}
