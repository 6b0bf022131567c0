#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use thiserror::Error;

/// Failure kinds surfaced by the pressure engine.
///
/// Nothing in the engine retries; every variant is reported to the caller as-is.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("memory stats unavailable: {0}")]
    StatsUnavailable(String),

    #[error("invalid memory stats: {0}")]
    InvalidStats(String),

    #[error("fill failed: {0}")]
    FillFailure(String),

    #[error("teardown failed: {}", .0.join("; "))]
    TeardownFailure(Vec<String>),

    #[error("setup failed: {0}")]
    SetupFailure(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Short stable label, used in logs and the start/stop response.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::StatsUnavailable(_) => "StatsUnavailable",
            EngineError::InvalidStats(_) => "InvalidStats",
            EngineError::FillFailure(_) => "FillFailure",
            EngineError::TeardownFailure(_) => "TeardownFailure",
            EngineError::SetupFailure(_) => "SetupFailure",
            EngineError::InvalidConfig(_) => "InvalidConfig",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
