#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use crate::domain::{FillIntent, FillPlan, FillPolicy, MemoryStats, MIB};
use crate::error::{EngineError, EngineResult};

/// Turns a stats snapshot and the run's intent into this tick's fill plan.
///
/// The used side of the equation never includes reclaimable memory. `include_reclaimable`
/// only widens the available capacity a reserve target is clamped against.
#[allow(clippy::cast_possible_wrap)]
pub fn compute_target(stats: &MemoryStats, intent: &FillIntent) -> EngineResult<FillPlan> {
    if stats.total_bytes == 0 {
        return Err(EngineError::InvalidStats("total memory is zero".into()));
    }
    let total_mb = (stats.total_bytes / MIB) as i64;
    let used_mb = (stats.used_bytes / MIB) as i64;

    let target_delta_mb = match intent.policy() {
        FillPolicy::Percent(percent) => {
            let percent = i64::from(percent.min(100));
            total_mb * percent / 100 - used_mb
        }
        FillPolicy::ReserveMb(reserve_mb) => {
            let reserve_mb = i64::try_from(reserve_mb).unwrap_or(i64::MAX);
            let wanted = total_mb.saturating_sub(reserve_mb).saturating_sub(used_mb);
            let available_mb = (stats.available_bytes(intent.include_reclaimable) / MIB) as i64;
            wanted.min(available_mb)
        }
    };

    Ok(FillPlan {
        current_total_mb: total_mb,
        target_delta_mb,
    })
}
