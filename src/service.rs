#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::calculator::compute_target;
use crate::config::EngineConfig;
use crate::domain::{FillIntent, Mode};
use crate::error::{EngineError, EngineResult};
use crate::lib_cache::{CommandMount, FileGrowth};
use crate::lib_mem::HeapGrowth;
use crate::metrics::Metrics;
use crate::stats::{Collector, StatsSource};

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// How a strategy wants a positive delta below the rate cap handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TailPolicy {
    /// Approach the target in tenths of the remaining delta.
    Tenth,
    /// Apply the remaining delta in one step.
    Direct,
}

/// A way of turning megabytes into real memory consumption.
///
/// `fill` is only ever called with a positive amount.
pub trait FillStrategy {
    fn mode(&self) -> Mode;

    fn tail_policy(&self) -> TailPolicy {
        TailPolicy::Direct
    }

    /// Checks preconditions before the loop starts running.
    fn setup(&mut self) -> EngineResult<()> {
        Ok(())
    }

    /// Consumes `amount_mb` more. `target_delta_mb` is the uncapped remaining delta.
    fn fill(&mut self, amount_mb: u64, target_delta_mb: u64) -> EngineResult<()>;

    /// Megabytes held so far.
    fn footprint_mb(&self) -> u64;

    /// Releases strategy-owned external resources.
    fn teardown(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

impl<F: FillStrategy + ?Sized> FillStrategy for Box<F> {
    fn mode(&self) -> Mode {
        (**self).mode()
    }
    fn tail_policy(&self) -> TailPolicy {
        (**self).tail_policy()
    }
    fn setup(&mut self) -> EngineResult<()> {
        (**self).setup()
    }
    fn fill(&mut self, amount_mb: u64, target_delta_mb: u64) -> EngineResult<()> {
        (**self).fill(amount_mb, target_delta_mb)
    }
    fn footprint_mb(&self) -> u64 {
        (**self).footprint_mb()
    }
    fn teardown(&mut self) -> EngineResult<()> {
        (**self).teardown()
    }
}

/// Paces the loop. Returns `false` once no more ticks will come.
pub trait TickSource {
    fn next_tick(&mut self) -> impl Future<Output = bool>;
}

/// Wall-clock ticks, first one a full period after creation.
pub struct IntervalTicks {
    interval: Interval,
}

impl IntervalTicks {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

impl TickSource for IntervalTicks {
    async fn next_tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// A fixed number of immediate ticks.
#[derive(Clone, Copy, Debug)]
pub struct ManualTicks {
    remaining: u64,
}

impl ManualTicks {
    pub fn new(count: u64) -> Self {
        Self { remaining: count }
    }
}

impl TickSource for ManualTicks {
    async fn next_tick(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Filled { amount_mb: u64 },
    Skipped,
}

/// Amount to hand to the strategy this tick, zero meaning skip.
///
/// Deltas above the rate are capped to it. Smaller positive deltas follow the strategy's
/// tail policy.
pub fn applied_amount(target_delta_mb: i64, rate_mb: u64, tail: TailPolicy) -> u64 {
    let Ok(delta) = u64::try_from(target_delta_mb) else {
        return 0;
    };
    if delta > rate_mb {
        return rate_mb;
    }
    match tail {
        TailPolicy::Tenth => delta / 10,
        TailPolicy::Direct => delta,
    }
}

pub struct PressureLoop<S: StatsSource, F: FillStrategy> {
    stats: S,
    strategy: F,
    intent: FillIntent,
    rate_mb: u64,
    metrics: Metrics,
    metrics_file: Option<PathBuf>,
    state: LoopState,
}

impl<S: StatsSource, F: FillStrategy> PressureLoop<S, F> {
    pub fn new(config: &EngineConfig, stats: S, strategy: F, metrics: Metrics) -> Self {
        Self {
            stats,
            strategy,
            intent: config.intent,
            rate_mb: config.rate_mb,
            metrics,
            metrics_file: config.metrics_file.clone(),
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn strategy(&self) -> &F {
        &self.strategy
    }

    /// Runs strategy setup and enters `Running`.
    pub fn start(&mut self) -> EngineResult<()> {
        match self.state {
            LoopState::Idle => {}
            LoopState::Running => return Ok(()),
            LoopState::Stopping | LoopState::Stopped => {
                return Err(EngineError::SetupFailure("pressure loop already stopped".into()))
            }
        }
        if let Err(e) = self.strategy.setup() {
            self.state = LoopState::Stopped;
            return Err(e);
        }
        self.state = LoopState::Running;
        self.metrics.active.set(1);
        self.metrics
            .rate_mb
            .set(i64::try_from(self.rate_mb).unwrap_or(i64::MAX));
        info!(mode = %self.strategy.mode(), rate_mb = self.rate_mb, "pressure loop running");
        Ok(())
    }

    /// One iteration. Any failure stops the loop and tears the strategy down.
    pub fn tick_once(&mut self) -> EngineResult<TickOutcome> {
        if self.state != LoopState::Running {
            return Ok(TickOutcome::Skipped);
        }
        let res = self.iterate();
        self.publish();
        if let Err(e) = &res {
            error!(kind = e.kind(), error = %e, "pressure tick failed, stopping");
            if let Err(te) = self.stop() {
                error!(error = %te, "teardown after failed tick");
            }
        }
        res
    }

    fn iterate(&mut self) -> EngineResult<TickOutcome> {
        let stats = self.stats.collect()?;
        let plan = compute_target(&stats, &self.intent)?;
        self.metrics.ticks_total.inc();
        self.metrics.target_delta_mb.set(plan.target_delta_mb);
        let amount = applied_amount(plan.target_delta_mb, self.rate_mb, self.strategy.tail_policy());
        debug!(
            total_mb = plan.current_total_mb,
            target_delta_mb = plan.target_delta_mb,
            amount,
            "pressure tick"
        );
        if amount == 0 {
            self.metrics.skipped_ticks_total.inc();
            return Ok(TickOutcome::Skipped);
        }
        let target = u64::try_from(plan.target_delta_mb).unwrap_or(0);
        self.strategy.fill(amount, target)?;
        self.metrics.filled_mb_total.inc_by(amount);
        Ok(TickOutcome::Filled { amount_mb: amount })
    }

    fn publish(&self) {
        self.metrics
            .footprint_mb
            .set(i64::try_from(self.strategy.footprint_mb()).unwrap_or(i64::MAX));
        if let Some(path) = &self.metrics_file {
            if let Err(e) = self.metrics.write_textfile(path) {
                warn!(error = %format!("{e:#}"), "write metrics file failed");
            }
        }
    }

    /// Tears the strategy down. Stopping a stopped loop does nothing.
    pub fn stop(&mut self) -> EngineResult<()> {
        match self.state {
            LoopState::Stopped | LoopState::Stopping => return Ok(()),
            LoopState::Idle => {
                self.state = LoopState::Stopped;
                return Ok(());
            }
            LoopState::Running => {}
        }
        self.state = LoopState::Stopping;
        self.metrics.active.set(0);
        let res = self.strategy.teardown();
        self.state = LoopState::Stopped;
        info!(footprint_mb = self.strategy.footprint_mb(), "pressure loop stopped");
        res
    }

    /// Starts the loop and ticks until the source is exhausted or a tick fails.
    ///
    /// Exhaustion leaves the loop `Running` with its memory held; call `stop` to tear down.
    pub async fn run<T: TickSource>(&mut self, ticks: &mut T) -> EngineResult<()> {
        self.start()?;
        while ticks.next_tick().await {
            self.tick_once()?;
        }
        Ok(())
    }
}

/// Body of the detached `--nohup` process: runs the loop on wall-clock ticks until killed.
pub async fn run_detached(config: &EngineConfig) -> EngineResult<()> {
    let metrics =
        Metrics::new().map_err(|e| EngineError::SetupFailure(format!("metrics init: {e:#}")))?;
    let stats = Collector::new(config.is_host, &config.cgroup_root, &config.proc_meminfo);
    let strategy: Box<dyn FillStrategy> = match config.mode {
        Mode::Ram => Box::new(HeapGrowth::new()),
        Mode::Cache => Box::new(FileGrowth::new(config.tmpfs_dir(), CommandMount)),
    };
    let mut pressure = PressureLoop::new(config, stats, strategy, metrics);
    pressure.run(&mut IntervalTicks::new(TICK_PERIOD)).await
}
