#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::fs;
use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,
    pub active: IntGauge,
    pub footprint_mb: IntGauge,
    pub target_delta_mb: IntGauge,
    pub rate_mb: IntGauge,
    pub ticks_total: IntCounter,
    pub skipped_ticks_total: IntCounter,
    pub filled_mb_total: IntCounter,
}

impl Metrics {
    pub fn new() -> AnyResult<Self> {
        let registry = Registry::new();
        let active = IntGauge::with_opts(Opts::new(
            "burnmem_active",
            "1 while the pressure loop is running",
        ))
        .context("create active")?;
        let footprint_mb = IntGauge::with_opts(Opts::new(
            "burnmem_footprint_mb",
            "memory held by the fill strategy",
        ))
        .context("create footprint_mb")?;
        let target_delta_mb = IntGauge::with_opts(Opts::new(
            "burnmem_target_delta_mb",
            "uncapped delta computed on the last tick",
        ))
        .context("create target_delta_mb")?;
        let rate_mb = IntGauge::with_opts(Opts::new("burnmem_rate_mb", "per-tick fill cap"))
            .context("create rate_mb")?;
        registry
            .register(Box::new(active.clone()))
            .context("register active")?;
        registry
            .register(Box::new(footprint_mb.clone()))
            .context("register footprint_mb")?;
        registry
            .register(Box::new(target_delta_mb.clone()))
            .context("register target_delta_mb")?;
        registry
            .register(Box::new(rate_mb.clone()))
            .context("register rate_mb")?;
        let ticks_total = IntCounter::with_opts(Opts::new("burnmem_ticks_total", "loop ticks"))
            .context("create ticks_total")?;
        let skipped_ticks_total = IntCounter::with_opts(Opts::new(
            "burnmem_skipped_ticks_total",
            "ticks with nothing to fill",
        ))
        .context("create skipped_ticks_total")?;
        let filled_mb_total =
            IntCounter::with_opts(Opts::new("burnmem_filled_mb_total", "megabytes filled"))
                .context("create filled_mb_total")?;
        registry
            .register(Box::new(ticks_total.clone()))
            .context("register ticks_total")?;
        registry
            .register(Box::new(skipped_ticks_total.clone()))
            .context("register skipped_ticks_total")?;
        registry
            .register(Box::new(filled_mb_total.clone()))
            .context("register filled_mb_total")?;
        Ok(Self {
            registry,
            active,
            footprint_mb,
            target_delta_mb,
            rate_mb,
            ticks_total,
            skipped_ticks_total,
            filled_mb_total,
        })
    }

    pub fn encode_text(&self) -> AnyResult<Vec<u8>> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf).context("encode metrics")?;
        Ok(buf)
    }

    /// Rewrites `path` with the current exposition, textfile-collector style.
    pub fn write_textfile(&self, path: &Path) -> AnyResult<()> {
        let buf = self.encode_text()?;
        let tmp = path.with_extension("prom.tmp");
        fs::write(&tmp, buf).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("rename to {}", path.display()))?;
        Ok(())
    }
}
