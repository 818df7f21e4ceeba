use crate::cache::CacheStatus;
use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

pub struct Metrics {
    registry: Registry,
    wall_requests: IntCounterVec,
    tile_failures: IntCounter,
    generation_duration: Histogram,
    tiles_rendered: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let wall_requests = IntCounterVec::new(
            Opts::new("wall_requests_total", "Wall requests by cache result"),
            &["result"],
        )
        .expect("wall_requests_total");
        let tile_failures = IntCounter::new(
            "wall_tile_failures_total",
            "Tiles dropped because fetch, decode or resize failed",
        )
        .expect("wall_tile_failures_total");
        let generation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "wall_generation_duration_seconds",
                "Time spent regenerating the wall image",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]),
        )
        .expect("wall_generation_duration_seconds");
        let tiles_rendered = IntGauge::new(
            "wall_tiles_rendered",
            "Tiles placed on the most recently generated wall",
        )
        .expect("wall_tiles_rendered");

        registry
            .register(Box::new(wall_requests.clone()))
            .expect("register wall_requests_total");
        registry
            .register(Box::new(tile_failures.clone()))
            .expect("register wall_tile_failures_total");
        registry
            .register(Box::new(generation_duration.clone()))
            .expect("register wall_generation_duration_seconds");
        registry
            .register(Box::new(tiles_rendered.clone()))
            .expect("register wall_tiles_rendered");

        Self {
            registry,
            wall_requests,
            tile_failures,
            generation_duration,
            tiles_rendered,
        }
    }

    pub fn gather(&self) -> Result<String> {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }

    pub fn observe_cache_status(&self, status: CacheStatus) {
        let label = match status {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
        };
        self.wall_requests.with_label_values(&[label]).inc();
    }

    pub fn observe_wall_error(&self) {
        self.wall_requests.with_label_values(&["error"]).inc();
    }

    pub fn observe_tile_failure(&self) {
        self.tile_failures.inc();
    }

    pub fn observe_generation(&self, duration: Duration, tiles: usize) {
        self.generation_duration.observe(duration.as_secs_f64());
        self.tiles_rendered.set(tiles as i64);
    }

    #[cfg(test)]
    pub fn tile_failures(&self) -> u64 {
        self.tile_failures.get()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
