//! Lock-free performance counters.
//!
//! The coordinator thread updates these via atomic operations after every
//! `tick` — no locks, no allocations, no blocking on the hot path. The
//! dashboard server reads them at its own pace.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::{Duration, Instant};

/// Atomic performance counters. ~10 ns to update (a handful of `fetch_add`s).
pub struct Metrics {
    ticks_total: AtomicU64,
    sections_loaded_total: AtomicU64,
    sections_unloaded_total: AtomicU64,
    load_failures_total: AtomicU64,
    unload_deferred_total: AtomicU64,

    // Latency histogram buckets (tick duration)
    hist_under_1us: AtomicU64,
    hist_1_10us: AtomicU64,
    hist_10_100us: AtomicU64,
    hist_100us_1ms: AtomicU64,
    hist_over_1ms: AtomicU64,

    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks_total: AtomicU64::new(0),
            sections_loaded_total: AtomicU64::new(0),
            sections_unloaded_total: AtomicU64::new(0),
            load_failures_total: AtomicU64::new(0),
            unload_deferred_total: AtomicU64::new(0),
            hist_under_1us: AtomicU64::new(0),
            hist_1_10us: AtomicU64::new(0),
            hist_10_100us: AtomicU64::new(0),
            hist_100us_1ms: AtomicU64::new(0),
            hist_over_1ms: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Called after each `StreamingSystem::tick` completes. Zero-alloc, ~10 ns.
    pub fn record_tick(&self, duration: Duration) {
        self.ticks_total.fetch_add(1, Relaxed);
        let us = duration.as_micros() as u64;
        match us {
            0 => {
                self.hist_under_1us.fetch_add(1, Relaxed);
            }
            1..=9 => {
                self.hist_1_10us.fetch_add(1, Relaxed);
            }
            10..=99 => {
                self.hist_10_100us.fetch_add(1, Relaxed);
            }
            100..=999 => {
                self.hist_100us_1ms.fetch_add(1, Relaxed);
            }
            _ => {
                self.hist_over_1ms.fetch_add(1, Relaxed);
            }
        }
    }

    pub fn section_loaded(&self) {
        self.sections_loaded_total.fetch_add(1, Relaxed);
    }

    pub fn section_unloaded(&self) {
        self.sections_unloaded_total.fetch_add(1, Relaxed);
    }

    pub fn load_failed(&self) {
        self.load_failures_total.fetch_add(1, Relaxed);
    }

    pub fn unload_deferred(&self) {
        self.unload_deferred_total.fetch_add(1, Relaxed);
    }

    /// Read all counters into a serializable snapshot.
    /// Called by the dashboard server (~every 200 ms), never by the coordinator.
    pub fn snapshot(&self, sections_resident: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            ticks_total: self.ticks_total.load(Relaxed),
            sections_loaded_total: self.sections_loaded_total.load(Relaxed),
            sections_unloaded_total: self.sections_unloaded_total.load(Relaxed),
            load_failures_total: self.load_failures_total.load(Relaxed),
            unload_deferred_total: self.unload_deferred_total.load(Relaxed),
            sections_resident,
            hist: [
                self.hist_under_1us.load(Relaxed),
                self.hist_1_10us.load(Relaxed),
                self.hist_10_100us.load(Relaxed),
                self.hist_100us_1ms.load(Relaxed),
                self.hist_over_1ms.load(Relaxed),
            ],
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of all metrics at a point in time.
/// The client computes rates (ticks/sec, etc.) by diffing consecutive snapshots.
#[derive(Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub ticks_total: u64,
    pub sections_loaded_total: u64,
    pub sections_unloaded_total: u64,
    pub load_failures_total: u64,
    pub unload_deferred_total: u64,
    pub sections_resident: u64,
    /// `[<1μs, 1-10μs, 10-100μs, 100μs-1ms, >1ms]`
    pub hist: [u64; 5],
}
