use crate::beacon::ApiMetricsSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Counters describing what the poll loop has done so far.
#[derive(Default, Debug)]
pub struct Telemetry {
    ticks: AtomicU64,
    refreshes: AtomicU64,
    fetch_failures: AtomicU64,
    duties_reported: AtomicU64,
    api_errors: AtomicU64,
    api_timeouts: AtomicU64,
}

impl Telemetry {
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    /// One fetch operation that returned nothing usable.
    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duties_reported(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.duties_reported.fetch_add(count, Ordering::Relaxed);
    }

    /// Copies the latest client-side request counters. They are cumulative, so the
    /// newest snapshot replaces the previous one.
    pub fn record_api_metrics(&self, metrics: &ApiMetricsSnapshot) {
        self.api_errors.store(metrics.total_errors, Ordering::Relaxed);
        self.api_timeouts.store(metrics.total_timeouts, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            duties_reported: self.duties_reported.load(Ordering::Relaxed),
            api_errors: self.api_errors.load(Ordering::Relaxed),
            api_timeouts: self.api_timeouts.load(Ordering::Relaxed),
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }

    /// Logs the final counters once the loop has stopped.
    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "dutywatch::metrics",
            ticks = snapshot.ticks,
            refreshes = snapshot.refreshes,
            fetch_failures = snapshot.fetch_failures,
            duties_reported = snapshot.duties_reported,
            api_errors = snapshot.api_errors,
            api_timeouts = snapshot.api_timeouts,
            "monitor metrics summary"
        );
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub ticks: u64,
    pub refreshes: u64,
    pub fetch_failures: u64,
    pub duties_reported: u64,
    pub api_errors: u64,
    pub api_timeouts: u64,
}
