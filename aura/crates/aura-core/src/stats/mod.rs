//! Stats Module - Runtime Counters
//!
//! Relaxed atomic counters for the monitor, unwind and safepoint paths, plus
//! latency histograms for stop-the-world requests.
//!
//! Metrics:
//! - Monitor traffic (thin acquires, contention, inflation/deflation)
//! - Wait/notify traffic
//! - Exceptions (throws, frames unwound, handlers, uncaught, traps)
//! - Safepoints (count, time-to-safepoint, pause length)

pub mod histogram;
pub mod metrics;

pub use histogram::Histogram;
pub use metrics::{MetricValue, VmMetrics};

use crate::util::AtomicUtils;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// VmStats - statistics collector for the execution core
pub struct VmStats {
    enabled: AtomicBool,

    thin_acquires: AtomicU64,
    contended_acquires: AtomicU64,
    inflations: AtomicU64,
    deflations: AtomicU64,
    waits: AtomicU64,
    wait_timeouts: AtomicU64,
    notifications: AtomicU64,

    throws: AtomicU64,
    frames_unwound: AtomicU64,
    handlers_found: AtomicU64,
    uncaught: AtomicU64,
    traps_translated: AtomicU64,

    safepoints: AtomicU64,
    time_to_safepoint: Histogram,
    safepoint_pause: Histogram,

    start_time: Instant,
}

impl VmStats {
    /// Create new stats collector
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            thin_acquires: AtomicU64::new(0),
            contended_acquires: AtomicU64::new(0),
            inflations: AtomicU64::new(0),
            deflations: AtomicU64::new(0),
            waits: AtomicU64::new(0),
            wait_timeouts: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
            throws: AtomicU64::new(0),
            frames_unwound: AtomicU64::new(0),
            handlers_found: AtomicU64::new(0),
            uncaught: AtomicU64::new(0),
            traps_translated: AtomicU64::new(0),
            safepoints: AtomicU64::new(0),
            time_to_safepoint: Histogram::new(),
            safepoint_pause: Histogram::new(),
            start_time: Instant::now(),
        }
    }

    /// Check if collection is enabled
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enable or disable collection
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    #[inline]
    fn bump(&self, counter: &AtomicU64, by: u64) {
        if self.is_enabled() {
            AtomicUtils::saturating_add(counter, by);
        }
    }

    pub fn record_thin_acquire(&self) {
        self.bump(&self.thin_acquires, 1);
    }

    pub fn record_contended_acquire(&self) {
        self.bump(&self.contended_acquires, 1);
    }

    pub fn record_inflation(&self) {
        self.bump(&self.inflations, 1);
    }

    pub fn record_deflation(&self) {
        self.bump(&self.deflations, 1);
    }

    pub fn record_wait(&self) {
        self.bump(&self.waits, 1);
    }

    pub fn record_wait_timeout(&self) {
        self.bump(&self.wait_timeouts, 1);
    }

    pub fn record_notifications(&self, count: usize) {
        self.bump(&self.notifications, count as u64);
    }

    pub fn record_throw(&self) {
        self.bump(&self.throws, 1);
    }

    pub fn record_frames_unwound(&self, count: usize) {
        self.bump(&self.frames_unwound, count as u64);
    }

    pub fn record_handler_found(&self) {
        self.bump(&self.handlers_found, 1);
    }

    pub fn record_uncaught(&self) {
        self.bump(&self.uncaught, 1);
    }

    pub fn record_trap(&self) {
        self.bump(&self.traps_translated, 1);
    }

    /// Record a completed stop-the-world request
    ///
    /// # Arguments
    /// * `time_to_safepoint` - From request until every thread was safe
    pub fn record_safepoint(&self, time_to_safepoint: Duration) {
        if !self.is_enabled() {
            return;
        }
        self.safepoints.fetch_add(1, Ordering::Relaxed);
        self.time_to_safepoint
            .record(time_to_safepoint.as_micros() as u64);
    }

    /// Record how long threads stayed stopped
    pub fn record_safepoint_pause(&self, pause: Duration) {
        if self.is_enabled() {
            self.safepoint_pause.record(pause.as_micros() as u64);
        }
    }

    /// Time-to-safepoint histogram (microseconds)
    pub fn time_to_safepoint(&self) -> &Histogram {
        &self.time_to_safepoint
    }

    /// Safepoint pause histogram (microseconds)
    pub fn safepoint_pause(&self) -> &Histogram {
        &self.safepoint_pause
    }

    /// Get a point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            thin_acquires: load(&self.thin_acquires),
            contended_acquires: load(&self.contended_acquires),
            inflations: load(&self.inflations),
            deflations: load(&self.deflations),
            waits: load(&self.waits),
            wait_timeouts: load(&self.wait_timeouts),
            notifications: load(&self.notifications),
            throws: load(&self.throws),
            frames_unwound: load(&self.frames_unwound),
            handlers_found: load(&self.handlers_found),
            uncaught: load(&self.uncaught),
            traps_translated: load(&self.traps_translated),
            safepoints: load(&self.safepoints),
            max_time_to_safepoint_us: self.time_to_safepoint.max(),
            max_safepoint_pause_us: self.safepoint_pause.max(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Export counters as an ordered metric set
    pub fn to_metrics(&self) -> VmMetrics {
        let snapshot = self.snapshot();
        let mut metrics = VmMetrics::new();

        metrics.add("aura_monitor_thin_acquires_total", MetricValue::Counter(snapshot.thin_acquires));
        metrics.add(
            "aura_monitor_contended_acquires_total",
            MetricValue::Counter(snapshot.contended_acquires),
        );
        metrics.add("aura_monitor_inflations_total", MetricValue::Counter(snapshot.inflations));
        metrics.add("aura_monitor_deflations_total", MetricValue::Counter(snapshot.deflations));
        metrics.add("aura_monitor_waits_total", MetricValue::Counter(snapshot.waits));
        metrics.add("aura_monitor_wait_timeouts_total", MetricValue::Counter(snapshot.wait_timeouts));
        metrics.add("aura_monitor_notifications_total", MetricValue::Counter(snapshot.notifications));
        metrics.add("aura_exceptions_thrown_total", MetricValue::Counter(snapshot.throws));
        metrics.add("aura_frames_unwound_total", MetricValue::Counter(snapshot.frames_unwound));
        metrics.add("aura_handlers_found_total", MetricValue::Counter(snapshot.handlers_found));
        metrics.add("aura_uncaught_exceptions_total", MetricValue::Counter(snapshot.uncaught));
        metrics.add("aura_traps_translated_total", MetricValue::Counter(snapshot.traps_translated));
        metrics.add("aura_safepoints_total", MetricValue::Counter(snapshot.safepoints));
        metrics.add(
            "aura_time_to_safepoint_p99_us",
            MetricValue::Gauge(self.time_to_safepoint.p99() as f64),
        );
        metrics.add(
            "aura_safepoint_pause_p99_us",
            MetricValue::Gauge(self.safepoint_pause.p99() as f64),
        );

        metrics
    }

    /// Reset statistics
    pub fn reset(&self) {
        for counter in [
            &self.thin_acquires,
            &self.contended_acquires,
            &self.inflations,
            &self.deflations,
            &self.waits,
            &self.wait_timeouts,
            &self.notifications,
            &self.throws,
            &self.frames_unwound,
            &self.handlers_found,
            &self.uncaught,
            &self.traps_translated,
            &self.safepoints,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.time_to_safepoint.clear();
        self.safepoint_pause.clear();
    }
}

impl Default for VmStats {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Point-in-time counter values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub thin_acquires: u64,
    pub contended_acquires: u64,
    pub inflations: u64,
    pub deflations: u64,
    pub waits: u64,
    pub wait_timeouts: u64,
    pub notifications: u64,
    pub throws: u64,
    pub frames_unwound: u64,
    pub handlers_found: u64,
    pub uncaught: u64,
    pub traps_translated: u64,
    pub safepoints: u64,
    pub max_time_to_safepoint_us: u64,
    pub max_safepoint_pause_us: u64,
    pub uptime_secs: u64,
}
