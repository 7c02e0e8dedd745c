// src/pipeline/metrics.rs
//
// Run counters for the guidance pipeline. Cheap to clone; the detection
// worker and the tick loop share the same atomics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_ticks: Arc<AtomicU64>,
    pub ticks_with_vehicle: Arc<AtomicU64>,
    pub detections_requested: Arc<AtomicU64>,
    pub detections_skipped_busy: Arc<AtomicU64>,
    pub detections_applied: Arc<AtomicU64>,
    pub detections_discarded: Arc<AtomicU64>,
    pub detector_errors: Arc<AtomicU64>,
    pub damage_scans: Arc<AtomicU64>,
    pub speed_warnings: Arc<AtomicU64>,
    pub upload_successes: Arc<AtomicU64>,
    pub upload_failures: Arc<AtomicU64>,
    pub detector_time_us: Arc<AtomicU64>,
    pub damage_scan_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_ticks: Arc::new(AtomicU64::new(0)),
            ticks_with_vehicle: Arc::new(AtomicU64::new(0)),
            detections_requested: Arc::new(AtomicU64::new(0)),
            detections_skipped_busy: Arc::new(AtomicU64::new(0)),
            detections_applied: Arc::new(AtomicU64::new(0)),
            detections_discarded: Arc::new(AtomicU64::new(0)),
            detector_errors: Arc::new(AtomicU64::new(0)),
            damage_scans: Arc::new(AtomicU64::new(0)),
            speed_warnings: Arc::new(AtomicU64::new(0)),
            upload_successes: Arc::new(AtomicU64::new(0)),
            upload_failures: Arc::new(AtomicU64::new(0)),
            detector_time_us: Arc::new(AtomicU64::new(0)),
            damage_scan_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn ticks_per_second(&self) -> f64 {
        let ticks = self.total_ticks.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            ticks as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_ticks: self.total_ticks.load(Ordering::Relaxed),
            ticks_per_second: self.ticks_per_second(),
            ticks_with_vehicle: self.ticks_with_vehicle.load(Ordering::Relaxed),
            detections_requested: self.detections_requested.load(Ordering::Relaxed),
            detections_skipped_busy: self.detections_skipped_busy.load(Ordering::Relaxed),
            detections_applied: self.detections_applied.load(Ordering::Relaxed),
            detections_discarded: self.detections_discarded.load(Ordering::Relaxed),
            detector_errors: self.detector_errors.load(Ordering::Relaxed),
            damage_scans: self.damage_scans.load(Ordering::Relaxed),
            speed_warnings: self.speed_warnings.load(Ordering::Relaxed),
            upload_successes: self.upload_successes.load(Ordering::Relaxed),
            upload_failures: self.upload_failures.load(Ordering::Relaxed),
            last_detector_us: self.detector_time_us.load(Ordering::Relaxed),
            last_damage_scan_us: self.damage_scan_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_ticks: u64,
    pub ticks_per_second: f64,
    pub ticks_with_vehicle: u64,
    pub detections_requested: u64,
    pub detections_skipped_busy: u64,
    pub detections_applied: u64,
    pub detections_discarded: u64,
    pub detector_errors: u64,
    pub damage_scans: u64,
    pub speed_warnings: u64,
    pub upload_successes: u64,
    pub upload_failures: u64,
    pub last_detector_us: u64,
    pub last_damage_scan_us: u64,
    pub elapsed_secs: f64,
}
