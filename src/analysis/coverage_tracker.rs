// src/analysis/coverage_tracker.rs
//
// Time-based proxy for walk-around completeness. A full walk-around is
// assumed to take a fixed duration; coverage is elapsed recording time as
// a fraction of it. This does not measure angular coverage.

use tracing::info;

pub struct CoverageTracker {
    full_duration_s: f64,
    started_at_ms: Option<f64>,
    percent: f32,
}

impl CoverageTracker {
    pub fn new(full_duration_s: f64) -> Self {
        Self {
            full_duration_s,
            started_at_ms: None,
            percent: 0.0,
        }
    }

    /// Start (or restart) the timer. Coverage resets to zero.
    pub fn start(&mut self, now_ms: f64) {
        self.started_at_ms = Some(now_ms);
        self.percent = 0.0;
    }

    /// Stop the timer. The last value stays visible until the next start.
    pub fn stop(&mut self) {
        if self.started_at_ms.take().is_some() {
            info!("Coverage frozen at {:.0}%", self.percent);
        }
    }

    /// Clear everything, e.g. on a new session.
    pub fn reset(&mut self) {
        self.started_at_ms = None;
        self.percent = 0.0;
    }

    /// Recompute coverage for this tick. No-op when stopped.
    pub fn update(&mut self, now_ms: f64) -> f32 {
        if let Some(started) = self.started_at_ms {
            let elapsed_s = ((now_ms - started) / 1000.0).max(0.0);
            let pct = (elapsed_s / self.full_duration_s * 100.0).min(100.0) as f32;
            // Never step backwards within one recording
            self.percent = self.percent.max(pct);
        }
        self.percent
    }

    pub fn percent(&self) -> f32 {
        self.percent
    }

    pub fn is_complete(&self) -> bool {
        self.percent >= 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coverage_grows_and_caps() {
        let mut cov = CoverageTracker::new(30.0);
        cov.start(1000.0);

        let mut last = 0.0;
        for t in (1000..40_000).step_by(250) {
            let pct = cov.update(t as f64);
            assert!(pct >= last, "coverage went backwards at {}", t);
            assert!(pct <= 100.0);
            last = pct;
        }
        assert_eq!(cov.update(31_000.0), 100.0);
        assert!(cov.is_complete());
    }

    #[test]
    fn test_halfway() {
        let mut cov = CoverageTracker::new(30.0);
        cov.start(0.0);
        assert!((cov.update(15_000.0) - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_stop_freezes_and_start_resets() {
        let mut cov = CoverageTracker::new(30.0);
        cov.start(0.0);
        cov.update(6_000.0);
        cov.stop();

        assert!((cov.update(60_000.0) - 20.0).abs() < 1e-4);
        assert!((cov.percent() - 20.0).abs() < 1e-4);

        cov.start(70_000.0);
        assert_eq!(cov.percent(), 0.0);
        assert_eq!(cov.update(70_000.0), 0.0);
    }

    #[test]
    fn test_clock_going_backwards_does_not_decrease() {
        let mut cov = CoverageTracker::new(30.0);
        cov.start(0.0);
        let pct = cov.update(9_000.0);
        assert_eq!(cov.update(3_000.0), pct);
    }
}
