// src/analysis/inference_scheduler.rs
//
// Frame-cadence scheduler for the vehicle detector and the damage scan.
// Detection runs every 6th tick while previewing and every 3rd while
// recording; the damage scan runs on a coarser multiple of that cadence.

use crate::types::{DamageConfig, DetectionConfig};
use tracing::debug;

/// Decides which ticks issue a detection request or a damage scan
pub struct DetectionScheduler {
    preview_interval: u32,
    recording_interval: u32,
    scan_multiplier: u32,

    /// Ticks since the last detection request; None forces the next tick
    frames_since_detection: Option<u32>,
    /// Ticks since the last damage scan; None forces the next eligible tick
    frames_since_scan: Option<u32>,

    total_frames: u64,
    detection_requests: u64,
    damage_scans: u64,
}

impl DetectionScheduler {
    pub fn new(detection: &DetectionConfig, damage: &DamageConfig) -> Self {
        Self {
            preview_interval: detection.preview_interval_frames.max(1),
            recording_interval: detection.recording_interval_frames.max(1),
            scan_multiplier: damage.scan_interval_multiplier.max(1),
            frames_since_detection: None,
            frames_since_scan: None,
            total_frames: 0,
            detection_requests: 0,
            damage_scans: 0,
        }
    }

    pub fn detection_interval(&self, is_recording: bool) -> u32 {
        if is_recording {
            self.recording_interval
        } else {
            self.preview_interval
        }
    }

    pub fn scan_interval(&self, is_recording: bool) -> u32 {
        self.detection_interval(is_recording) * self.scan_multiplier
    }

    /// Advance one tick. Returns true when a detection should be requested.
    pub fn should_detect(&mut self, is_recording: bool) -> bool {
        self.total_frames += 1;
        let interval = self.detection_interval(is_recording);

        let due = match self.frames_since_detection {
            None => true,
            Some(n) => n + 1 >= interval,
        };

        if due {
            self.frames_since_detection = Some(0);
            self.detection_requests += 1;
            debug!(
                "Detection scheduled (interval={}, recording={})",
                interval, is_recording
            );
        } else {
            self.frames_since_detection = self.frames_since_detection.map(|n| n + 1);
        }
        due
    }

    /// Returns true when the damage scan should run this tick.
    pub fn should_scan(&mut self, is_recording: bool) -> bool {
        let interval = self.scan_interval(is_recording);
        let due = match self.frames_since_scan {
            None => true,
            Some(n) => n + 1 >= interval,
        };

        if due {
            self.frames_since_scan = Some(0);
            self.damage_scans += 1;
        } else {
            self.frames_since_scan = self.frames_since_scan.map(|n| n + 1);
        }
        due
    }

    /// Hand back a detection slot that could not be used (detector busy),
    /// so the next tick tries again instead of waiting a full interval.
    pub fn defer_detection(&mut self) {
        self.frames_since_detection = None;
        self.detection_requests = self.detection_requests.saturating_sub(1);
    }

    pub fn get_stats(&self) -> SchedulerStats {
        SchedulerStats {
            total_frames: self.total_frames,
            detection_requests: self.detection_requests,
            damage_scans: self.damage_scans,
            detection_frequency: if self.total_frames > 0 {
                self.detection_requests as f32 / self.total_frames as f32
            } else {
                0.0
            },
        }
    }

    /// Force an immediate detection (and scan) on the next tick.
    pub fn reset(&mut self) {
        self.frames_since_detection = None;
        self.frames_since_scan = None;
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub total_frames: u64,
    pub detection_requests: u64,
    pub damage_scans: u64,
    pub detection_frequency: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> DetectionScheduler {
        DetectionScheduler::new(&DetectionConfig::default(), &DamageConfig::default())
    }

    #[test]
    fn test_preview_cadence_every_sixth_tick() {
        let mut s = scheduler();
        let fired: Vec<usize> = (0..13).filter(|_| s.should_detect(false)).collect();
        assert_eq!(fired, vec![0, 6, 12]);
    }

    #[test]
    fn test_recording_cadence_every_third_tick() {
        let mut s = scheduler();
        let fired: Vec<usize> = (0..10).filter(|_| s.should_detect(true)).collect();
        assert_eq!(fired, vec![0, 3, 6, 9]);
    }

    #[test]
    fn test_reset_forces_immediate_detection() {
        let mut s = scheduler();
        assert!(s.should_detect(false));
        assert!(!s.should_detect(false));
        s.reset();
        assert!(s.should_detect(true));
        assert!(!s.should_detect(true));
    }

    #[test]
    fn test_scan_interval_is_coarser() {
        let mut s = scheduler();
        assert_eq!(s.scan_interval(true), 9);
        assert_eq!(s.scan_interval(false), 18);
        let scans: Vec<usize> = (0..19).filter(|_| s.should_scan(true)).collect();
        assert_eq!(scans, vec![0, 9, 18]);
    }

    #[test]
    fn test_defer_retries_next_tick() {
        let mut s = scheduler();
        assert!(s.should_detect(false));
        s.defer_detection();
        assert!(s.should_detect(false));
        assert_eq!(s.get_stats().detection_requests, 1);
    }
}
