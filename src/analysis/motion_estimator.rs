// src/analysis/motion_estimator.rs
//
// Distance zone and walking-speed proxy from the tracked vehicle box.
//
// Distance is judged purely from how much of the frame width the vehicle
// fills. Speed is the horizontal displacement of the box center between
// consecutive ticks that had a box, in pixels per second. The speed warning
// reflects only the latest delta; it is not latched.

use super::detector_cache::{CenterSample, TrackState};
use crate::geometry::BoundingBox;
use crate::types::GuidanceConfig;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DistanceStatus {
    TooClose,
    TooFar,
    Ok,
    NoVehicle,
}

impl DistanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TooClose => "TOO_CLOSE",
            Self::TooFar => "TOO_FAR",
            Self::Ok => "OK",
            Self::NoVehicle => "NO_VEHICLE",
        }
    }

    /// User-facing guidance text
    pub fn message(&self) -> &'static str {
        match self {
            Self::TooClose => "Too close, step back so the whole vehicle fits",
            Self::TooFar => "Too far, move closer to the vehicle",
            Self::Ok => "Good distance, keep walking around the vehicle",
            Self::NoVehicle => "No vehicle detected, point the camera at the vehicle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionReading {
    /// Horizontal center speed, None on the first sample or with no vehicle
    pub speed_px_per_s: Option<f32>,
    pub too_fast: bool,
}

pub struct MotionEstimator {
    too_close_ratio: f32,
    too_far_ratio: f32,
    max_speed_px_per_s: f32,
}

impl MotionEstimator {
    pub fn new(config: &GuidanceConfig) -> Self {
        Self {
            too_close_ratio: config.too_close_ratio,
            too_far_ratio: config.too_far_ratio,
            max_speed_px_per_s: config.max_speed_px_per_s,
        }
    }

    pub fn classify_distance(&self, vehicle: Option<&BoundingBox>, frame_width: usize) -> DistanceStatus {
        let Some(bbox) = vehicle else {
            return DistanceStatus::NoVehicle;
        };
        if frame_width == 0 {
            return DistanceStatus::NoVehicle;
        }

        let ratio = bbox.width / frame_width as f32;
        if ratio > self.too_close_ratio {
            DistanceStatus::TooClose
        } else if ratio < self.too_far_ratio {
            DistanceStatus::TooFar
        } else {
            DistanceStatus::Ok
        }
    }

    /// Update the speed proxy for this tick. Ticks without a vehicle leave
    /// the stored center untouched so the next delta spans the gap.
    pub fn update(&self, track: &mut TrackState, vehicle: Option<&BoundingBox>, now_ms: f64) -> MotionReading {
        let Some(bbox) = vehicle else {
            return MotionReading::default();
        };

        let (center_x, _) = bbox.center();
        let speed = track.last_center.and_then(|prev| {
            let dt_s = (now_ms - prev.at_ms) / 1000.0;
            (dt_s > 0.0).then(|| (center_x - prev.x).abs() / dt_s as f32)
        });

        track.last_center = Some(CenterSample {
            x: center_x,
            at_ms: now_ms,
        });

        let too_fast = speed.is_some_and(|s| s > self.max_speed_px_per_s);
        if too_fast {
            debug!("Moving too fast: {:.0} px/s", speed.unwrap_or_default());
        }

        MotionReading {
            speed_px_per_s: speed,
            too_fast,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> MotionEstimator {
        MotionEstimator::new(&GuidanceConfig::default())
    }

    fn box_with_width(width: f32) -> BoundingBox {
        BoundingBox::new(0.0, 100.0, width, 50.0)
    }

    fn box_centered_at(cx: f32) -> BoundingBox {
        BoundingBox::new(cx - 300.0, 100.0, 600.0, 300.0)
    }

    #[test]
    fn test_distance_zones_are_exhaustive() {
        let est = estimator();
        let cases = [
            (1000.0, DistanceStatus::TooClose),
            (860.0, DistanceStatus::TooClose),
            (850.0, DistanceStatus::Ok),
            (700.0, DistanceStatus::Ok),
            (550.0, DistanceStatus::Ok),
            (549.0, DistanceStatus::TooFar),
            (10.0, DistanceStatus::TooFar),
        ];
        for (width, expected) in cases {
            assert_eq!(
                est.classify_distance(Some(&box_with_width(width)), 1000),
                expected,
                "width {}",
                width
            );
        }
        assert_eq!(est.classify_distance(None, 1000), DistanceStatus::NoVehicle);
    }

    #[test]
    fn test_fast_motion_warns() {
        let est = estimator();
        let mut track = TrackState::default();

        let first = est.update(&mut track, Some(&box_centered_at(400.0)), 0.0);
        assert_eq!(first.speed_px_per_s, None);
        assert!(!first.too_fast);

        // 520px in 0.2s = 2600 px/s
        let second = est.update(&mut track, Some(&box_centered_at(920.0)), 200.0);
        assert!((second.speed_px_per_s.unwrap() - 2600.0).abs() < 1e-3);
        assert!(second.too_fast);
    }

    #[test]
    fn test_slow_motion_is_fine() {
        let est = estimator();
        let mut track = TrackState::default();

        est.update(&mut track, Some(&box_centered_at(400.0)), 0.0);
        let reading = est.update(&mut track, Some(&box_centered_at(440.0)), 1000.0);
        assert!((reading.speed_px_per_s.unwrap() - 40.0).abs() < 1e-3);
        assert!(!reading.too_fast);
    }

    #[test]
    fn test_warning_is_transient() {
        let est = estimator();
        let mut track = TrackState::default();

        est.update(&mut track, Some(&box_centered_at(0.0)), 0.0);
        assert!(est.update(&mut track, Some(&box_centered_at(500.0)), 100.0).too_fast);
        assert!(!est.update(&mut track, Some(&box_centered_at(510.0)), 1100.0).too_fast);
    }

    #[test]
    fn test_gap_measures_against_last_seen() {
        let est = estimator();
        let mut track = TrackState::default();

        est.update(&mut track, Some(&box_centered_at(400.0)), 0.0);
        let gap = est.update(&mut track, None, 500.0);
        assert!(!gap.too_fast);
        assert_eq!(track.last_center.unwrap().at_ms, 0.0);

        // 300px over 1s measured from the pre-gap sample
        let reading = est.update(&mut track, Some(&box_centered_at(700.0)), 1000.0);
        assert!((reading.speed_px_per_s.unwrap() - 300.0).abs() < 1e-3);
    }
}
