// src/analysis/mod.rs
//
// Per-tick analysis components.
//
// Signal flow:
//   Detector completions → detector_cache ─┬→ motion_estimator (distance zone, speed)
//                                          ├→ damage_scanner (block contrast over the vehicle box)
//   Session recording clock ───────────────┴→ coverage_tracker
//
// inference_scheduler decides which ticks request a detection or a damage scan.
// Orchestrated by pipeline::engine::GuidanceEngine.

pub mod coverage_tracker;
pub mod damage_scanner;
pub mod detector_cache;
pub mod inference_scheduler;
pub mod motion_estimator;

pub use coverage_tracker::CoverageTracker;
pub use damage_scanner::{DamageRegion, DamageScanner};
pub use detector_cache::{DetectionCompletion, TrackState, VehicleDetectorCache};
pub use inference_scheduler::DetectionScheduler;
pub use motion_estimator::{DistanceStatus, MotionEstimator};

use serde::Serialize;

/// Detector classes that count as "the vehicle being inspected".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VehicleClass {
    Car,
    Truck,
    Bus,
    Motorcycle,
}

impl VehicleClass {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "car" => Some(Self::Car),
            "truck" => Some(Self::Truck),
            "bus" => Some(Self::Bus),
            "motorcycle" | "motorbike" => Some(Self::Motorcycle),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Truck => "truck",
            Self::Bus => "bus",
            Self::Motorcycle => "motorcycle",
        }
    }

    /// Parse a configured class list, silently dropping unknown names.
    pub fn parse_allowed(labels: &[String]) -> Vec<Self> {
        let mut classes = Vec::new();
        for class in labels.iter().filter_map(|l| Self::from_label(l)) {
            if !classes.contains(&class) {
                classes.push(class);
            }
        }
        classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_allowed_dedups_and_filters() {
        let labels = vec![
            "Car".to_string(),
            "person".to_string(),
            "car".to_string(),
            "truck".to_string(),
        ];
        assert_eq!(
            VehicleClass::parse_allowed(&labels),
            vec![VehicleClass::Car, VehicleClass::Truck]
        );
    }
}
