// src/pipeline/guidance.rs
//
// Per-tick output handed to the presentation layer. Built fresh every tick;
// nothing downstream mutates it.

use super::session::SessionState;
use crate::analysis::{DamageRegion, DistanceStatus};
use crate::geometry::BoundingBox;
use serde::Serialize;

pub const SPEED_WARNING_MESSAGE: &str = "Moving too fast, slow down";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuidanceFrame {
    pub frame_id: u64,
    pub timestamp_ms: f64,
    pub session_state: SessionState,
    pub vehicle_box: Option<BoundingBox>,
    pub distance_status: DistanceStatus,
    pub distance_message: String,
    pub speed_warning: bool,
    pub speed_px_per_s: Option<f32>,
    pub coverage_percent: f32,
    pub damage_regions: Vec<DamageRegion>,
    /// Headline text for the current state
    pub status_message: String,
    /// Persistent advisory, e.g. detector failed to load
    pub advisory: Option<String>,
}

impl GuidanceFrame {
    /// Frame emitted outside Previewing/Recording: no live signals.
    pub fn inactive(frame_id: u64, timestamp_ms: f64, state: SessionState, coverage_percent: f32) -> Self {
        Self {
            frame_id,
            timestamp_ms,
            session_state: state,
            vehicle_box: None,
            distance_status: DistanceStatus::NoVehicle,
            distance_message: String::new(),
            speed_warning: false,
            speed_px_per_s: None,
            coverage_percent,
            damage_regions: Vec::new(),
            status_message: status_message(state, DistanceStatus::NoVehicle, false),
            advisory: None,
        }
    }

    pub fn has_vehicle(&self) -> bool {
        self.vehicle_box.is_some()
    }
}

/// Headline guidance for a state, prioritising the most actionable signal.
pub fn status_message(state: SessionState, distance: DistanceStatus, speed_warning: bool) -> String {
    let text = match state {
        SessionState::Idle => "Start the camera to begin the inspection",
        SessionState::Previewing => match distance {
            DistanceStatus::NoVehicle => "Detecting vehicle...",
            DistanceStatus::Ok => "Vehicle found, start recording when ready",
            other => other.message(),
        },
        SessionState::Recording if speed_warning => SPEED_WARNING_MESSAGE,
        SessionState::Recording => distance.message(),
        SessionState::Uploading => "Uploading video for analysis...",
        SessionState::Complete => "Inspection complete",
        SessionState::Failed => "Upload failed, retry or restart",
    };
    text.to_string()
}
