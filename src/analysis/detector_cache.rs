// src/analysis/detector_cache.rs
//
// Vehicle detector cache.
//
// The detector is slow and asynchronous, the tick loop is fast and never
// waits. This cache sits between them and supplies a "best current guess"
// vehicle box every tick:
//
//   - Completions are filtered to the allowed vehicle classes, person-like
//     (portrait) boxes are rejected, and the largest remaining box wins.
//   - A miss does not clear the cached box until the last hit is older than
//     `miss_clear_ms`, so one dropped detection does not flicker the UI.
//   - While recording, a box older than `recording_stale_ms` reads as absent
//     and one older than `recording_clear_ms` is dropped outright.
//   - Until the detector reports ready (or if it failed to load), a fixed
//     centered fallback box is returned so guidance stays usable.
//
// Completions carry the session epoch and a request sequence number. Results
// from a superseded epoch, or older than an already-applied result, are
// discarded. The sample is always written as a whole struct.

use super::VehicleClass;
use crate::geometry::BoundingBox;
use crate::types::DetectionConfig;
use crate::vehicle_detection::DetectorCandidate;
use tracing::{debug, info, warn};

// Fallback box proportions used during detector warm-up
const FALLBACK_PAD_X_RATIO: f32 = 0.10;
const FALLBACK_TOP_RATIO: f32 = 0.20;
const FALLBACK_HEIGHT_RATIO: f32 = 0.60;

// ============================================================================
// TYPES
// ============================================================================

/// A qualifying detection as written into the track state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionSample {
    pub bbox: BoundingBox,
    pub observed_at_ms: f64,
    pub class: VehicleClass,
    pub score: f32,
}

/// Last vehicle center seen by the motion estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenterSample {
    pub x: f32,
    pub at_ms: f64,
}

/// Per-session tracking state. Reset whenever a new session starts.
#[derive(Debug, Clone, Default)]
pub struct TrackState {
    pub detection: Option<DetectionSample>,
    pub last_center: Option<CenterSample>,
}

impl TrackState {
    #[cfg(test)]
    pub fn last_box(&self) -> Option<BoundingBox> {
        self.detection.map(|d| d.bbox)
    }

    pub fn last_updated_ms(&self) -> Option<f64> {
        self.detection.map(|d| d.observed_at_ms)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Result of one detector call, delivered back to the tick loop.
#[derive(Debug, Clone)]
pub struct DetectionCompletion {
    pub epoch: u64,
    pub seq: u64,
    /// Timestamp of the frame the detection ran on
    pub observed_at_ms: f64,
    /// Detector error message on failure
    pub outcome: Result<Vec<DetectorCandidate>, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectorReadiness {
    Initializing,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// A qualifying vehicle replaced the cached sample
    Updated(DetectionSample),
    /// Nothing qualified; cached sample kept
    Missed,
    /// Nothing qualified and the cached sample had aged out
    Cleared,
    /// Completion belongs to an earlier session
    StaleEpoch,
    /// A newer request already completed
    Superseded,
}

// ============================================================================
// CACHE
// ============================================================================

pub struct VehicleDetectorCache {
    allowed_classes: Vec<VehicleClass>,
    min_aspect_ratio: f32,
    miss_clear_ms: f64,
    recording_stale_ms: f64,
    recording_clear_ms: f64,
    readiness: DetectorReadiness,
    epoch: u64,
    next_seq: u64,
    last_applied_seq: Option<u64>,
}

impl VehicleDetectorCache {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            allowed_classes: VehicleClass::parse_allowed(&config.allowed_classes),
            min_aspect_ratio: config.min_aspect_ratio,
            miss_clear_ms: config.miss_clear_ms,
            recording_stale_ms: config.recording_stale_ms,
            recording_clear_ms: config.recording_clear_ms,
            readiness: DetectorReadiness::Initializing,
            epoch: 0,
            next_seq: 0,
            last_applied_seq: None,
        }
    }

    /// True while the fixed fallback box is being served.
    pub fn is_fallback_active(&self) -> bool {
        self.readiness != DetectorReadiness::Ready
    }

    pub fn mark_ready(&mut self) {
        if self.readiness == DetectorReadiness::Initializing {
            info!("✓ Vehicle detector ready, leaving fallback box");
            self.readiness = DetectorReadiness::Ready;
        }
    }

    /// Record an initialization failure. Returns true the first time so the
    /// caller raises the advisory only once. There is no automatic retry.
    pub fn mark_failed(&mut self, reason: String) -> bool {
        if matches!(self.readiness, DetectorReadiness::Failed(_)) {
            return false;
        }
        warn!("Vehicle detector unavailable, using fallback box: {}", reason);
        self.readiness = DetectorReadiness::Failed(reason);
        true
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Switch to a new session epoch. In-flight results for older epochs
    /// will be discarded when they arrive.
    pub fn begin_epoch(&mut self, epoch: u64) {
        debug!("Detector cache epoch {} -> {}", self.epoch, epoch);
        self.epoch = epoch;
        self.last_applied_seq = None;
    }

    pub fn next_request_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Pick the vehicle among raw candidates: allowed class, valid landscape
    /// box, largest area. Ties keep the first-seen candidate.
    pub fn select_vehicle(&self, candidates: &[DetectorCandidate]) -> Option<(BoundingBox, VehicleClass, f32)> {
        let mut best: Option<(BoundingBox, VehicleClass, f32)> = None;

        for candidate in candidates {
            let (Some(label), Some(bbox)) = (candidate.class_name.as_deref(), candidate.bbox) else {
                continue;
            };
            let Some(class) = VehicleClass::from_label(label) else {
                continue;
            };
            if !self.allowed_classes.contains(&class) || !bbox.is_valid() {
                continue;
            }
            // Portrait boxes are almost always people walking past
            if bbox.aspect_ratio() < self.min_aspect_ratio {
                continue;
            }
            if best.map_or(true, |(b, _, _)| bbox.area() > b.area()) {
                best = Some((bbox, class, candidate.score));
            }
        }

        best
    }

    /// Apply a detector completion to the track state.
    pub fn apply(&mut self, track: &mut TrackState, completion: DetectionCompletion) -> ApplyOutcome {
        if completion.epoch != self.epoch {
            debug!(
                "Discarding detection seq={} from epoch {} (active {})",
                completion.seq, completion.epoch, self.epoch
            );
            return ApplyOutcome::StaleEpoch;
        }
        if self.last_applied_seq.is_some_and(|last| completion.seq < last) {
            debug!("Discarding detection seq={}, newer result already applied", completion.seq);
            return ApplyOutcome::Superseded;
        }

        let selected = match &completion.outcome {
            Ok(candidates) => self.select_vehicle(candidates),
            Err(e) => {
                warn!("Detector call failed (seq={}): {}", completion.seq, e);
                None
            }
        };

        match selected {
            Some((bbox, class, score)) => {
                let sample = DetectionSample {
                    bbox,
                    observed_at_ms: completion.observed_at_ms,
                    class,
                    score,
                };
                track.detection = Some(sample);
                self.last_applied_seq = Some(completion.seq);
                debug!(
                    "Vehicle {} {:.0}x{:.0} @ ({:.0},{:.0}) score={:.2}",
                    class.as_str(),
                    bbox.width,
                    bbox.height,
                    bbox.x,
                    bbox.y,
                    score
                );
                ApplyOutcome::Updated(sample)
            }
            None => {
                let aged_out = track
                    .last_updated_ms()
                    .is_some_and(|t| completion.observed_at_ms - t > self.miss_clear_ms);
                if aged_out {
                    track.detection = None;
                    ApplyOutcome::Cleared
                } else {
                    ApplyOutcome::Missed
                }
            }
        }
    }

    /// The box the guidance layer should use this tick.
    pub fn current_box(
        &self,
        track: &mut TrackState,
        frame_width: usize,
        frame_height: usize,
        now_ms: f64,
        is_recording: bool,
    ) -> Option<BoundingBox> {
        if self.is_fallback_active() {
            return Some(fallback_box(frame_width, frame_height));
        }

        let sample = track.detection?;
        if is_recording {
            let age_ms = now_ms - sample.observed_at_ms;
            if age_ms > self.recording_clear_ms {
                debug!("Dropping cached vehicle box, {:.0}ms old while recording", age_ms);
                track.detection = None;
                return None;
            }
            if age_ms > self.recording_stale_ms {
                return None;
            }
        }
        Some(sample.bbox)
    }

    /// Whether a box shown now would survive the recording staleness gate.
    /// The fallback box always does.
    pub fn is_fresh_for_recording(&self, track: &TrackState, now_ms: f64) -> bool {
        if self.is_fallback_active() {
            return true;
        }
        track
            .detection
            .is_some_and(|sample| now_ms - sample.observed_at_ms <= self.recording_stale_ms)
    }
}

/// Centered placeholder box used before the detector is available.
pub fn fallback_box(frame_width: usize, frame_height: usize) -> BoundingBox {
    let w = frame_width as f32;
    let h = frame_height as f32;
    BoundingBox::new(
        w * FALLBACK_PAD_X_RATIO,
        h * FALLBACK_TOP_RATIO,
        w * (1.0 - 2.0 * FALLBACK_PAD_X_RATIO),
        h * FALLBACK_HEIGHT_RATIO,
    )
}
