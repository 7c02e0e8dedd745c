// src/types.rs

use image::RgbImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub detection: DetectionConfig,
    pub guidance: GuidanceConfig,
    pub damage: DamageConfig,
    pub capture: CaptureConfig,
    pub recording: RecordingConfig,
    pub upload: UploadConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: String,
    pub input_size: usize,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub num_threads: usize,
    pub use_cuda: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "models/yolov8n.onnx".to_string(),
            input_size: 640,
            confidence_threshold: 0.35,
            iou_threshold: 0.45,
            num_threads: 4,
            use_cuda: false,
        }
    }
}

/// Detector cache cadence and staleness policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Frames between detection requests while previewing
    pub preview_interval_frames: u32,
    /// Frames between detection requests while recording
    pub recording_interval_frames: u32,
    /// A miss only clears the cached box once the last hit is older than this
    pub miss_clear_ms: f64,
    /// While recording, a cached box older than this reads as absent
    pub recording_stale_ms: f64,
    /// While recording, a cached box older than this is dropped
    pub recording_clear_ms: f64,
    /// Accepted detector classes (subset of car, truck, bus, motorcycle)
    pub allowed_classes: Vec<String>,
    /// Boxes narrower than this width/height ratio are rejected
    pub min_aspect_ratio: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            preview_interval_frames: 6,
            recording_interval_frames: 3,
            miss_clear_ms: 1000.0,
            recording_stale_ms: 1500.0,
            recording_clear_ms: 2000.0,
            allowed_classes: vec![
                "car".to_string(),
                "truck".to_string(),
                "bus".to_string(),
                "motorcycle".to_string(),
            ],
            min_aspect_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidanceConfig {
    pub too_close_ratio: f32,
    pub too_far_ratio: f32,
    pub max_speed_px_per_s: f32,
    pub coverage_duration_s: f64,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            too_close_ratio: 0.85,
            too_far_ratio: 0.55,
            max_speed_px_per_s: 600.0,
            coverage_duration_s: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DamageConfig {
    pub enabled: bool,
    pub block_size: usize,
    pub sample_stride: usize,
    pub contrast_threshold: f32,
    pub max_diff_threshold: u8,
    pub merge_distance_px: f32,
    pub invalidate_movement_px: f32,
    /// Damage scan runs every `detection interval * scan_interval_multiplier` frames
    pub scan_interval_multiplier: u32,
    pub label: String,
}

impl Default for DamageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_size: 40,
            sample_stride: 2,
            contrast_threshold: 0.3,
            max_diff_threshold: 50,
            merge_distance_px: 60.0,
            invalidate_movement_px: 50.0,
            scan_interval_multiplier: 3,
            label: "Possible damage".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Directory of still frames, or (with `opencv-capture`) a video file or camera index
    pub source: String,
    /// Frame rate assumed for image sequences
    pub fps: f64,
    /// Pace image sequences at `fps` instead of replaying as fast as possible
    pub realtime: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: "frames".to_string(),
            fps: 30.0,
            realtime: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub frame_stride: u32,
    pub max_frames: usize,
    pub jpeg_quality: u8,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            frame_stride: 5,
            max_frames: 240,
            jpeg_quality: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000/api".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Start recording as soon as a vehicle is in view
    pub auto_record: bool,
    /// Stop recording once coverage reaches 100%
    pub stop_at_full_coverage: bool,
    /// After a failed upload, go back to previewing and record again this
    /// many times before giving up
    pub upload_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_record: true,
            stop_at_full_coverage: true,
            upload_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "walkaround_capture=info".to_string(),
        }
    }
}

/// Packed RGB frame (3 bytes per pixel, row-major).
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: usize, height: usize, timestamp_ms: f64) -> Self {
        debug_assert_eq!(data.len(), width * height * 3);
        Self {
            data,
            width,
            height,
            timestamp_ms,
        }
    }

    /// Copy into an `image` buffer. None if `data` is shorter than the
    /// dimensions claim.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        let len = self.width * self.height * 3;
        let data = self.data.get(..len)?.to_vec();
        RgbImage::from_raw(self.width as u32, self.height as u32, data)
    }

    /// Solid-colour frame.
    #[cfg(test)]
    pub fn filled(width: usize, height: usize, rgb: [u8; 3], timestamp_ms: f64) -> Self {
        let mut data = Vec::with_capacity(width * height * 3);
        for _ in 0..width * height {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height, timestamp_ms)
    }
}
