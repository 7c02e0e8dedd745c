use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("detection interval must be at least one frame ({0})")]
    ZeroInterval(&'static str),
    #[error("too_far_ratio ({far}) must be below too_close_ratio ({close})")]
    InvertedDistanceRatios { far: f32, close: f32 },
    #[error("damage block size must be non-zero")]
    ZeroBlockSize,
    #[error("coverage duration must be positive, got {0}")]
    NonPositiveCoverageDuration(f64),
    #[error("allowed_classes must name at least one of car, truck, bus, motorcycle")]
    NoAllowedClasses,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
        let mut config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path))?;

        if let Ok(url) = std::env::var("INSPECTION_API_URL") {
            config.upload.api_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection.preview_interval_frames == 0 {
            return Err(ConfigError::ZeroInterval("preview_interval_frames"));
        }
        if self.detection.recording_interval_frames == 0 {
            return Err(ConfigError::ZeroInterval("recording_interval_frames"));
        }
        if self.damage.scan_interval_multiplier == 0 {
            return Err(ConfigError::ZeroInterval("scan_interval_multiplier"));
        }
        if self.guidance.too_far_ratio >= self.guidance.too_close_ratio {
            return Err(ConfigError::InvertedDistanceRatios {
                far: self.guidance.too_far_ratio,
                close: self.guidance.too_close_ratio,
            });
        }
        if self.damage.block_size == 0 || self.damage.sample_stride == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.guidance.coverage_duration_s <= 0.0 {
            return Err(ConfigError::NonPositiveCoverageDuration(
                self.guidance.coverage_duration_s,
            ));
        }
        if crate::analysis::VehicleClass::parse_allowed(&self.detection.allowed_classes).is_empty()
        {
            return Err(ConfigError::NoAllowedClasses);
        }
        Ok(())
    }
}
