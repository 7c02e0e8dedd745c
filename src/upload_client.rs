// src/upload_client.rs
//
// Upload/analysis collaborator.
//
// Sends the finished recording to the inspection service and returns its
// structured verdict (vehicle identity, damage list, condition summary).
// One request per recording; failures are returned to the caller as-is,
// there is no retry here.

use crate::recorder::MediaBlob;
use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
pub struct InspectionRequest {
    /// Unique session ID for correlation
    pub session_id: String,
    pub captured_at: DateTime<Utc>,
    pub width: usize,
    pub height: usize,
    pub duration_ms: f64,
    pub frames: Vec<FramePayload>,
}

#[derive(Debug, Serialize)]
pub struct FramePayload {
    pub index: usize,
    pub timestamp_ms: f64,
    /// Base64-encoded JPEG
    pub image_base64: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VehicleIdentity {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<u16>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportedDamage {
    /// Panel or area, e.g. "front bumper"
    pub location: String,
    pub damage_type: String,
    pub severity: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct InspectionResult {
    pub vehicle: VehicleIdentity,
    pub damages: Vec<ReportedDamage>,
    pub condition_summary: String,
}

// ============================================================================
// CLIENT
// ============================================================================

pub struct InspectionClient {
    http_client: reqwest::Client,
    api_url: String,
}

impl InspectionClient {
    pub fn new(api_url: String, timeout_secs: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            api_url,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/inspections", self.api_url.trim_end_matches('/'))
    }

    pub fn build_request(blob: &MediaBlob) -> InspectionRequest {
        let frames = blob
            .frames
            .iter()
            .enumerate()
            .map(|(index, f)| FramePayload {
                index,
                timestamp_ms: f.timestamp_ms,
                image_base64: base64::engine::general_purpose::STANDARD.encode(&f.jpeg_data),
            })
            .collect();

        InspectionRequest {
            session_id: uuid::Uuid::new_v4().to_string(),
            captured_at: Utc::now(),
            width: blob.width,
            height: blob.height,
            duration_ms: blob.duration_ms,
            frames,
        }
    }

    /// Upload a recording and wait for the analysis. Takes the blob by value;
    /// the caller keeps no access to it afterwards.
    pub async fn submit(&self, blob: MediaBlob) -> Result<InspectionResult> {
        let url = self.endpoint();
        let request = Self::build_request(&blob);
        drop(blob);

        info!(
            "Uploading inspection {} ({} frames) to {}",
            request.session_id,
            request.frames.len(),
            url
        );

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Upload to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            anyhow::bail!("Inspection service returned {}: {}", status, body);
        }

        let result = response
            .json::<InspectionResult>()
            .await
            .context("Failed to parse inspection result")?;

        info!(
            "Inspection {}: {} damages reported",
            request.session_id,
            result.damages.len()
        );
        debug!("Condition summary: {}", result.condition_summary);
        Ok(result)
    }
}
