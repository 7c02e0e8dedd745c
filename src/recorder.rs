// src/recorder.rs
//
// Recording collaborator.
//
// Keeps a JPEG-encoded subsample of the frames seen while recording and
// hands the whole set over as a single MediaBlob when recording stops.
// Once finished, the blob belongs to the caller; the recorder keeps nothing.

use crate::types::{Frame, RecordingConfig};
use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Maximum JPEG size per frame (keeps the upload payload bounded)
const MAX_JPEG_BYTES: usize = 400_000;

#[derive(Debug, Clone, Serialize)]
pub struct RecordedFrame {
    pub timestamp_ms: f64,
    #[serde(skip)]
    pub jpeg_data: Vec<u8>,
}

/// Finished recording, ready for upload.
#[derive(Debug, Clone)]
pub struct MediaBlob {
    pub frames: Vec<RecordedFrame>,
    pub width: usize,
    pub height: usize,
    pub duration_ms: f64,
}

impl MediaBlob {
    pub fn total_bytes(&self) -> usize {
        self.frames.iter().map(|f| f.jpeg_data.len()).sum()
    }
}

pub struct MediaRecorder {
    frame_stride: u32,
    max_frames: usize,
    jpeg_quality: u8,

    recording: bool,
    frames: Vec<RecordedFrame>,
    frames_seen: u64,
    dimensions: Option<(usize, usize)>,
    started_at_ms: Option<f64>,
    last_frame_ms: Option<f64>,
}

impl MediaRecorder {
    pub fn new(config: &RecordingConfig) -> Self {
        Self {
            frame_stride: config.frame_stride.max(1),
            max_frames: config.max_frames,
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
            recording: false,
            frames: Vec::new(),
            frames_seen: 0,
            dimensions: None,
            started_at_ms: None,
            last_frame_ms: None,
        }
    }

    pub fn start(&mut self) {
        self.discard();
        self.recording = true;
        debug!(
            "Recorder started (stride={}, max_frames={})",
            self.frame_stride, self.max_frames
        );
    }

    /// Offer a frame. Only every `frame_stride`-th frame is encoded and kept.
    pub fn push(&mut self, frame: &Frame) -> Result<()> {
        if !self.recording {
            return Ok(());
        }

        self.started_at_ms.get_or_insert(frame.timestamp_ms);
        self.last_frame_ms = Some(frame.timestamp_ms);
        let index = self.frames_seen;
        self.frames_seen += 1;

        if index % self.frame_stride as u64 != 0 || self.frames.len() >= self.max_frames {
            return Ok(());
        }

        if let Some((w, h)) = self.dimensions {
            if (w, h) != (frame.width, frame.height) {
                anyhow::bail!(
                    "frame size changed mid-recording: {}x{} -> {}x{}",
                    w,
                    h,
                    frame.width,
                    frame.height
                );
            }
        }

        let jpeg = encode_jpeg(frame, self.jpeg_quality).context("JPEG encoding failed")?;
        if jpeg.len() > MAX_JPEG_BYTES {
            warn!("Skipping oversized frame ({} bytes)", jpeg.len());
            return Ok(());
        }

        self.dimensions = Some((frame.width, frame.height));
        self.frames.push(RecordedFrame {
            timestamp_ms: frame.timestamp_ms,
            jpeg_data: jpeg,
        });
        Ok(())
    }

    /// Stop recording and hand over everything captured. None when nothing
    /// was kept.
    pub fn finish(&mut self) -> Option<MediaBlob> {
        self.recording = false;
        let (width, height) = self.dimensions.take()?;
        let duration_ms = match (self.started_at_ms, self.last_frame_ms) {
            (Some(start), Some(end)) => (end - start).max(0.0),
            _ => 0.0,
        };

        let blob = MediaBlob {
            frames: std::mem::take(&mut self.frames),
            width,
            height,
            duration_ms,
        };
        self.discard();

        info!(
            "Recording finished: {} frames, {:.1}s, {} KB",
            blob.frames.len(),
            blob.duration_ms / 1000.0,
            blob.total_bytes() / 1024
        );
        Some(blob)
    }

    pub fn discard(&mut self) {
        self.recording = false;
        self.frames.clear();
        self.frames_seen = 0;
        self.dimensions = None;
        self.started_at_ms = None;
        self.last_frame_ms = None;
    }
}

fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let image = frame
        .to_rgb_image()
        .context("frame buffer does not match its dimensions")?;
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(&image)?;
    Ok(jpeg)
}
