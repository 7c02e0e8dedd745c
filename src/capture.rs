// src/capture.rs
//
// Capture device abstraction.
//
// The default source replays a directory of still frames; with the
// `opencv-capture` feature a video file or a camera index can be used.
// Opening a source is the "start camera" step: failure keeps the session
// idle.

use crate::types::{CaptureConfig, Frame};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

pub trait FrameSource {
    fn describe(&self) -> String;

    /// Next frame, or None at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Open the configured source.
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
    let path = Path::new(&config.source);
    if path.is_dir() {
        return Ok(Box::new(ImageSequenceSource::open(path, config.fps)?));
    }

    #[cfg(feature = "opencv-capture")]
    {
        Ok(Box::new(opencv_capture::OpenCvCapture::open(&config.source)?))
    }
    #[cfg(not(feature = "opencv-capture"))]
    {
        anyhow::bail!(
            "capture source '{}' is not a frame directory; video and camera input need --features opencv-capture",
            config.source
        )
    }
}

// ============================================================================
// IMAGE SEQUENCE
// ============================================================================

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct ImageSequenceSource {
    root: PathBuf,
    files: Vec<PathBuf>,
    next_index: usize,
    frame_interval_ms: f64,
}

impl ImageSequenceSource {
    pub fn open(root: &Path, fps: f64) -> Result<Self> {
        let files = find_image_files(root)?;
        if files.is_empty() {
            anyhow::bail!("no JPEG/PNG frames found in {}", root.display());
        }
        if fps <= 0.0 {
            anyhow::bail!("capture fps must be positive, got {}", fps);
        }

        info!("Found {} frames in {}", files.len(), root.display());
        Ok(Self {
            root: root.to_path_buf(),
            files,
            next_index: 0,
            frame_interval_ms: 1000.0 / fps,
        })
    }

}

impl FrameSource for ImageSequenceSource {
    fn describe(&self) -> String {
        format!("{} ({} frames)", self.root.display(), self.files.len())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.next_index) else {
            return Ok(None);
        };
        let timestamp_ms = self.next_index as f64 * self.frame_interval_ms;
        self.next_index += 1;

        let img = image::open(path)
            .with_context(|| format!("Failed to decode {}", path.display()))?
            .to_rgb8();
        let (width, height) = img.dimensions();
        debug!("Frame {} <- {}", self.next_index, path.display());

        Ok(Some(Frame::new(
            img.into_raw(),
            width as usize,
            height as usize,
            timestamp_ms,
        )))
    }
}

/// Image files under `root`, sorted by path so frame order follows naming.
pub fn find_image_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

// ============================================================================
// OPENCV (video file or camera)
// ============================================================================

#[cfg(feature = "opencv-capture")]
mod opencv_capture {
    use super::FrameSource;
    use crate::types::Frame;
    use anyhow::Result;
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
    };
    use std::time::Instant;
    use tracing::info;

    pub struct OpenCvCapture {
        cap: VideoCapture,
        label: String,
        fps: f64,
        frames_read: u64,
        /// Live cameras are stamped with wall time, files with frame index
        live_clock: Option<Instant>,
    }

    impl OpenCvCapture {
        pub fn open(source: &str) -> Result<Self> {
            let (cap, live_clock) = match source.parse::<i32>() {
                Ok(index) => (VideoCapture::new(index, videoio::CAP_ANY)?, Some(Instant::now())),
                Err(_) => (VideoCapture::from_file(source, videoio::CAP_ANY)?, None),
            };

            if !cap.is_opened()? {
                anyhow::bail!("Failed to open capture source '{}'", source);
            }

            let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
            let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
            let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
            info!("Capture properties: {}x{} @ {:.1} FPS", width, height, fps);

            Ok(Self {
                cap,
                label: source.to_string(),
                fps: if fps > 0.0 { fps } else { 30.0 },
                frames_read: 0,
                live_clock,
            })
        }
    }

    impl FrameSource for OpenCvCapture {
        fn describe(&self) -> String {
            format!("{} (opencv)", self.label)
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            let mut mat = Mat::default();
            if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
                return Ok(None);
            }

            let timestamp_ms = match self.live_clock {
                Some(start) => start.elapsed().as_secs_f64() * 1000.0,
                None => self.frames_read as f64 / self.fps * 1000.0,
            };
            self.frames_read += 1;

            let mut rgb_mat = Mat::default();
            imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;
            let data = rgb_mat.data_bytes()?.to_vec();

            Ok(Some(Frame::new(
                data,
                rgb_mat.cols() as usize,
                rgb_mat.rows() as usize,
                timestamp_ms,
            )))
        }
    }
}
