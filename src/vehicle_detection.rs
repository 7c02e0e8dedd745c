// src/vehicle_detection.rs
//
// Object detector seam plus the ONNX Runtime YOLO backend.

use crate::geometry::BoundingBox;
use crate::types::Frame;
use anyhow::Result;
use serde::Deserialize;

/// One raw candidate from a detector. Either field may be missing when the
/// backend output is malformed; such candidates never qualify as a vehicle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectorCandidate {
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    #[serde(default)]
    pub score: f32,
}

impl DetectorCandidate {
    pub fn new(class_name: &str, bbox: BoundingBox, score: f32) -> Self {
        Self {
            class_name: Some(class_name.to_string()),
            bbox: Some(bbox),
            score,
        }
    }
}

/// Detector backend. Runs on the detection worker, never on the tick loop.
pub trait ObjectDetector: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectorCandidate>>;
}

#[cfg_attr(not(feature = "yolo-ort"), allow(dead_code))]
/// COCO labels for the ids we care about. Everything else is reported with
/// no class, which downstream filtering treats as non-qualifying.
pub fn coco_class_name(class_id: usize) -> Option<&'static str> {
    match class_id {
        0 => Some("person"),
        1 => Some("bicycle"),
        2 => Some("car"),
        3 => Some("motorcycle"),
        5 => Some("bus"),
        7 => Some("truck"),
        _ => None,
    }
}

#[cfg_attr(not(feature = "yolo-ort"), allow(dead_code))]
fn nms(mut candidates: Vec<(BoundingBox, f32, usize)>, iou_threshold: f32) -> Vec<(BoundingBox, f32, usize)> {
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep = Vec::new();
    while !candidates.is_empty() {
        let current = candidates.remove(0);
        candidates.retain(|c| current.0.iou(&c.0) < iou_threshold);
        keep.push(current);
    }
    keep
}

#[cfg(feature = "yolo-ort")]
pub use yolo::YoloDetector;

#[cfg(feature = "yolo-ort")]
mod yolo {
    use super::{coco_class_name, nms, DetectorCandidate, ObjectDetector};
    use crate::geometry::BoundingBox;
    use crate::types::{Frame, ModelConfig};
    use anyhow::{Context, Result};
    use image::{imageops, Rgb, RgbImage};
    use ort::{
        execution_providers::CUDAExecutionProvider,
        session::{builder::GraphOptimizationLevel, Session},
    };
    use tracing::{debug, info};

    const YOLO_CLASSES: usize = 80;
    const YOLO_PREDICTIONS: usize = 8400;

    pub struct YoloDetector {
        session: Session,
        input_size: usize,
        confidence_threshold: f32,
        iou_threshold: f32,
    }

    impl YoloDetector {
        pub fn new(config: &ModelConfig) -> Result<Self> {
            info!("Loading YOLO model: {}", config.path);

            let mut builder = Session::builder()?;
            if config.use_cuda {
                info!("Enabling CUDA execution provider");
                builder = builder.with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(0)
                    .build()])?;
            }

            let session = builder
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(config.num_threads)?
                .commit_from_file(&config.path)
                .with_context(|| format!("Failed to load model {}", config.path))?;

            info!("✓ YOLO detector initialized");
            Ok(Self {
                session,
                input_size: config.input_size,
                confidence_threshold: config.confidence_threshold,
                iou_threshold: config.iou_threshold,
            })
        }

        /// Letterbox onto a grey square canvas and lay out as CHW f32.
        /// Returns the tensor plus the scale and padding needed to map boxes back.
        fn preprocess(&self, frame: &Frame) -> Result<(Vec<f32>, f32, f32, f32)> {
            let target = self.input_size as u32;
            let image = frame
                .to_rgb_image()
                .context("frame buffer does not match its dimensions")?;

            let scale = (target as f32 / frame.width as f32).min(target as f32 / frame.height as f32);
            let scaled_w = ((frame.width as f32 * scale) as u32).clamp(1, target);
            let scaled_h = ((frame.height as f32 * scale) as u32).clamp(1, target);
            let offset_x = (target - scaled_w) / 2;
            let offset_y = (target - scaled_h) / 2;

            let resized = imageops::resize(&image, scaled_w, scaled_h, imageops::FilterType::Triangle);
            let mut canvas = RgbImage::from_pixel(target, target, Rgb([114, 114, 114]));
            imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

            let plane = (target * target) as usize;
            let mut input = vec![0.0f32; 3 * plane];
            for (i, pixel) in canvas.pixels().enumerate() {
                for (c, &value) in pixel.0.iter().enumerate() {
                    input[c * plane + i] = value as f32 / 255.0;
                }
            }

            Ok((input, scale, offset_x as f32, offset_y as f32))
        }

        fn infer(&mut self, input: Vec<f32>) -> Result<Vec<f32>> {
            let shape = [1, 3, self.input_size, self.input_size];
            let input_value = ort::value::Tensor::from_array((shape, input))?;

            let outputs = self.session.run(ort::inputs!["images" => input_value])?;
            let (_, data) = outputs[0].try_extract_tensor::<f32>()?;
            Ok(data.to_vec())
        }

        fn postprocess(&self, output: &[f32], scale: f32, pad_x: f32, pad_y: f32) -> Vec<DetectorCandidate> {
            // Output layout: [1, 4 + 80, 8400], box in center format
            let mut raw = Vec::new();
            for i in 0..YOLO_PREDICTIONS {
                let mut best_conf = 0.0f32;
                let mut best_class = 0;
                for c in 0..YOLO_CLASSES {
                    let conf = output[YOLO_PREDICTIONS * (4 + c) + i];
                    if conf > best_conf {
                        best_conf = conf;
                        best_class = c;
                    }
                }
                if best_conf < self.confidence_threshold {
                    continue;
                }

                let cx = output[i];
                let cy = output[YOLO_PREDICTIONS + i];
                let w = output[YOLO_PREDICTIONS * 2 + i];
                let h = output[YOLO_PREDICTIONS * 3 + i];

                // Undo letterbox
                let bbox = BoundingBox::from_corners([
                    (cx - w / 2.0 - pad_x) / scale,
                    (cy - h / 2.0 - pad_y) / scale,
                    (cx + w / 2.0 - pad_x) / scale,
                    (cy + h / 2.0 - pad_y) / scale,
                ]);
                raw.push((bbox, best_conf, best_class));
            }

            nms(raw, self.iou_threshold)
                .into_iter()
                .map(|(bbox, score, class_id)| DetectorCandidate {
                    class_name: coco_class_name(class_id).map(str::to_string),
                    bbox: Some(bbox),
                    score,
                })
                .collect()
        }
    }

    impl ObjectDetector for YoloDetector {
        fn name(&self) -> &'static str {
            "yolo-ort"
        }

        fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectorCandidate>> {
            let (input, scale, pad_x, pad_y) = self.preprocess(frame)?;
            let output = self.infer(input)?;
            let candidates = self.postprocess(&output, scale, pad_x, pad_y);
            debug!("YOLO returned {} candidates", candidates.len());
            Ok(candidates)
        }
    }
}

/// Build the configured detector. Called on the detection worker so model
/// loading never stalls the tick loop.
pub fn build_detector(config: &crate::types::ModelConfig) -> Result<Box<dyn ObjectDetector>> {
    #[cfg(feature = "yolo-ort")]
    {
        Ok(Box::new(YoloDetector::new(config)?))
    }
    #[cfg(not(feature = "yolo-ort"))]
    {
        anyhow::bail!(
            "no detector backend compiled in (model {}); rebuild with --features yolo-ort",
            config.path
        )
    }
}
