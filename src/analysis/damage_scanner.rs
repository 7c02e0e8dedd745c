// src/analysis/damage_scanner.rs
//
// Coarse damage heuristic over the tracked vehicle box.
//
// The vehicle region is cut into square blocks. For each block we sample
// the brightness difference between diagonally adjacent pixels: the mean
// (normalized to [0, 1]) is a diffuse-texture proxy and the maximum single
// step catches sharp edges such as scratches and creases. A block is flagged
// when either exceeds its threshold. Flagged blocks whose centers are close
// are merged into one region until nothing else merges.
//
// This is not a classifier. Reflections and panel gaps will be flagged too;
// the authoritative assessment comes back from the analysis service after
// upload. Regions are dropped whenever the vehicle center jumps, so overlays
// never stay behind on the background.

use crate::geometry::BoundingBox;
use crate::types::{DamageConfig, Frame};
use serde::Serialize;
use tracing::debug;

const MAX_CONFIDENCE: f32 = 0.95;

// ============================================================================
// GRAYSCALE FRAME
// ============================================================================

/// Row-major grayscale buffer: pixel at (x, y) = data[y * width + x]
#[derive(Clone)]
pub struct GrayFrame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl GrayFrame {
    pub fn new(data: Vec<u8>, width: usize, height: usize) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            data,
            width,
            height,
        }
    }

    /// Convert a rectangular window of a packed RGB frame (ITU-R BT.601 luma).
    pub fn from_rgb_region(frame: &Frame, x0: usize, y0: usize, width: usize, height: usize) -> Self {
        let mut gray = Vec::with_capacity(width * height);
        for y in y0..y0 + height {
            let row = &frame.data[(y * frame.width + x0) * 3..(y * frame.width + x0 + width) * 3];
            for pixel in row.chunks_exact(3) {
                let g = (0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32)
                    as u8;
                gray.push(g);
            }
        }
        Self::new(gray, width, height)
    }

    #[inline]
    fn pixel(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DamageRegion {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub label: String,
}

impl DamageRegion {
    fn merged_with(&self, other: &DamageRegion) -> DamageRegion {
        DamageRegion {
            bbox: self.bbox.union(&other.bbox),
            confidence: self.confidence.max(other.confidence),
            label: self.label.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockStats {
    /// Mean diagonal difference, normalized to [0, 1]
    pub avg_contrast: f32,
    /// Largest single diagonal difference, 0..=255
    pub max_diff: u8,
}

// ============================================================================
// PURE FUNCTIONS
// ============================================================================

/// Diagonal-neighbour contrast for one block at (bx, by).
pub fn block_stats(gray: &GrayFrame, bx: usize, by: usize, block_size: usize, stride: usize) -> BlockStats {
    let mut sum: u64 = 0;
    let mut count: u64 = 0;
    let mut max_diff: u8 = 0;

    let mut y = by;
    while y + stride < by + block_size && y + stride < gray.height {
        let mut x = bx;
        while x + stride < bx + block_size && x + stride < gray.width {
            let diff = gray.pixel(x, y).abs_diff(gray.pixel(x + stride, y + stride));
            sum += diff as u64;
            count += 1;
            max_diff = max_diff.max(diff);
            x += stride;
        }
        y += stride;
    }

    let avg_contrast = if count > 0 {
        (sum as f32 / count as f32) / 255.0
    } else {
        0.0
    };
    BlockStats {
        avg_contrast,
        max_diff,
    }
}

pub fn block_confidence(stats: &BlockStats) -> f32 {
    (0.4 + 0.5 * stats.avg_contrast + 0.3 * (stats.max_diff as f32 / 255.0)).min(MAX_CONFIDENCE)
}

/// Flag anomalous full blocks of `gray`. Returned boxes are offset by
/// `(origin_x, origin_y)` into frame coordinates.
pub fn flag_blocks(gray: &GrayFrame, origin_x: f32, origin_y: f32, config: &DamageConfig) -> Vec<DamageRegion> {
    let block = config.block_size;
    let stride = config.sample_stride.max(1);
    let mut flagged = Vec::new();

    let mut by = 0;
    while by + block <= gray.height {
        let mut bx = 0;
        while bx + block <= gray.width {
            let stats = block_stats(gray, bx, by, block, stride);
            if stats.avg_contrast > config.contrast_threshold || stats.max_diff > config.max_diff_threshold {
                flagged.push(DamageRegion {
                    bbox: BoundingBox::new(
                        origin_x + bx as f32,
                        origin_y + by as f32,
                        block as f32,
                        block as f32,
                    ),
                    confidence: block_confidence(&stats),
                    label: config.label.clone(),
                });
            }
            bx += block;
        }
        by += block;
    }

    flagged
}

/// Merge regions whose centers lie within `max_distance` of each other,
/// repeating until stable.
pub fn merge_regions(mut regions: Vec<DamageRegion>, max_distance: f32) -> Vec<DamageRegion> {
    loop {
        let mut pair = None;
        'search: for i in 0..regions.len() {
            for j in (i + 1)..regions.len() {
                if regions[i].bbox.center_distance(&regions[j].bbox) <= max_distance {
                    pair = Some((i, j));
                    break 'search;
                }
            }
        }

        let Some((i, j)) = pair else {
            return regions;
        };
        let other = regions.remove(j);
        regions[i] = regions[i].merged_with(&other);
    }
}

// ============================================================================
// SCANNER
// ============================================================================

pub struct DamageScanner {
    config: DamageConfig,
    regions: Vec<DamageRegion>,
    last_center: Option<(f32, f32)>,
}

impl DamageScanner {
    pub fn new(config: DamageConfig) -> Self {
        Self {
            config,
            regions: Vec::new(),
            last_center: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Track the vehicle center each tick. Regions are discarded when the
    /// center jumps further than the invalidation distance, or when the
    /// vehicle is gone. Returns true if regions were discarded.
    pub fn observe_vehicle(&mut self, vehicle: Option<&BoundingBox>) -> bool {
        let Some(bbox) = vehicle else {
            self.last_center = None;
            return self.clear();
        };

        let center = bbox.center();
        let moved = self.last_center.is_some_and(|(px, py)| {
            ((center.0 - px).powi(2) + (center.1 - py).powi(2)).sqrt() > self.config.invalidate_movement_px
        });
        self.last_center = Some(center);

        if moved {
            debug!("Vehicle moved, discarding {} damage regions", self.regions.len());
            self.clear()
        } else {
            false
        }
    }

    /// Scan the vehicle sub-region of `frame` and replace the region set.
    pub fn scan(&mut self, frame: &Frame, vehicle: &BoundingBox) -> &[DamageRegion] {
        let Some(region) = vehicle.clamp_to(frame.width, frame.height) else {
            self.regions.clear();
            return &self.regions;
        };

        let x0 = region.x as usize;
        let y0 = region.y as usize;
        let w = (region.width as usize).min(frame.width - x0);
        let h = (region.height as usize).min(frame.height - y0);
        let gray = GrayFrame::from_rgb_region(frame, x0, y0, w, h);

        let flagged = flag_blocks(&gray, x0 as f32, y0 as f32, &self.config);
        let flagged_count = flagged.len();
        self.regions = merge_regions(flagged, self.config.merge_distance_px);

        debug!(
            "Damage scan over {}x{}: {} blocks flagged, {} regions",
            w,
            h,
            flagged_count,
            self.regions.len()
        );
        &self.regions
    }

    pub fn regions(&self) -> &[DamageRegion] {
        &self.regions
    }

    /// Drop all regions. Returns true if anything was dropped.
    pub fn clear(&mut self) -> bool {
        let had = !self.regions.is_empty();
        self.regions.clear();
        had
    }

    pub fn reset(&mut self) {
        self.regions.clear();
        self.last_center = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region_at(x: f32, y: f32, confidence: f32) -> DamageRegion {
        DamageRegion {
            bbox: BoundingBox::new(x, y, 40.0, 40.0),
            confidence,
            label: "Possible damage".to_string(),
        }
    }

    /// Uniform grey frame with one bright scratch line inside the given block
    fn frame_with_scratch(width: usize, height: usize, scratch_x: usize, scratch_y: usize) -> Frame {
        let mut frame = Frame::filled(width, height, [120, 120, 120], 0.0);
        for dx in 0..20 {
            let idx = (scratch_y * width + scratch_x + dx) * 3;
            frame.data[idx..idx + 3].copy_from_slice(&[250, 250, 250]);
        }
        frame
    }

    #[test]
    fn test_flat_block_not_flagged() {
        let gray = GrayFrame::new(vec![128; 80 * 80], 80, 80);
        let regions = flag_blocks(&gray, 0.0, 0.0, &DamageConfig::default());
        assert!(regions.is_empty());
    }

    #[test]
    fn test_sharp_edge_flags_block() {
        // Left half dark, right half bright: one strong vertical edge per row
        let mut data = vec![0u8; 40 * 40];
        for y in 0..40 {
            for x in 20..40 {
                data[y * 40 + x] = 200;
            }
        }
        let gray = GrayFrame::new(data, 40, 40);
        let stats = block_stats(&gray, 0, 0, 40, 2);
        assert_eq!(stats.max_diff, 200);
        assert!(stats.avg_contrast < 0.3);

        let regions = flag_blocks(&gray, 10.0, 20.0, &DamageConfig::default());
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bbox, BoundingBox::new(10.0, 20.0, 40.0, 40.0));
    }

    #[test]
    fn test_diffuse_texture_flags_block() {
        // Alternating rows of 0 and 100: every diagonal step differs by 100,
        // so the mean alone clears the contrast threshold
        let bands: Vec<u8> = (0..40 * 40).map(|i| if (i / 40) % 2 == 0 { 0 } else { 100 }).collect();
        let striped = GrayFrame::new(bands, 40, 40);
        let stats = block_stats(&striped, 0, 0, 40, 1);
        assert!(stats.avg_contrast > 0.3);
        assert_eq!(stats.max_diff, 100);

        // Disable the edge test so only the mean can flag
        let config = DamageConfig {
            sample_stride: 1,
            max_diff_threshold: 255,
            ..Default::default()
        };
        assert_eq!(flag_blocks(&striped, 0.0, 0.0, &config).len(), 1);
    }

    #[test]
    fn test_confidence_formula_and_cap() {
        let mid = BlockStats {
            avg_contrast: 0.2,
            max_diff: 51,
        };
        assert!((block_confidence(&mid) - (0.4 + 0.1 + 0.06)).abs() < 1e-6);

        let extreme = BlockStats {
            avg_contrast: 1.0,
            max_diff: 255,
        };
        assert_eq!(block_confidence(&extreme), 0.95);
    }

    #[test]
    fn test_merge_threshold_boundary() {
        let merged = merge_regions(vec![region_at(0.0, 0.0, 0.5), region_at(59.0, 0.0, 0.7)], 60.0);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].bbox, BoundingBox::new(0.0, 0.0, 99.0, 40.0));
        assert_eq!(merged[0].confidence, 0.7);

        let separate = merge_regions(vec![region_at(0.0, 0.0, 0.5), region_at(61.0, 0.0, 0.7)], 60.0);
        assert_eq!(separate.len(), 2);
    }

    #[test]
    fn test_merge_repeats_until_stable() {
        // a-b close, merged box center then lands close to c
        let regions = vec![
            region_at(0.0, 0.0, 0.5),
            region_at(50.0, 0.0, 0.6),
            region_at(80.0, 0.0, 0.9),
            region_at(400.0, 400.0, 0.4),
        ];
        let merged = merge_regions(regions, 60.0);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].bbox, BoundingBox::new(0.0, 0.0, 120.0, 40.0));
        assert_eq!(merged[0].confidence, 0.9);
    }

    #[test]
    fn test_scan_finds_scratch_in_frame_coordinates() {
        let frame = frame_with_scratch(640, 480, 210, 250);
        let vehicle = BoundingBox::new(100.0, 100.0, 400.0, 240.0);

        let mut scanner = DamageScanner::new(DamageConfig::default());
        let regions = scanner.scan(&frame, &vehicle).to_vec();

        assert!(!regions.is_empty());
        let hit = &regions[0];
        assert!(hit.bbox.x <= 210.0 && hit.bbox.right() >= 210.0);
        assert!(hit.bbox.y <= 250.0 && hit.bbox.bottom() >= 250.0);
        assert!(hit.confidence > 0.4 && hit.confidence <= 0.95);
    }

    #[test]
    fn test_movement_invalidates_regions() {
        let frame = frame_with_scratch(640, 480, 210, 250);
        let vehicle = BoundingBox::new(100.0, 100.0, 400.0, 240.0);
        let mut scanner = DamageScanner::new(DamageConfig::default());

        scanner.observe_vehicle(Some(&vehicle));
        scanner.scan(&frame, &vehicle);
        assert!(!scanner.regions().is_empty());

        let nudged = BoundingBox::new(130.0, 100.0, 400.0, 240.0);
        assert!(!scanner.observe_vehicle(Some(&nudged)));
        assert!(!scanner.regions().is_empty());

        let jumped = BoundingBox::new(190.0, 100.0, 400.0, 240.0);
        assert!(scanner.observe_vehicle(Some(&jumped)));
        assert!(scanner.regions().is_empty());
    }

    #[test]
    fn test_vehicle_loss_clears_regions() {
        let frame = frame_with_scratch(640, 480, 210, 250);
        let vehicle = BoundingBox::new(100.0, 100.0, 400.0, 240.0);
        let mut scanner = DamageScanner::new(DamageConfig::default());
        scanner.observe_vehicle(Some(&vehicle));
        scanner.scan(&frame, &vehicle);

        assert!(scanner.observe_vehicle(None));
        assert!(scanner.regions().is_empty());
    }
}
