//! Result aggregation: stitching per-tile outputs into the global result.
//!
//! Raster outputs (segmentation probabilities, regression values,
//! super-resolved planes) are blended with a deterministic per-pixel rule:
//! the tile whose center lies nearest the pixel wins, ties going to the
//! lower tile index. The rule depends only on the pixel and the tile set,
//! never on merge order, which keeps shuffled or parallel merges
//! bit-identical.
//!
//! Detections are collected in full-image coordinates and deduplicated by
//! a second, global non-max suppression pass at finalization: an object
//! near a tile boundary is detected independently by both tiles, so
//! per-tile suppression alone cannot remove the duplicate.

use crate::constants::SIGMOID_CLASS_THRESHOLD;
use crate::error::{Error, Result};
use crate::geometry::{BoundingBox, CoordSpace, CoordinateMapper, WorldRect};
use crate::grid::TileSpec;
use crate::model::{Detection, ModelOutputFormat, PerTileResult};
use ndarray::{Array2, Array3, Axis};
use tracing::debug;

/// Tile index marking an unclaimed pixel.
const UNCLAIMED: u32 = u32::MAX;

/// What the planes of a [`RasterAccumulator`] mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterKind {
    /// Class probabilities; finalized into a class mask.
    Probabilities,
    /// Raw model values; finalized as-is.
    Values,
}

/// A detection with both pixel and world coordinates, as produced by
/// finalization.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldDetection {
    /// Bounding box in full-image pixel coordinates.
    pub bbox: BoundingBox,
    /// Bounding box in world coordinates.
    pub rect: WorldRect,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f32,
    /// Class index.
    pub class_id: usize,
}

/// Finalized segmentation output.
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    /// Per-pixel class index over the extent; `0` where nothing was
    /// written (background / no data).
    pub mask: Array2<u8>,
    /// Probability layers kept according to the output format, as
    /// `(class index, plane)` pairs.
    pub layers: Vec<(usize, Array2<f32>)>,
}

/// The merged output of a completed (or partially completed) run.
#[derive(Debug, Clone)]
pub enum FinalResult {
    /// Segmentation class mask and probability layers.
    Segmentation(SegmentationResult),
    /// Dense value planes `(channels, height * scale, width * scale)`.
    Values {
        /// Stitched value planes.
        planes: Array3<f32>,
        /// Spatial scale relative to the processing extent.
        scale: usize,
    },
    /// Deduplicated detections with world coordinates.
    Detections(Vec<WorldDetection>),
}

/// Accumulates raster-shaped per-tile outputs over the processing extent.
#[derive(Debug, Clone)]
pub struct RasterAccumulator {
    kind: RasterKind,
    extent: BoundingBox,
    scale: usize,
    planes: Array3<f32>,
    claim_dist: Array2<f32>,
    claim_tile: Array2<u32>,
}

impl RasterAccumulator {
    /// Create an accumulator sized to the extent.
    pub fn new(kind: RasterKind, extent: BoundingBox, channels: usize, scale: usize) -> Self {
        let (h, w) = (extent.height(), extent.width());
        Self {
            kind,
            extent,
            scale,
            planes: Array3::zeros((channels, h * scale, w * scale)),
            claim_dist: Array2::from_elem((h, w), f32::INFINITY),
            claim_tile: Array2::from_elem((h, w), UNCLAIMED),
        }
    }

    /// Write one tile's planes into the accumulator, resolving overlaps by
    /// the nearest-tile-center rule.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn merge(&mut self, tile: &TileSpec, planes: &Array3<f32>) -> Result<()> {
        let (channels, out_h, out_w) = planes.dim();
        if channels != self.planes.dim().0 {
            return Err(Error::Inference {
                reason: format!(
                    "tile produced {channels} planes, accumulator expects {}",
                    self.planes.dim().0
                ),
            });
        }
        if out_h != out_w {
            return Err(Error::Inference {
                reason: format!("tile output must be square, got {out_h}x{out_w}"),
            });
        }

        // Where the output sits within the tile, in base-resolution
        // tile-local coordinates.
        let crop = if out_h == tile.size * self.scale {
            BoundingBox::new(0, 0, tile.size as i64, tile.size as i64, CoordSpace::TileLocal)
        } else if self.scale == 1 && out_h < tile.size {
            // Smaller outputs are a centered crop of the input tile.
            let margin = ((tile.size - out_h) / 2) as i64;
            BoundingBox::new(
                margin,
                margin,
                margin + out_w as i64,
                margin + out_h as i64,
                CoordSpace::TileLocal,
            )
        } else {
            return Err(Error::Inference {
                reason: format!(
                    "tile output of {out_h}px does not match tile size {}px at scale {}",
                    tile.size, self.scale
                ),
            });
        };
        let Some(write) = tile.valid.intersect(&crop) else {
            debug!(tile = tile.index, "tile output does not reach the valid region");
            return Ok(());
        };

        let (center_x, center_y) = tile.center();
        let tile_index = u32::try_from(tile.index).unwrap_or(UNCLAIMED);

        for local_y in write.y_min..write.y_max {
            let global_y = (tile.y + local_y - self.extent.y_min) as usize;
            for local_x in write.x_min..write.x_max {
                let global_x = (tile.x + local_x - self.extent.x_min) as usize;

                let dx = (tile.x + local_x) as f64 + 0.5 - center_x;
                let dy = (tile.y + local_y) as f64 + 0.5 - center_y;
                let dist = (dx * dx + dy * dy) as f32;

                let current_dist = self.claim_dist[(global_y, global_x)];
                let current_tile = self.claim_tile[(global_y, global_x)];
                // Exact comparison on purpose: the winner must be the
                // lexicographic minimum of (distance, tile index) over all
                // tiles, or merge order leaks into the result.
                #[allow(clippy::float_cmp)]
                let wins =
                    dist < current_dist || (dist == current_dist && tile_index < current_tile);
                if !wins {
                    continue;
                }
                self.claim_dist[(global_y, global_x)] = dist;
                self.claim_tile[(global_y, global_x)] = tile_index;

                let src_y = ((local_y - crop.y_min) as usize) * self.scale;
                let src_x = ((local_x - crop.x_min) as usize) * self.scale;
                for c in 0..channels {
                    for sy in 0..self.scale {
                        for sx in 0..self.scale {
                            self.planes[(c, global_y * self.scale + sy, global_x * self.scale + sx)] =
                                planes[(c, src_y + sy, src_x + sx)];
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether any pixel claimed the given extent-local coordinate.
    fn is_claimed(&self, y: usize, x: usize) -> bool {
        self.claim_tile[(y, x)] != UNCLAIMED
    }

    /// Finalize probability planes into a class mask and layers.
    pub fn finalize_segmentation(
        self,
        format: ModelOutputFormat,
        area_mask: Option<&Array2<bool>>,
    ) -> Result<FinalResult> {
        debug_assert_eq!(self.kind, RasterKind::Probabilities);
        let (classes, h, w) = self.planes.dim();
        let mut mask = Array2::<u8>::zeros((h, w));

        match format {
            ModelOutputFormat::AllClassesAsSeparateLayers => {
                for y in 0..h {
                    for x in 0..w {
                        if !self.is_claimed(y, x) {
                            continue;
                        }
                        let mut best = 0usize;
                        let mut best_p = self.planes[(0, y, x)];
                        for c in 1..classes {
                            let p = self.planes[(c, y, x)];
                            if p > best_p {
                                best_p = p;
                                best = c;
                            }
                        }
                        mask[(y, x)] = best as u8;
                    }
                }
            }
            ModelOutputFormat::OnlySingleClass { class } => {
                if class >= classes {
                    return Err(Error::InvalidParameter {
                        message: format!(
                            "selected class {class} out of range for {classes}-class model"
                        ),
                    });
                }
                for y in 0..h {
                    for x in 0..w {
                        if self.is_claimed(y, x)
                            && self.planes[(class, y, x)] >= SIGMOID_CLASS_THRESHOLD
                        {
                            mask[(y, x)] = 1;
                        }
                    }
                }
            }
        }

        if let Some(area) = area_mask {
            for y in 0..h {
                for x in 0..w {
                    if !area[(y, x)] {
                        mask[(y, x)] = 0;
                    }
                }
            }
        }

        let layers = match format {
            ModelOutputFormat::AllClassesAsSeparateLayers => (0..classes)
                .map(|c| (c, self.planes.index_axis(Axis(0), c).to_owned()))
                .collect(),
            ModelOutputFormat::OnlySingleClass { class } => {
                vec![(class, self.planes.index_axis(Axis(0), class).to_owned())]
            }
        };

        Ok(FinalResult::Segmentation(SegmentationResult { mask, layers }))
    }

    /// Finalize value planes.
    pub fn finalize_values(mut self, area_mask: Option<&Array2<bool>>) -> FinalResult {
        debug_assert_eq!(self.kind, RasterKind::Values);
        if let Some(area) = area_mask {
            let (channels, _, _) = self.planes.dim();
            let (h, w) = area.dim();
            for y in 0..h {
                for x in 0..w {
                    if area[(y, x)] {
                        continue;
                    }
                    for c in 0..channels {
                        for sy in 0..self.scale {
                            for sx in 0..self.scale {
                                self.planes[(c, y * self.scale + sy, x * self.scale + sx)] = 0.0;
                            }
                        }
                    }
                }
            }
        }
        FinalResult::Values {
            planes: self.planes,
            scale: self.scale,
        }
    }
}

/// Collects tile-local detections and deduplicates them globally.
#[derive(Debug, Clone)]
pub struct DetectionAccumulator {
    extent: BoundingBox,
    iou_threshold: f32,
    detections: Vec<Detection>,
}

impl DetectionAccumulator {
    /// Create an accumulator for the extent with the configured NMS IoU
    /// threshold.
    pub fn new(extent: BoundingBox, iou_threshold: f32) -> Self {
        Self {
            extent,
            iou_threshold,
            detections: Vec::new(),
        }
    }

    /// Transform one tile's detections to full-image coordinates and
    /// collect them.
    pub fn merge(&mut self, tile: &TileSpec, detections: Vec<Detection>) {
        for det in detections {
            let full = det.bbox.tile_local_to_full((tile.x, tile.y));
            let Some(clipped) = full.intersect(&self.extent) else {
                continue;
            };
            self.detections.push(Detection {
                bbox: clipped,
                confidence: det.confidence,
                class_id: det.class_id,
            });
        }
    }

    /// Run the global suppression pass and map survivors to world
    /// coordinates.
    pub fn finalize(
        self,
        mapper: &CoordinateMapper,
        area_mask: Option<&Array2<bool>>,
    ) -> FinalResult {
        let before = self.detections.len();
        let kept = crate::model::detection::non_max_suppression(self.detections, self.iou_threshold);
        debug!(before, after = kept.len(), "global detection suppression");

        let extent = self.extent;
        let detections = kept
            .into_iter()
            .filter(|det| {
                let Some(area) = area_mask else { return true };
                let cx = (det.bbox.x_min + det.bbox.x_max) / 2 - extent.x_min;
                let cy = (det.bbox.y_min + det.bbox.y_max) / 2 - extent.y_min;
                usize::try_from(cy)
                    .ok()
                    .zip(usize::try_from(cx).ok())
                    .and_then(|(y, x)| area.get((y, x)))
                    .copied()
                    .unwrap_or(false)
            })
            .map(|det| WorldDetection {
                rect: mapper.pixel_bbox_to_world_rect(&det.bbox),
                bbox: det.bbox,
                confidence: det.confidence,
                class_id: det.class_id,
            })
            .collect();
        FinalResult::Detections(detections)
    }
}

/// The global result being built up during a run, one variant per task.
#[derive(Debug, Clone)]
pub enum GlobalResult {
    /// Raster stitching (segmentation, regression, super-resolution).
    Raster(RasterAccumulator),
    /// Detection collection.
    Detections(DetectionAccumulator),
}

impl GlobalResult {
    /// Merge one tile's result. The result variant must match the
    /// accumulator variant.
    pub fn merge(&mut self, tile: &TileSpec, result: PerTileResult) -> Result<()> {
        match (self, result) {
            (Self::Raster(acc), PerTileResult::Mask(planes) | PerTileResult::Values(planes)) => {
                acc.merge(tile, &planes)
            }
            (Self::Detections(acc), PerTileResult::Detections(dets)) => {
                acc.merge(tile, dets);
                Ok(())
            }
            _ => Err(Error::Inference {
                reason: "per-tile result variant does not match the run's task".to_string(),
            }),
        }
    }
}
