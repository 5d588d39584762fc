//! Configuration type definitions.

use crate::channels::ChannelsMapping;
use crate::constants::{
    DEFAULT_OVERLAP_PERCENT, DEFAULT_TILE_SIZE_PX, DEFAULT_WORKERS, confidence, iou,
};
use crate::geometry::WorldRect;
use crate::model::ModelOutputFormat;
use crate::source::PaddingPolicy;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Persistable pipeline defaults, the part of the configuration surface a
/// host UI or CLI stores in its TOML config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tile size in pixels (must match the model input size).
    pub tile_size_px: usize,

    /// Overlap between adjacent tiles, as a percentage of tile size.
    pub overlap_percent: f32,

    /// Detection confidence threshold.
    pub confidence_threshold: f32,

    /// IoU threshold for non-max suppression.
    pub iou_threshold: f32,

    /// Boundary padding policy for edge tiles.
    pub padding: PaddingPolicy,

    /// How multi-class outputs are materialized.
    pub model_output_format: ModelOutputFormat,

    /// Number of tile worker threads.
    pub workers: usize,

    /// Optional soft deadline per tile, in seconds.
    pub tile_deadline_secs: Option<u64>,

    /// Whether a single-tile inference failure aborts the whole run.
    pub fatal_inference_errors: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tile_size_px: DEFAULT_TILE_SIZE_PX,
            overlap_percent: DEFAULT_OVERLAP_PERCENT,
            confidence_threshold: confidence::DEFAULT,
            iou_threshold: iou::DEFAULT,
            padding: PaddingPolicy::default(),
            model_output_format: ModelOutputFormat::default(),
            workers: DEFAULT_WORKERS,
            tile_deadline_secs: None,
            fatal_inference_errors: false,
        }
    }
}

/// Which part of the raster a run processes.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessedArea {
    /// The whole raster.
    EntireRaster,
    /// A world-coordinate rectangle, clipped to the raster.
    WorldExtent(WorldRect),
    /// A world-coordinate rectangle restricted by a boolean mask.
    ///
    /// The mask is in the pixel space of the clipped extent (rows by
    /// columns); `true` marks pixels to process.
    MaskedExtent {
        /// Extent rectangle in world coordinates.
        extent: WorldRect,
        /// Per-pixel processing mask over the extent.
        mask: Array2<bool>,
    },
}

/// Complete runtime parameters of one processing run.
#[derive(Debug, Clone)]
pub struct ProcessingParameters {
    /// Tile size in pixels (must match the model input size).
    pub tile_size_px: usize,
    /// Overlap between adjacent tiles, as a percentage of tile size.
    pub overlap_percent: f32,
    /// Detection confidence threshold.
    pub confidence_threshold: f32,
    /// IoU threshold for non-max suppression.
    pub iou_threshold: f32,
    /// Boundary padding policy for edge tiles.
    pub padding: PaddingPolicy,
    /// How multi-class outputs are materialized.
    pub model_output_format: ModelOutputFormat,
    /// Number of tile worker threads.
    pub workers: usize,
    /// Optional soft deadline per tile.
    pub tile_deadline: Option<Duration>,
    /// Whether a single-tile inference failure aborts the whole run.
    pub fatal_inference_errors: bool,
    /// Raster channels assembled into the model input.
    pub channels_mapping: ChannelsMapping,
    /// Region of the raster to process.
    pub processed_area: ProcessedArea,
}

impl ProcessingParameters {
    /// Combine stored defaults with the run-specific channel mapping and
    /// area selection.
    pub fn from_config(
        config: &PipelineConfig,
        channels_mapping: ChannelsMapping,
        processed_area: ProcessedArea,
    ) -> Self {
        Self {
            tile_size_px: config.tile_size_px,
            overlap_percent: config.overlap_percent,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
            padding: config.padding,
            model_output_format: config.model_output_format,
            workers: config.workers,
            tile_deadline: config.tile_deadline_secs.map(Duration::from_secs),
            fatal_inference_errors: config.fatal_inference_errors,
            channels_mapping,
            processed_area,
        }
    }

    /// Overlap in pixels derived from the percentage.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn overlap_px(&self) -> usize {
        ((self.tile_size_px as f32) * self.overlap_percent / 100.0).round() as usize
    }
}

impl Default for ProcessingParameters {
    fn default() -> Self {
        Self::from_config(
            &PipelineConfig::default(),
            ChannelsMapping::rgb(),
            ProcessedArea::EntireRaster,
        )
    }
}
