//! Shared constants and defaults.

/// Default model input tile size in pixels.
pub const DEFAULT_TILE_SIZE_PX: usize = 512;

/// Default overlap between adjacent tiles, as a percentage of tile size.
pub const DEFAULT_OVERLAP_PERCENT: f32 = 15.0;

/// Default number of tile workers (sequential processing).
pub const DEFAULT_WORKERS: usize = 1;

/// Confidence threshold bounds and defaults.
pub mod confidence {
    /// Minimum allowed confidence threshold.
    pub const MIN: f32 = 0.0;
    /// Maximum allowed confidence threshold.
    pub const MAX: f32 = 1.0;
    /// Default detection confidence threshold.
    pub const DEFAULT: f32 = 0.5;
}

/// IoU threshold bounds and defaults for non-max suppression.
pub mod iou {
    /// Minimum allowed IoU threshold.
    pub const MIN: f32 = 0.0;
    /// Maximum allowed IoU threshold.
    pub const MAX: f32 = 1.0;
    /// Default NMS IoU threshold.
    pub const DEFAULT: f32 = 0.5;
}

/// Pixel value range of 8-bit source rasters, used for normalization.
pub const SOURCE_BIT_DEPTH_MAX: f32 = 255.0;

/// Threshold above which a probability plane counts as the positive class
/// when a model emits a single sigmoid channel.
pub const SIGMOID_CLASS_THRESHOLD: f32 = 0.5;
