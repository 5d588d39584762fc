//! Configuration validation.

use crate::config::{PipelineConfig, ProcessingParameters};
use crate::constants::{confidence, iou};
use crate::error::{Error, Result};

/// Validate stored pipeline defaults.
pub fn validate_config(config: &PipelineConfig) -> Result<()> {
    validate_common(
        config.tile_size_px,
        config.overlap_percent,
        config.confidence_threshold,
        config.iou_threshold,
        config.workers,
    )
}

/// Validate complete run parameters. Fails fast before any tile runs.
pub fn validate_parameters(params: &ProcessingParameters) -> Result<()> {
    validate_common(
        params.tile_size_px,
        params.overlap_percent,
        params.confidence_threshold,
        params.iou_threshold,
        params.workers,
    )?;

    if params.overlap_px() >= params.tile_size_px {
        return Err(Error::InvalidParameter {
            message: format!(
                "overlap of {}% leaves no stride for {}px tiles",
                params.overlap_percent, params.tile_size_px
            ),
        });
    }
    if params.channels_mapping.is_empty() {
        return Err(Error::InvalidParameter {
            message: "channels mapping must name at least one channel".to_string(),
        });
    }
    Ok(())
}

fn validate_common(
    tile_size_px: usize,
    overlap_percent: f32,
    confidence_threshold: f32,
    iou_threshold: f32,
    workers: usize,
) -> Result<()> {
    if tile_size_px == 0 {
        return Err(Error::InvalidParameter {
            message: "tile size must be positive".to_string(),
        });
    }
    if !(0.0..100.0).contains(&overlap_percent) {
        return Err(Error::InvalidParameter {
            message: format!("overlap must be in [0, 100), got {overlap_percent}"),
        });
    }
    if !(confidence::MIN..=confidence::MAX).contains(&confidence_threshold) {
        return Err(Error::InvalidParameter {
            message: format!(
                "confidence threshold must be between {} and {}, got {confidence_threshold}",
                confidence::MIN,
                confidence::MAX
            ),
        });
    }
    if !(iou::MIN..=iou::MAX).contains(&iou_threshold) {
        return Err(Error::InvalidParameter {
            message: format!(
                "IoU threshold must be between {} and {}, got {iou_threshold}",
                iou::MIN,
                iou::MAX
            ),
        });
    }
    if workers == 0 {
        return Err(Error::InvalidParameter {
            message: "workers must be at least 1".to_string(),
        });
    }
    Ok(())
}
