//! JSON run report.
//!
//! A machine-readable summary of one processing run: timing, outcome,
//! failed tiles and the parameters that produced it.

use crate::config::ProcessingParameters;
use crate::error::{Error, Result};
use crate::processing::{RunOutcome, RunStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Summary of one processing run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// When the run started (UTC).
    pub started_at: DateTime<Utc>,
    /// When the run finished (UTC).
    pub finished_at: DateTime<Utc>,
    /// Outcome label: `completed`, `completed_with_errors`, `cancelled`
    /// or `aborted`.
    pub status: String,
    /// Abort reason, for aborted runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    /// Number of tiles in the grid.
    pub tiles_total: usize,
    /// Number of tiles attempted before the run ended.
    pub tiles_processed: usize,
    /// Tiles that failed without aborting the run.
    pub failed_tiles: Vec<FailedTileReport>,
    /// Parameters the run used.
    pub parameters: ParametersReport,
}

/// One failed tile in the report.
#[derive(Debug, Clone, Serialize)]
pub struct FailedTileReport {
    /// Tile index in grid order.
    pub index: usize,
    /// Failure description.
    pub message: String,
}

/// Parameter echo included in the report.
#[derive(Debug, Clone, Serialize)]
pub struct ParametersReport {
    /// Tile size in pixels.
    pub tile_size_px: usize,
    /// Overlap as a percentage of tile size.
    pub overlap_percent: f32,
    /// Detection confidence threshold.
    pub confidence_threshold: f32,
    /// NMS IoU threshold.
    pub iou_threshold: f32,
    /// Worker thread count.
    pub workers: usize,
}

impl RunReport {
    /// Build a report from a finished run.
    pub fn from_outcome(outcome: &RunOutcome, params: &ProcessingParameters) -> Self {
        let abort_reason = match &outcome.status {
            RunStatus::Aborted { reason } => Some(reason.clone()),
            _ => None,
        };
        let failed_tiles = outcome
            .status
            .failures()
            .iter()
            .map(|f| FailedTileReport {
                index: f.tile_index,
                message: f.message.clone(),
            })
            .collect();
        Self {
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
            status: outcome.status.label().to_string(),
            abort_reason,
            tiles_total: outcome.tiles_total,
            tiles_processed: outcome.tiles_processed,
            failed_tiles,
            parameters: ParametersReport {
                tile_size_px: params.tile_size_px,
                overlap_percent: params.overlap_percent,
                confidence_threshold: params.confidence_threshold,
                iou_threshold: params.iou_threshold,
                workers: params.workers,
            },
        }
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self).map_err(|source| {
            Error::JsonWrite {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}
