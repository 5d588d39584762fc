//! Tile processing and scheduling.
//!
//! [`MapProcessor`] drives one run: it resolves the processing area,
//! generates the tile grid, fetches and infers tile by tile (sequentially
//! or on a bounded worker pool), streams every per-tile result into the
//! aggregator, reports progress, and honors cooperative cancellation.
//!
//! Single-tile failures are recorded and skipped; their region stays unset
//! in the global result. Systemic failures (model contract violations,
//! coordinate misuse) abort the whole run.

use crate::config::{ProcessedArea, ProcessingParameters, validate_parameters};
use crate::error::{Error, Result};
use crate::geometry::{BoundingBox, CoordinateMapper};
use crate::grid::{TileGrid, TileSpec};
use crate::model::{ModelAdapter, PerTileResult, TaskKind};
use crate::output::progress::{CancelToken, ProgressSink};
use crate::processing::aggregator::{
    DetectionAccumulator, FinalResult, GlobalResult, RasterAccumulator, RasterKind,
};
use crate::source::RasterSource;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// One tile that failed without aborting the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileFailure {
    /// Tile index in grid order.
    pub tile_index: usize,
    /// Failure description.
    pub message: String,
}

/// Terminal state of a processing run.
#[derive(Debug, Clone)]
pub enum RunStatus {
    /// Every tile processed successfully.
    Completed,
    /// The run finished, but some tiles failed and were left unset.
    CompletedWithErrors(Vec<TileFailure>),
    /// Cancellation was requested; the result covers the tiles merged
    /// before the stop.
    Cancelled,
    /// A systemic failure ended the run early; no result is produced.
    Aborted {
        /// Why the run was aborted.
        reason: String,
    },
}

impl RunStatus {
    /// Short machine-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CompletedWithErrors(_) => "completed_with_errors",
            Self::Cancelled => "cancelled",
            Self::Aborted { .. } => "aborted",
        }
    }

    /// Failed tiles, if any.
    pub fn failures(&self) -> &[TileFailure] {
        match self {
            Self::CompletedWithErrors(failures) => failures,
            _ => &[],
        }
    }
}

/// Everything a finished run reports back to the caller.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Terminal run state.
    pub status: RunStatus,
    /// The merged result; `None` only for aborted runs.
    pub result: Option<FinalResult>,
    /// Number of tiles in the grid.
    pub tiles_total: usize,
    /// Number of tiles attempted before the run ended.
    pub tiles_processed: usize,
    /// When the run started (UTC).
    pub started_at: DateTime<Utc>,
    /// When the run finished (UTC).
    pub finished_at: DateTime<Utc>,
}

/// Result of the tile loop, before finalization.
struct LoopOutcome {
    processed: usize,
    failures: Vec<TileFailure>,
    cancelled: bool,
    abort: Option<String>,
}

/// Drives one map-processing run over a raster.
pub struct MapProcessor<'a> {
    source: &'a dyn RasterSource,
    adapter: &'a dyn ModelAdapter,
    mapper: CoordinateMapper,
    params: ProcessingParameters,
    progress: Option<&'a dyn ProgressSink>,
    cancel: Option<CancelToken>,
}

impl<'a> MapProcessor<'a> {
    /// Create a processor from its collaborators.
    pub fn new(
        source: &'a dyn RasterSource,
        adapter: &'a dyn ModelAdapter,
        mapper: CoordinateMapper,
        params: ProcessingParameters,
    ) -> Self {
        Self {
            source,
            adapter,
            mapper,
            params,
            progress: None,
            cancel: None,
        }
    }

    /// Attach a progress sink.
    pub fn with_progress(mut self, sink: &'a dyn ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Attach a cancellation token.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run the pipeline to completion, cancellation or abort.
    ///
    /// Configuration and model-contract violations surface as errors
    /// before any tile runs; mid-run systemic failures surface as
    /// [`RunStatus::Aborted`].
    pub fn run(&self) -> Result<RunOutcome> {
        let started_at = Utc::now();

        validate_parameters(&self.params)?;
        self.adapter.validate()?;
        self.params
            .channels_mapping
            .validate_for_model(self.adapter.engine().input_channels())?;
        let model_size = self.adapter.engine().input_size();
        if model_size != self.params.tile_size_px {
            return Err(Error::IncompatibleModel {
                reason: format!(
                    "model input size {model_size}px does not match configured tile size {}px",
                    self.params.tile_size_px
                ),
            });
        }

        let (extent, area_mask) = self.resolve_area()?;
        let grid = TileGrid::new(extent, self.params.tile_size_px, self.params.overlap_px())?;
        let total = grid.tile_count();
        info!(
            tiles = total,
            width = extent.width(),
            height = extent.height(),
            workers = self.params.workers,
            "starting map processing run"
        );

        let mut global = self.new_global_result(extent)?;
        let tiles: Vec<TileSpec> = grid.iter().collect();

        let mut outcome = if self.params.workers <= 1 {
            self.run_sequential(&tiles, &mut global, area_mask.as_ref(), &extent, total)
        } else {
            self.run_parallel(&tiles, &mut global, area_mask.as_ref(), &extent, total)
        };
        outcome.failures.sort_by_key(|f| f.tile_index);

        let finished_at = Utc::now();
        if let Some(reason) = outcome.abort {
            error!(reason = %reason, "run aborted");
            return Ok(RunOutcome {
                status: RunStatus::Aborted { reason },
                result: None,
                tiles_total: total,
                tiles_processed: outcome.processed,
                started_at,
                finished_at,
            });
        }

        let result = self.finalize(global, area_mask.as_ref())?;
        let status = if outcome.cancelled {
            RunStatus::Cancelled
        } else if outcome.failures.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithErrors(outcome.failures)
        };
        info!(
            status = status.label(),
            processed = outcome.processed,
            total,
            "map processing run finished"
        );
        Ok(RunOutcome {
            status,
            result: Some(result),
            tiles_total: total,
            tiles_processed: outcome.processed,
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn run_sequential(
        &self,
        tiles: &[TileSpec],
        global: &mut GlobalResult,
        area_mask: Option<&Array2<bool>>,
        extent: &BoundingBox,
        total: usize,
    ) -> LoopOutcome {
        let mut failures = Vec::new();
        let mut processed = 0usize;

        for tile in tiles {
            if self.is_cancelled() {
                info!(processed, total, "cancellation requested, stopping");
                return LoopOutcome {
                    processed,
                    failures,
                    cancelled: true,
                    abort: None,
                };
            }
            if let Some(mask) = area_mask
                && !tile_in_mask(mask, extent, tile)
            {
                debug!(tile = tile.index, "tile outside processing mask, skipped");
                processed += 1;
                self.report(processed, total);
                continue;
            }

            match self.process_tile(tile) {
                Ok(result) => {
                    if let Err(e) = global.merge(tile, result) {
                        warn!(tile = tile.index, error = %e, "failed to merge tile result");
                        failures.push(TileFailure {
                            tile_index: tile.index,
                            message: e.to_string(),
                        });
                    }
                }
                Err(e) if self.is_fatal(&e) => {
                    return LoopOutcome {
                        processed,
                        failures,
                        cancelled: false,
                        abort: Some(e.to_string()),
                    };
                }
                Err(e) => {
                    warn!(tile = tile.index, error = %e, "tile failed, continuing");
                    failures.push(TileFailure {
                        tile_index: tile.index,
                        message: e.to_string(),
                    });
                }
            }
            processed += 1;
            self.report(processed, total);
        }

        LoopOutcome {
            processed,
            failures,
            cancelled: false,
            abort: None,
        }
    }

    fn run_parallel(
        &self,
        tiles: &[TileSpec],
        global: &mut GlobalResult,
        area_mask: Option<&Array2<bool>>,
        extent: &BoundingBox,
        total: usize,
    ) -> LoopOutcome {
        let next = AtomicUsize::new(0);
        let processed = AtomicUsize::new(0);
        let cancelled = AtomicBool::new(false);
        let aborting = AtomicBool::new(false);
        let abort_reason: Mutex<Option<String>> = Mutex::new(None);
        let failures: Mutex<Vec<TileFailure>> = Mutex::new(Vec::new());
        let merge_lock = Mutex::new(global);

        std::thread::scope(|scope| {
            for _ in 0..self.params.workers {
                scope.spawn(|| {
                    loop {
                        if aborting.load(Ordering::SeqCst) {
                            break;
                        }
                        if self.is_cancelled() {
                            cancelled.store(true, Ordering::SeqCst);
                            break;
                        }
                        let i = next.fetch_add(1, Ordering::SeqCst);
                        if i >= tiles.len() {
                            break;
                        }
                        let tile = &tiles[i];
                        if let Some(mask) = area_mask
                            && !tile_in_mask(mask, extent, tile)
                        {
                            let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                            self.report(done, total);
                            continue;
                        }

                        match self.process_tile(tile) {
                            Ok(result) => {
                                let mut guard = merge_lock
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner);
                                if let Err(e) = guard.merge(tile, result) {
                                    warn!(tile = tile.index, error = %e, "failed to merge tile result");
                                    failures
                                        .lock()
                                        .unwrap_or_else(PoisonError::into_inner)
                                        .push(TileFailure {
                                            tile_index: tile.index,
                                            message: e.to_string(),
                                        });
                                }
                            }
                            Err(e) if self.is_fatal(&e) => {
                                *abort_reason.lock().unwrap_or_else(PoisonError::into_inner) =
                                    Some(e.to_string());
                                aborting.store(true, Ordering::SeqCst);
                                break;
                            }
                            Err(e) => {
                                warn!(tile = tile.index, error = %e, "tile failed, continuing");
                                failures
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .push(TileFailure {
                                        tile_index: tile.index,
                                        message: e.to_string(),
                                    });
                            }
                        }
                        let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                        self.report(done, total);
                    }
                });
            }
        });

        LoopOutcome {
            processed: processed.load(Ordering::SeqCst),
            failures: failures.into_inner().unwrap_or_else(PoisonError::into_inner),
            cancelled: cancelled.load(Ordering::SeqCst),
            abort: abort_reason
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Fetch, preprocess, infer and postprocess one tile.
    fn process_tile(&self, tile: &TileSpec) -> Result<PerTileResult> {
        let started = Instant::now();
        let block = self
            .source
            .read_padded(
                &tile.bbox(),
                &self.params.channels_mapping,
                self.params.padding,
            )
            .map_err(|e| match e {
                Error::OutOfBounds { .. } => e,
                other => Error::TileFetch {
                    reason: other.to_string(),
                },
            })?;
        let result = self.adapter.process(&block)?;
        if let Some(deadline) = self.params.tile_deadline
            && started.elapsed() > deadline
        {
            // Inference is not interruptible; an overrun is detected after
            // the call returns and the tile's result is discarded.
            return Err(Error::Inference {
                reason: format!(
                    "tile exceeded deadline of {:.1}s",
                    deadline.as_secs_f64()
                ),
            });
        }
        Ok(result)
    }

    fn resolve_area(&self) -> Result<(BoundingBox, Option<Array2<bool>>)> {
        match &self.params.processed_area {
            ProcessedArea::EntireRaster => Ok((self.mapper.raster_bbox(), None)),
            ProcessedArea::WorldExtent(rect) => {
                let bbox = self.mapper.world_rect_to_pixel_bbox(rect);
                if bbox.is_empty() {
                    return Err(Error::InvalidParameter {
                        message: "processing extent is empty after clipping to the raster"
                            .to_string(),
                    });
                }
                Ok((bbox, None))
            }
            ProcessedArea::MaskedExtent { extent, mask } => {
                let bbox = self.mapper.world_rect_to_pixel_bbox(extent);
                if bbox.is_empty() {
                    return Err(Error::InvalidParameter {
                        message: "processing extent is empty after clipping to the raster"
                            .to_string(),
                    });
                }
                if mask.dim() != (bbox.height(), bbox.width()) {
                    return Err(Error::InvalidParameter {
                        message: format!(
                            "area mask of {:?} px does not match the {}x{} px extent",
                            mask.dim(),
                            bbox.height(),
                            bbox.width()
                        ),
                    });
                }
                if !mask.iter().any(|&m| m) {
                    return Err(Error::InvalidParameter {
                        message: "area mask selects no pixels".to_string(),
                    });
                }
                Ok((bbox, Some(mask.clone())))
            }
        }
    }

    fn new_global_result(&self, extent: BoundingBox) -> Result<GlobalResult> {
        match self.adapter.task() {
            TaskKind::Segmentation { classes } => {
                if classes == 0 {
                    return Err(Error::IncompatibleModel {
                        reason: "segmentation model declares no output classes".to_string(),
                    });
                }
                Ok(GlobalResult::Raster(RasterAccumulator::new(
                    RasterKind::Probabilities,
                    extent,
                    classes,
                    1,
                )))
            }
            TaskKind::Values { channels, scale } => {
                if channels == 0 || scale == 0 {
                    return Err(Error::IncompatibleModel {
                        reason: "model declares no output channels or an invalid scale"
                            .to_string(),
                    });
                }
                Ok(GlobalResult::Raster(RasterAccumulator::new(
                    RasterKind::Values,
                    extent,
                    channels,
                    scale,
                )))
            }
            TaskKind::Detection => Ok(GlobalResult::Detections(DetectionAccumulator::new(
                extent,
                self.params.iou_threshold,
            ))),
        }
    }

    fn finalize(
        &self,
        global: GlobalResult,
        area_mask: Option<&Array2<bool>>,
    ) -> Result<FinalResult> {
        match global {
            GlobalResult::Raster(acc) => match self.adapter.task() {
                TaskKind::Segmentation { .. } => {
                    acc.finalize_segmentation(self.params.model_output_format, area_mask)
                }
                _ => Ok(acc.finalize_values(area_mask)),
            },
            GlobalResult::Detections(acc) => Ok(acc.finalize(&self.mapper, area_mask)),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Whether an error ends the whole run.
    fn is_fatal(&self, error: &Error) -> bool {
        error.is_systemic()
            || (self.params.fatal_inference_errors && matches!(error, Error::Inference { .. }))
    }

    fn report(&self, completed: usize, total: usize) {
        if let Some(sink) = self.progress {
            sink.on_progress(completed, total);
        }
    }
}

/// Whether any valid pixel of the tile is selected by the area mask.
fn tile_in_mask(mask: &Array2<bool>, extent: &BoundingBox, tile: &TileSpec) -> bool {
    let valid = tile.valid_bbox_full();
    for y in valid.y_min..valid.y_max {
        for x in valid.x_min..valid.x_max {
            if mask[((y - extent.y_min) as usize, (x - extent.x_min) as usize)] {
                return true;
            }
        }
    }
    false
}
