//! End-to-end pipeline tests with stub engines over synthetic rasters.

#![allow(clippy::unwrap_used)]

use deepraster::channels::ChannelsMapping;
use deepraster::config::{ProcessedArea, ProcessingParameters};
use deepraster::geometry::{CoordinateMapper, WorldRect};
use deepraster::inference::{EngineError, InferenceEngine};
use deepraster::model::{Detector, Regressor, Segmentor, SuperResolver};
use deepraster::output::progress::{CancelToken, ProgressSink};
use deepraster::processing::{FinalResult, MapProcessor, RunStatus};
use deepraster::source::{InMemoryRaster, PaddingPolicy};
use deepraster::{Error, PipelineConfig};
use ndarray::{Array2, Array3, Array4, ArrayD, IxDyn};
use std::sync::Mutex;
use std::time::Duration;

/// Engine that reports the first input channel as a sigmoid probability
/// plane, like a single-class "red detector" model.
struct RedDetectorEngine {
    input: Vec<usize>,
    outputs: Vec<Vec<usize>>,
}

impl RedDetectorEngine {
    fn new(size: usize) -> Self {
        Self {
            input: vec![1, 3, size, size],
            outputs: vec![vec![1, 1, size, size]],
        }
    }
}

impl InferenceEngine for RedDetectorEngine {
    fn input_shape(&self) -> &[usize] {
        &self.input
    }

    fn output_shapes(&self) -> &[Vec<usize>] {
        &self.outputs
    }

    fn infer(&self, batch: &Array4<f32>) -> Result<Vec<ArrayD<f32>>, EngineError> {
        let size = self.input[2];
        let mut out = ArrayD::zeros(IxDyn(&[1, 1, size, size]));
        for y in 0..size {
            for x in 0..size {
                out[[0, 0, y, x]] = batch[(0, 0, y, x)];
            }
        }
        Ok(vec![out])
    }
}

/// Engine that emits one box around the bright pixels of its tile.
struct BlobDetectorEngine {
    input: Vec<usize>,
    outputs: Vec<Vec<usize>>,
    objectness: f32,
}

impl BlobDetectorEngine {
    fn new(size: usize, objectness: f32) -> Self {
        Self {
            input: vec![1, 3, size, size],
            outputs: vec![vec![1, 1, 6]],
            objectness,
        }
    }
}

impl InferenceEngine for BlobDetectorEngine {
    fn input_shape(&self) -> &[usize] {
        &self.input
    }

    fn output_shapes(&self) -> &[Vec<usize>] {
        &self.outputs
    }

    fn infer(&self, batch: &Array4<f32>) -> Result<Vec<ArrayD<f32>>, EngineError> {
        let size = self.input[2];
        let mut x_min = size;
        let mut y_min = size;
        let mut x_max = 0usize;
        let mut y_max = 0usize;
        let mut found = false;
        for y in 0..size {
            for x in 0..size {
                if batch[(0, 0, y, x)] > 0.9 {
                    found = true;
                    x_min = x_min.min(x);
                    y_min = y_min.min(y);
                    x_max = x_max.max(x);
                    y_max = y_max.max(y);
                }
            }
        }
        let mut out = ArrayD::zeros(IxDyn(&[1, 1, 6]));
        if found {
            let w = (x_max + 1 - x_min) as f32;
            let h = (y_max + 1 - y_min) as f32;
            out[[0, 0, 0]] = x_min as f32 + w / 2.0;
            out[[0, 0, 1]] = y_min as f32 + h / 2.0;
            out[[0, 0, 2]] = w;
            out[[0, 0, 3]] = h;
            out[[0, 0, 4]] = self.objectness;
            out[[0, 0, 5]] = 1.0;
        }
        Ok(vec![out])
    }
}

/// Engine that upsamples the first channel by 2x (nearest neighbor).
struct UpscaleEngine {
    input: Vec<usize>,
    outputs: Vec<Vec<usize>>,
}

impl UpscaleEngine {
    fn new(size: usize) -> Self {
        Self {
            input: vec![1, 1, size, size],
            outputs: vec![vec![1, 1, size * 2, size * 2]],
        }
    }
}

impl InferenceEngine for UpscaleEngine {
    fn input_shape(&self) -> &[usize] {
        &self.input
    }

    fn output_shapes(&self) -> &[Vec<usize>] {
        &self.outputs
    }

    fn infer(&self, batch: &Array4<f32>) -> Result<Vec<ArrayD<f32>>, EngineError> {
        let size = self.input[2];
        let mut out = ArrayD::zeros(IxDyn(&[1, 1, size * 2, size * 2]));
        for y in 0..size * 2 {
            for x in 0..size * 2 {
                out[[0, 0, y, x]] = batch[(0, 0, y / 2, x / 2)];
            }
        }
        Ok(vec![out])
    }
}

/// Engine that fails whenever its tile contains a marker pixel.
struct FlakyEngine {
    inner: RedDetectorEngine,
}

impl InferenceEngine for FlakyEngine {
    fn input_shape(&self) -> &[usize] {
        self.inner.input_shape()
    }

    fn output_shapes(&self) -> &[Vec<usize>] {
        self.inner.output_shapes()
    }

    fn infer(&self, batch: &Array4<f32>) -> Result<Vec<ArrayD<f32>>, EngineError> {
        // Channel 1 full white marks a poisoned tile.
        if batch[(0, 1, 0, 0)] > 0.99 {
            return Err("synthetic engine failure".into());
        }
        self.inner.infer(batch)
    }
}

/// Engine that sleeps long enough to overrun a short tile deadline.
struct SlowEngine {
    inner: RedDetectorEngine,
    delay: Duration,
}

impl InferenceEngine for SlowEngine {
    fn input_shape(&self) -> &[usize] {
        self.inner.input_shape()
    }

    fn output_shapes(&self) -> &[Vec<usize>] {
        self.inner.output_shapes()
    }

    fn infer(&self, batch: &Array4<f32>) -> Result<Vec<ArrayD<f32>>, EngineError> {
        std::thread::sleep(self.delay);
        self.inner.infer(batch)
    }
}

/// Progress sink collecting every notification.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(usize, usize)>>,
}

impl ProgressSink for RecordingSink {
    fn on_progress(&self, completed: usize, total: usize) {
        self.events.lock().unwrap().push((completed, total));
    }
}

/// Progress sink that requests cancellation after the first tile.
struct CancellingSink {
    token: CancelToken,
}

impl ProgressSink for CancellingSink {
    fn on_progress(&self, completed: usize, _total: usize) {
        if completed >= 1 {
            self.token.cancel();
        }
    }
}

/// RGB raster with a red square, black elsewhere.
fn red_square_raster(size: usize, x0: usize, y0: usize, x1: usize, y1: usize) -> InMemoryRaster {
    let data = Array3::from_shape_fn((size, size, 3), |(y, x, c)| {
        if c == 0 && x >= x0 && x < x1 && y >= y0 && y < y1 {
            255
        } else {
            0
        }
    });
    InMemoryRaster::new(data)
}

fn unit_mapper(width: usize, height: usize) -> CoordinateMapper {
    CoordinateMapper::new((0.0, height as f64), (1.0, 1.0), width, height).unwrap()
}

fn params(tile_size: usize, overlap_percent: f32) -> ProcessingParameters {
    ProcessingParameters {
        tile_size_px: tile_size,
        overlap_percent,
        ..ProcessingParameters::default()
    }
}

fn expect_mask(result: Option<FinalResult>) -> Array2<u8> {
    match result {
        Some(FinalResult::Segmentation(seg)) => seg.mask,
        other => panic!("expected segmentation result, got {other:?}"),
    }
}

#[test]
fn test_segmentation_entire_raster() {
    let raster = red_square_raster(128, 32, 32, 96, 96);
    let engine = RedDetectorEngine::new(64);
    let adapter = Segmentor::new(Box::new(engine));
    let mapper = unit_mapper(128, 128);

    let processor = MapProcessor::new(&raster, &adapter, mapper, params(64, 0.0));
    let outcome = processor.run().unwrap();

    assert!(matches!(outcome.status, RunStatus::Completed));
    assert_eq!(outcome.tiles_total, 4);
    assert_eq!(outcome.tiles_processed, 4);

    let mask = expect_mask(outcome.result);
    assert_eq!(mask.dim(), (128, 128));
    assert_eq!(mask[(64, 64)], 1);
    assert_eq!(mask[(33, 90)], 1);
    assert_eq!(mask[(0, 0)], 0);
    assert_eq!(mask[(100, 100)], 0);
}

#[test]
fn test_pipeline_is_idempotent() {
    let raster = red_square_raster(128, 20, 20, 70, 90);
    let engine = RedDetectorEngine::new(64);
    let adapter = Segmentor::new(Box::new(engine));
    let mapper = unit_mapper(128, 128);

    let run = || {
        let processor = MapProcessor::new(&raster, &adapter, mapper, params(64, 25.0));
        expect_mask(processor.run().unwrap().result)
    };
    assert_eq!(run(), run());
}

#[test]
fn test_parallel_matches_sequential() {
    let raster = red_square_raster(256, 40, 60, 200, 180);
    let engine = RedDetectorEngine::new(64);
    let adapter = Segmentor::new(Box::new(engine));
    let mapper = unit_mapper(256, 256);

    let run = |workers: usize| {
        let mut p = params(64, 25.0);
        p.workers = workers;
        let processor = MapProcessor::new(&raster, &adapter, mapper, p);
        expect_mask(processor.run().unwrap().result)
    };
    assert_eq!(run(1), run(4));
}

#[test]
fn test_detection_dedup_across_tiles() {
    // One bright blob seen by several overlapping tiles.
    let data = Array3::from_shape_fn((64, 96, 3), |(y, x, c)| {
        if c == 0 && x >= 40 && x < 56 && y >= 24 && y < 40 {
            255
        } else {
            0
        }
    });
    let raster = InMemoryRaster::new(data);
    let engine = BlobDetectorEngine::new(64, 0.95);
    let adapter = Detector::new(Box::new(engine), 0.5, 0.4);
    let mapper = unit_mapper(96, 64);

    let mut p = params(64, 50.0);
    p.iou_threshold = 0.4;
    p.padding = PaddingPolicy::Zero;
    let processor = MapProcessor::new(&raster, &adapter, mapper, p);
    let outcome = processor.run().unwrap();

    assert!(matches!(outcome.status, RunStatus::Completed));
    let Some(FinalResult::Detections(dets)) = outcome.result else {
        panic!("expected detections");
    };
    assert_eq!(dets.len(), 1, "duplicates must merge to one detection");
    let det = &dets[0];
    assert_eq!(
        (det.bbox.x_min, det.bbox.y_min, det.bbox.x_max, det.bbox.y_max),
        (40, 24, 56, 40)
    );
    // World: unit pixel size, origin (0, 64) top-left.
    assert!((det.rect.x_min - 40.0).abs() < 1e-9);
    assert!((det.rect.y_max - 40.0).abs() < 1e-9);
}

#[test]
fn test_no_detections_below_confidence() {
    let data = Array3::from_shape_fn((64, 64, 3), |(y, x, c)| {
        if c == 0 && x >= 10 && x < 20 && y >= 10 && y < 20 {
            255
        } else {
            0
        }
    });
    let raster = InMemoryRaster::new(data);
    // Objectness 0.4 stays below the 0.5 confidence threshold.
    let engine = BlobDetectorEngine::new(64, 0.4);
    let adapter = Detector::new(Box::new(engine), 0.5, 0.5);
    let mapper = unit_mapper(64, 64);

    let mut p = params(64, 0.0);
    p.padding = PaddingPolicy::Zero;
    let processor = MapProcessor::new(&raster, &adapter, mapper, p);
    let outcome = processor.run().unwrap();

    let Some(FinalResult::Detections(dets)) = outcome.result else {
        panic!("expected detections");
    };
    assert!(dets.is_empty());
}

#[test]
fn test_super_resolution_output_scale() {
    let data = Array3::from_shape_fn((32, 32, 1), |(y, x, _)| ((y * 7 + x * 3) % 251) as u8);
    let raster = InMemoryRaster::new(data.clone());
    let engine = UpscaleEngine::new(32);
    let adapter = SuperResolver::new(Box::new(engine));
    let mapper = unit_mapper(32, 32);

    let mut p = params(32, 0.0);
    p.channels_mapping = ChannelsMapping::new(vec![deepraster::ImageChannel::StandaloneBand {
        band: 1,
        name: "gray".to_string(),
    }]);
    let processor = MapProcessor::new(&raster, &adapter, mapper, p);
    let outcome = processor.run().unwrap();

    let Some(FinalResult::Values { planes, scale }) = outcome.result else {
        panic!("expected value planes");
    };
    assert_eq!(scale, 2);
    assert_eq!(planes.dim(), (1, 64, 64));
    for y in 0..64 {
        for x in 0..64 {
            let expected = f32::from(data[(y / 2, x / 2, 0)]) / 255.0;
            assert!((planes[(0, y, x)] - expected).abs() < 1e-6);
        }
    }
}

#[test]
fn test_regression_run() {
    let raster = red_square_raster(64, 0, 0, 64, 64);
    let engine = RedDetectorEngine::new(64);
    let adapter = Regressor::new(Box::new(engine));
    let mapper = unit_mapper(64, 64);

    let processor = MapProcessor::new(&raster, &adapter, mapper, params(64, 0.0));
    let outcome = processor.run().unwrap();
    let Some(FinalResult::Values { planes, scale }) = outcome.result else {
        panic!("expected value planes");
    };
    assert_eq!(scale, 1);
    assert!((planes[(0, 10, 10)] - 1.0).abs() < 1e-6);
}

#[test]
fn test_single_tile_failure_is_tolerated() {
    // Poison the top-left tile with a full-white green channel.
    let data = Array3::from_shape_fn((128, 128, 3), |(y, x, c)| match c {
        0 => 255,
        1 if x < 64 && y < 64 => 255,
        _ => 0,
    });
    let raster = InMemoryRaster::new(data);
    let engine = FlakyEngine {
        inner: RedDetectorEngine::new(64),
    };
    let adapter = Segmentor::new(Box::new(engine));
    let mapper = unit_mapper(128, 128);

    let processor = MapProcessor::new(&raster, &adapter, mapper, params(64, 0.0));
    let outcome = processor.run().unwrap();

    let RunStatus::CompletedWithErrors(failures) = &outcome.status else {
        panic!("expected completed_with_errors, got {:?}", outcome.status);
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].tile_index, 0);

    let mask = expect_mask(outcome.result);
    // Failed tile's region stays unset, the rest is classified.
    assert_eq!(mask[(10, 10)], 0);
    assert_eq!(mask[(10, 100)], 1);
    assert_eq!(mask[(100, 10)], 1);
}

#[test]
fn test_fatal_inference_errors_abort() {
    let data = Array3::from_shape_fn((128, 128, 3), |(y, x, c)| match c {
        0 => 255,
        1 if x < 64 && y < 64 => 255,
        _ => 0,
    });
    let raster = InMemoryRaster::new(data);
    let engine = FlakyEngine {
        inner: RedDetectorEngine::new(64),
    };
    let adapter = Segmentor::new(Box::new(engine));
    let mapper = unit_mapper(128, 128);

    let mut p = params(64, 0.0);
    p.fatal_inference_errors = true;
    let processor = MapProcessor::new(&raster, &adapter, mapper, p);
    let outcome = processor.run().unwrap();

    assert!(matches!(outcome.status, RunStatus::Aborted { .. }));
    assert!(outcome.result.is_none());
}

#[test]
fn test_tile_size_mismatch_fails_fast() {
    let raster = red_square_raster(128, 0, 0, 64, 64);
    let engine = RedDetectorEngine::new(256);
    let adapter = Segmentor::new(Box::new(engine));
    let mapper = unit_mapper(128, 128);

    let processor = MapProcessor::new(&raster, &adapter, mapper, params(64, 0.0));
    let err = processor.run().unwrap_err();
    assert!(matches!(err, Error::IncompatibleModel { .. }));
}

#[test]
fn test_invalid_overlap_fails_fast() {
    let raster = red_square_raster(128, 0, 0, 64, 64);
    let engine = RedDetectorEngine::new(64);
    let adapter = Segmentor::new(Box::new(engine));
    let mapper = unit_mapper(128, 128);

    let processor = MapProcessor::new(&raster, &adapter, mapper, params(64, 100.0));
    let err = processor.run().unwrap_err();
    assert!(matches!(err, Error::InvalidParameter { .. }));
}

#[test]
fn test_cancellation_stops_between_tiles() {
    let raster = red_square_raster(128, 0, 0, 128, 128);
    let engine = RedDetectorEngine::new(64);
    let adapter = Segmentor::new(Box::new(engine));
    let mapper = unit_mapper(128, 128);

    let token = CancelToken::new();
    let sink = CancellingSink {
        token: token.clone(),
    };
    let processor = MapProcessor::new(&raster, &adapter, mapper, params(64, 0.0))
        .with_progress(&sink)
        .with_cancel_token(token);
    let outcome = processor.run().unwrap();

    assert!(matches!(outcome.status, RunStatus::Cancelled));
    assert!(outcome.tiles_processed >= 1);
    assert!(outcome.tiles_processed < outcome.tiles_total);
    // The partial result is still returned.
    assert!(outcome.result.is_some());
}

#[test]
fn test_progress_reporting() {
    let raster = red_square_raster(128, 0, 0, 64, 64);
    let engine = RedDetectorEngine::new(64);
    let adapter = Segmentor::new(Box::new(engine));
    let mapper = unit_mapper(128, 128);

    let sink = RecordingSink::default();
    let processor =
        MapProcessor::new(&raster, &adapter, mapper, params(64, 0.0)).with_progress(&sink);
    processor.run().unwrap();

    let events = sink.events.lock().unwrap();
    assert_eq!(events.len(), 4);
    assert_eq!(events.last().copied(), Some((4, 4)));
    assert!(events.windows(2).all(|w| w[0].0 < w[1].0));
}

#[test]
fn test_world_extent_processing() {
    let raster = red_square_raster(128, 40, 40, 56, 56);
    let engine = RedDetectorEngine::new(64);
    let adapter = Segmentor::new(Box::new(engine));
    let mapper = CoordinateMapper::new((1000.0, 2000.0), (1.0, 1.0), 128, 128).unwrap();

    let mut p = params(64, 0.0);
    // Pixels (32..96, 32..96) in world coordinates.
    p.processed_area = ProcessedArea::WorldExtent(WorldRect::new(1032.0, 1904.0, 1096.0, 1968.0));
    let processor = MapProcessor::new(&raster, &adapter, mapper, p);
    let outcome = processor.run().unwrap();

    assert_eq!(outcome.tiles_total, 1);
    let mask = expect_mask(outcome.result);
    assert_eq!(mask.dim(), (64, 64));
    // The red square is at extent-local (8..24, 8..24).
    assert_eq!(mask[(10, 10)], 1);
    assert_eq!(mask[(0, 0)], 0);
    assert_eq!(mask[(40, 40)], 0);
}

#[test]
fn test_masked_extent_skips_unselected_tiles() {
    let raster = red_square_raster(64, 0, 0, 64, 64);
    let engine = RedDetectorEngine::new(32);
    let adapter = Segmentor::new(Box::new(engine));
    let mapper = unit_mapper(64, 64);

    let mask = Array2::from_shape_fn((64, 64), |(_, x)| x < 32);
    let mut p = params(32, 0.0);
    p.processed_area = ProcessedArea::MaskedExtent {
        extent: WorldRect::new(0.0, 0.0, 64.0, 64.0),
        mask,
    };
    let processor = MapProcessor::new(&raster, &adapter, mapper, p);
    let outcome = processor.run().unwrap();

    assert!(matches!(outcome.status, RunStatus::Completed));
    let result_mask = expect_mask(outcome.result);
    assert_eq!(result_mask[(10, 10)], 1);
    assert_eq!(result_mask[(10, 40)], 0);
}

#[test]
fn test_tile_deadline_marks_tiles_failed() {
    let raster = red_square_raster(128, 0, 0, 128, 128);
    let engine = SlowEngine {
        inner: RedDetectorEngine::new(64),
        delay: Duration::from_millis(20),
    };
    let adapter = Segmentor::new(Box::new(engine));
    let mapper = unit_mapper(128, 128);

    let mut p = params(64, 0.0);
    p.tile_deadline = Some(Duration::from_millis(1));
    let processor = MapProcessor::new(&raster, &adapter, mapper, p);
    let outcome = processor.run().unwrap();

    let RunStatus::CompletedWithErrors(failures) = &outcome.status else {
        panic!("expected completed_with_errors, got {:?}", outcome.status);
    };
    assert_eq!(failures.len(), 4);
    let mask = expect_mask(outcome.result);
    assert!(mask.iter().all(|&v| v == 0));
}

#[test]
fn test_run_report_round_trip() {
    let raster = red_square_raster(128, 0, 0, 64, 64);
    let engine = RedDetectorEngine::new(64);
    let adapter = Segmentor::new(Box::new(engine));
    let mapper = unit_mapper(128, 128);

    let p = params(64, 0.0);
    let processor = MapProcessor::new(&raster, &adapter, mapper, p.clone());
    let outcome = processor.run().unwrap();

    let report = deepraster::output::RunReport::from_outcome(&outcome, &p);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    report.write_json(&path).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["status"], "completed");
    assert_eq!(value["tiles_total"], 4);
    assert_eq!(value["parameters"]["tile_size_px"], 64);
}

#[test]
fn test_config_defaults_drive_a_run() {
    let raster = red_square_raster(128, 32, 32, 96, 96);
    let engine = RedDetectorEngine::new(512);
    let adapter = Segmentor::new(Box::new(engine));
    let mapper = unit_mapper(128, 128);

    let config = PipelineConfig::default();
    let p = ProcessingParameters::from_config(
        &config,
        ChannelsMapping::rgb(),
        ProcessedArea::EntireRaster,
    );
    // Default tile size is 512; the 128px raster still yields one
    // partial tile padded by the reader.
    let processor = MapProcessor::new(&raster, &adapter, mapper, p);
    let outcome = processor.run().unwrap();
    assert_eq!(outcome.tiles_total, 1);
    let mask = expect_mask(outcome.result);
    assert_eq!(mask.dim(), (128, 128));
    assert_eq!(mask[(64, 64)], 1);
}
