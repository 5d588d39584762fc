//! Detection model adapter and non-max suppression.

use crate::error::{Error, Result};
use crate::geometry::{BoundingBox, CoordSpace};
use crate::inference::InferenceEngine;
use crate::model::{ModelAdapter, PerTileResult, TaskKind};
use ndarray::ArrayD;
use tracing::debug;

/// One detected object.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Bounding box; tile-local straight out of the adapter, full-image
    /// after the aggregator has transformed it.
    pub bbox: BoundingBox,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f32,
    /// Class index.
    pub class_id: usize,
}

/// Adapter for single-stage detection models with a `(1, N, 5 + classes)`
/// output: box center x/y, width, height, objectness, then one score per
/// class, all in input-tile pixel units.
pub struct Detector {
    engine: Box<dyn InferenceEngine>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl Detector {
    /// Wrap an engine as a detection model.
    pub fn new(engine: Box<dyn InferenceEngine>, confidence_threshold: f32, iou_threshold: f32) -> Self {
        Self {
            engine,
            confidence_threshold,
            iou_threshold,
        }
    }

    /// IoU threshold used for per-tile suppression.
    pub fn iou_threshold(&self) -> f32 {
        self.iou_threshold
    }
}

impl ModelAdapter for Detector {
    fn engine(&self) -> &dyn InferenceEngine {
        self.engine.as_ref()
    }

    fn task(&self) -> TaskKind {
        TaskKind::Detection
    }

    fn validate(&self) -> Result<()> {
        let shapes = self.engine.output_shapes();
        if shapes.len() != 1 {
            return Err(Error::IncompatibleModel {
                reason: format!(
                    "detection model must have exactly 1 output, has {}",
                    shapes.len()
                ),
            });
        }
        let shape = &shapes[0];
        if shape.len() != 3 {
            return Err(Error::IncompatibleModel {
                reason: format!(
                    "detection model output should have 3 dimensions (batch, boxes, attributes), has {shape:?}"
                ),
            });
        }
        if shape[0] != 1 {
            return Err(Error::IncompatibleModel {
                reason: format!("detection model can handle only 1-batch outputs, has {shape:?}"),
            });
        }
        if shape[2] < 6 {
            return Err(Error::IncompatibleModel {
                reason: format!(
                    "detection model output rows need at least 6 attributes (box, objectness, class), has {shape:?}"
                ),
            });
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn postprocess(&self, outputs: Vec<ArrayD<f32>>) -> Result<PerTileResult> {
        let output = outputs.into_iter().next().ok_or_else(|| Error::Inference {
            reason: "engine returned no output tensors".to_string(),
        })?;
        let shape = output.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(Error::Inference {
                reason: format!("unexpected detection output shape {shape:?}"),
            });
        }
        let tile_size = self.engine.input_size() as i64;
        let classes = shape[2] - 5;

        let mut detections = Vec::new();
        for row in 0..shape[1] {
            let objectness = output[[0, row, 4]];
            let mut best_class = 0;
            let mut best_score = f32::MIN;
            for class in 0..classes {
                let score = output[[0, row, 5 + class]];
                if score > best_score {
                    best_score = score;
                    best_class = class;
                }
            }
            let confidence = objectness * best_score;
            if confidence < self.confidence_threshold {
                continue;
            }

            let cx = output[[0, row, 0]];
            let cy = output[[0, row, 1]];
            let bw = output[[0, row, 2]];
            let bh = output[[0, row, 3]];
            let bbox = BoundingBox::new(
                ((cx - bw / 2.0).round() as i64).clamp(0, tile_size),
                ((cy - bh / 2.0).round() as i64).clamp(0, tile_size),
                ((cx + bw / 2.0).round() as i64).clamp(0, tile_size),
                ((cy + bh / 2.0).round() as i64).clamp(0, tile_size),
                CoordSpace::TileLocal,
            );
            if bbox.is_empty() {
                continue;
            }
            detections.push(Detection {
                bbox,
                confidence,
                class_id: best_class,
            });
        }

        let kept = non_max_suppression(detections, self.iou_threshold);
        debug!(kept = kept.len(), "per-tile detections after suppression");
        Ok(PerTileResult::Detections(kept))
    }
}

/// Greedy class-wise non-max suppression.
///
/// Candidates are ordered by confidence descending with a stable
/// coordinate tie-break, so the survivors do not depend on input order.
/// A box is dropped when a kept box of the same class overlaps it with
/// IoU above the threshold.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    sort_stable(&mut detections);

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let duplicate = kept.iter().any(|k| {
            k.class_id == candidate.class_id
                && k.bbox.iou(&candidate.bbox) > f64::from(iou_threshold)
        });
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

/// Deterministic ordering: confidence descending, then coordinates and
/// class as tie-breaks.
pub(crate) fn sort_stable(detections: &mut [Detection]) {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.bbox.x_min.cmp(&b.bbox.x_min))
            .then_with(|| a.bbox.y_min.cmp(&b.bbox.y_min))
            .then_with(|| a.bbox.x_max.cmp(&b.bbox.x_max))
            .then_with(|| a.bbox.y_max.cmp(&b.bbox.y_max))
            .then_with(|| a.class_id.cmp(&b.class_id))
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::inference::EngineError;
    use ndarray::{Array4, IxDyn};

    struct StubEngine {
        input: Vec<usize>,
        outputs: Vec<Vec<usize>>,
    }

    impl InferenceEngine for StubEngine {
        fn input_shape(&self) -> &[usize] {
            &self.input
        }

        fn output_shapes(&self) -> &[Vec<usize>] {
            &self.outputs
        }

        fn infer(&self, _batch: &Array4<f32>) -> std::result::Result<Vec<ArrayD<f32>>, EngineError> {
            Ok(vec![ArrayD::zeros(IxDyn(&self.outputs[0]))])
        }
    }

    fn detector(boxes: usize, attrs: usize) -> Detector {
        Detector::new(
            Box::new(StubEngine {
                input: vec![1, 3, 512, 512],
                outputs: vec![vec![1, boxes, attrs]],
            }),
            0.5,
            0.5,
        )
    }

    fn det(x0: i64, y0: i64, x1: i64, y1: i64, confidence: f32, class_id: usize) -> Detection {
        Detection {
            bbox: BoundingBox::new(x0, y0, x1, y1, CoordSpace::TileLocal),
            confidence,
            class_id,
        }
    }

    #[test]
    fn test_validate() {
        assert!(detector(100, 6).validate().is_ok());
        assert!(detector(100, 5).validate().is_err());

        let bad_rank = Detector::new(
            Box::new(StubEngine {
                input: vec![1, 3, 512, 512],
                outputs: vec![vec![1, 100, 6, 1]],
            }),
            0.5,
            0.5,
        );
        assert!(bad_rank.validate().is_err());
    }

    #[test]
    fn test_postprocess_applies_confidence_threshold() {
        let adapter = detector(2, 6);
        let mut out = ArrayD::zeros(IxDyn(&[1, 2, 6]));
        // Row 0: confident box at (100, 100) sized 40x40.
        out[[0, 0, 0]] = 100.0;
        out[[0, 0, 1]] = 100.0;
        out[[0, 0, 2]] = 40.0;
        out[[0, 0, 3]] = 40.0;
        out[[0, 0, 4]] = 0.9;
        out[[0, 0, 5]] = 0.9;
        // Row 1: below threshold.
        out[[0, 1, 0]] = 300.0;
        out[[0, 1, 1]] = 300.0;
        out[[0, 1, 2]] = 40.0;
        out[[0, 1, 3]] = 40.0;
        out[[0, 1, 4]] = 0.6;
        out[[0, 1, 5]] = 0.5;

        let PerTileResult::Detections(dets) = adapter.postprocess(vec![out]).unwrap() else {
            panic!("expected detections");
        };
        assert_eq!(dets.len(), 1);
        assert_eq!(
            dets[0].bbox,
            BoundingBox::new(80, 80, 120, 120, CoordSpace::TileLocal)
        );
        assert_eq!(dets[0].class_id, 0);
        assert!((dets[0].confidence - 0.81).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping_same_class() {
        let kept = non_max_suppression(
            vec![
                det(0, 0, 100, 100, 0.9, 0),
                det(10, 0, 110, 100, 0.8, 0),
                det(300, 300, 400, 400, 0.7, 0),
            ],
            0.5,
        );
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_different_classes() {
        let kept = non_max_suppression(
            vec![det(0, 0, 100, 100, 0.9, 0), det(0, 0, 100, 100, 0.8, 1)],
            0.5,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_nms_is_order_independent() {
        let a = vec![
            det(0, 0, 100, 100, 0.9, 0),
            det(10, 0, 110, 100, 0.8, 0),
            det(50, 50, 150, 150, 0.85, 0),
        ];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(
            non_max_suppression(a, 0.3),
            non_max_suppression(b, 0.3)
        );
    }
}
