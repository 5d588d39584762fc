//! Segmentation model adapter.

use crate::error::Result;
use crate::inference::InferenceEngine;
use crate::model::{
    ModelAdapter, PerTileResult, TaskKind, dense_output_planes, validate_dense_output,
};
use ndarray::{Array3, ArrayD, s};

/// Adapter for per-pixel classification models.
///
/// The model is expected to emit probabilities (sigmoid or softmax applied
/// in-graph), one plane per class. Single-channel sigmoid models are
/// expanded to two planes with the background as `1 - p`, so downstream
/// argmax handles both forms uniformly.
pub struct Segmentor {
    engine: Box<dyn InferenceEngine>,
}

impl Segmentor {
    /// Wrap an engine as a segmentation model.
    pub fn new(engine: Box<dyn InferenceEngine>) -> Self {
        Self { engine }
    }

    /// Number of probability planes the adapter produces per tile.
    pub fn class_count(&self) -> usize {
        let declared = self
            .engine
            .output_shapes()
            .first()
            .and_then(|s| s.get(1))
            .copied()
            .unwrap_or(0);
        if declared == 1 { 2 } else { declared }
    }
}

impl ModelAdapter for Segmentor {
    fn engine(&self) -> &dyn InferenceEngine {
        self.engine.as_ref()
    }

    fn task(&self) -> TaskKind {
        TaskKind::Segmentation {
            classes: self.class_count(),
        }
    }

    fn validate(&self) -> Result<()> {
        validate_dense_output(self.engine.as_ref(), "segmentation")?;
        Ok(())
    }

    fn postprocess(&self, outputs: Vec<ArrayD<f32>>) -> Result<PerTileResult> {
        let planes = dense_output_planes(outputs)?;
        let (classes, height, width) = planes.dim();
        if classes == 1 {
            let mut expanded = Array3::<f32>::zeros((2, height, width));
            expanded
                .slice_mut(s![1, .., ..])
                .assign(&planes.slice(s![0, .., ..]));
            expanded
                .slice_mut(s![0, .., ..])
                .assign(&planes.slice(s![0, .., ..]).mapv(|p| 1.0 - p));
            return Ok(PerTileResult::Mask(expanded));
        }
        Ok(PerTileResult::Mask(planes))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Error;
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

    fn segmentor(outputs: Vec<Vec<usize>>) -> Segmentor {
        Segmentor::new(Box::new(StubEngine {
            input: vec![1, 3, 8, 8],
            outputs,
        }))
    }

    #[test]
    fn test_validate_accepts_square_four_dim_output() {
        assert!(segmentor(vec![vec![1, 2, 8, 8]]).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let err = segmentor(vec![vec![1, 2, 8]]).validate().unwrap_err();
        assert!(matches!(err, Error::IncompatibleModel { .. }));

        let err = segmentor(vec![vec![4, 2, 8, 8]]).validate().unwrap_err();
        assert!(matches!(err, Error::IncompatibleModel { .. }));

        let err = segmentor(vec![vec![1, 2, 8, 16]]).validate().unwrap_err();
        assert!(matches!(err, Error::IncompatibleModel { .. }));
    }

    #[test]
    fn test_single_channel_expands_to_background_plane() {
        let adapter = segmentor(vec![vec![1, 1, 4, 4]]);
        assert_eq!(adapter.class_count(), 2);

        let mut out = ArrayD::zeros(IxDyn(&[1, 1, 4, 4]));
        out[[0, 0, 2, 2]] = 0.9;
        let result = adapter.postprocess(vec![out]).unwrap();
        let PerTileResult::Mask(planes) = result else {
            panic!("expected mask result");
        };
        assert_eq!(planes.dim(), (2, 4, 4));
        assert!((planes[(1, 2, 2)] - 0.9).abs() < 1e-6);
        assert!((planes[(0, 2, 2)] - 0.1).abs() < 1e-6);
        assert!((planes[(0, 0, 0)] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_multi_channel_passthrough() {
        let adapter = segmentor(vec![vec![1, 3, 4, 4]]);
        assert_eq!(adapter.class_count(), 3);
        let out = ArrayD::zeros(IxDyn(&[1, 3, 4, 4]));
        let PerTileResult::Mask(planes) = adapter.postprocess(vec![out]).unwrap() else {
            panic!("expected mask result");
        };
        assert_eq!(planes.dim(), (3, 4, 4));
    }
}
