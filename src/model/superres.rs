//! Super-resolution model adapter.

use crate::error::{Error, Result};
use crate::inference::InferenceEngine;
use crate::model::{
    ModelAdapter, PerTileResult, TaskKind, dense_output_planes, validate_dense_output,
};
use ndarray::ArrayD;

/// Adapter for models that upscale each tile by an integer factor.
pub struct SuperResolver {
    engine: Box<dyn InferenceEngine>,
}

impl SuperResolver {
    /// Wrap an engine as a super-resolution model.
    pub fn new(engine: Box<dyn InferenceEngine>) -> Self {
        Self { engine }
    }

    /// Spatial upscale factor, derived from the declared shapes.
    pub fn scale_factor(&self) -> usize {
        let input = self.engine.input_size();
        let output = self
            .engine
            .output_shapes()
            .first()
            .and_then(|s| s.get(2))
            .copied()
            .unwrap_or(0);
        if input == 0 { 0 } else { output / input }
    }

    /// Number of value planes the model produces.
    pub fn channel_count(&self) -> usize {
        self.engine
            .output_shapes()
            .first()
            .and_then(|s| s.get(1))
            .copied()
            .unwrap_or(0)
    }
}

impl ModelAdapter for SuperResolver {
    fn engine(&self) -> &dyn InferenceEngine {
        self.engine.as_ref()
    }

    fn task(&self) -> TaskKind {
        TaskKind::Values {
            channels: self.channel_count(),
            scale: self.scale_factor(),
        }
    }

    fn validate(&self) -> Result<()> {
        let shape = validate_dense_output(self.engine.as_ref(), "super-resolution")?;
        let input = self.engine.input_size();
        let output = shape[2];
        if input == 0 || output < input || output % input != 0 {
            return Err(Error::IncompatibleModel {
                reason: format!(
                    "super-resolution output size {output} must be an integer multiple of input size {input}"
                ),
            });
        }
        Ok(())
    }

    fn postprocess(&self, outputs: Vec<ArrayD<f32>>) -> Result<PerTileResult> {
        Ok(PerTileResult::Values(dense_output_planes(outputs)?))
    }
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

    #[test]
    fn test_scale_factor() {
        let adapter = SuperResolver::new(Box::new(StubEngine {
            input: vec![1, 3, 256, 256],
            outputs: vec![vec![1, 3, 512, 512]],
        }));
        assert!(adapter.validate().is_ok());
        assert_eq!(adapter.scale_factor(), 2);
        assert_eq!(
            adapter.task(),
            TaskKind::Values {
                channels: 3,
                scale: 2
            }
        );
    }

    #[test]
    fn test_non_integer_scale_rejected() {
        let adapter = SuperResolver::new(Box::new(StubEngine {
            input: vec![1, 3, 256, 256],
            outputs: vec![vec![1, 3, 300, 300]],
        }));
        assert!(adapter.validate().is_err());

        let shrink = SuperResolver::new(Box::new(StubEngine {
            input: vec![1, 3, 256, 256],
            outputs: vec![vec![1, 3, 128, 128]],
        }));
        assert!(shrink.validate().is_err());
    }
}
