//! Regression model adapter.

use crate::error::Result;
use crate::inference::InferenceEngine;
use crate::model::{
    ModelAdapter, PerTileResult, TaskKind, dense_output_planes, validate_dense_output,
};
use ndarray::ArrayD;

/// Adapter for dense per-pixel regression models.
///
/// Output planes carry raw model values. The spatial output may be smaller
/// than the input tile (e.g. 512 in, 484 out); the aggregator treats such
/// outputs as a centered crop of the tile.
pub struct Regressor {
    engine: Box<dyn InferenceEngine>,
}

impl Regressor {
    /// Wrap an engine as a regression model.
    pub fn new(engine: Box<dyn InferenceEngine>) -> Self {
        Self { engine }
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

impl ModelAdapter for Regressor {
    fn engine(&self) -> &dyn InferenceEngine {
        self.engine.as_ref()
    }

    fn task(&self) -> TaskKind {
        TaskKind::Values {
            channels: self.channel_count(),
            scale: 1,
        }
    }

    fn validate(&self) -> Result<()> {
        validate_dense_output(self.engine.as_ref(), "regression")?;
        Ok(())
    }

    fn postprocess(&self, outputs: Vec<ArrayD<f32>>) -> Result<PerTileResult> {
        Ok(PerTileResult::Values(dense_output_planes(outputs)?))
    }
}
