//! Model adapters.
//!
//! An adapter wraps the black-box [`InferenceEngine`] with the task-specific
//! pre- and post-processing contract: normalize a raw pixel block into the
//! model's input tensor, and turn raw output tensors into a semantic
//! [`PerTileResult`]. One adapter exists per task variant (segmentation,
//! detection, regression, super-resolution).

pub mod detection;
pub mod regression;
pub mod segmentation;
pub mod superres;

pub use detection::{Detection, Detector};
pub use regression::Regressor;
pub use segmentation::Segmentor;
pub use superres::SuperResolver;

use crate::constants::SOURCE_BIT_DEPTH_MAX;
use crate::error::{Error, Result};
use crate::inference::InferenceEngine;
use ndarray::{Array3, Array4, ArrayD};
use serde::{Deserialize, Serialize};

/// How a multi-class model's output is materialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelOutputFormat {
    /// Keep one probability layer per class.
    #[default]
    AllClassesAsSeparateLayers,
    /// Keep only the selected class as a single layer.
    OnlySingleClass {
        /// Index of the class to keep.
        class: usize,
    },
}

/// Task variant an adapter implements, with the facts the aggregator needs
/// to size the global result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Per-pixel class probabilities.
    Segmentation {
        /// Number of probability planes produced per tile.
        classes: usize,
    },
    /// Dense value planes (regression or super-resolution).
    Values {
        /// Number of value planes produced per tile.
        channels: usize,
        /// Spatial output scale relative to the input tile (1 except for
        /// super-resolution).
        scale: usize,
    },
    /// Object detections.
    Detection,
}

/// Semantic result of one tile, owned by the processor until handed to the
/// aggregator.
#[derive(Debug, Clone)]
pub enum PerTileResult {
    /// Class-probability planes, `(classes, height, width)`.
    Mask(Array3<f32>),
    /// Detections in tile-local pixel coordinates.
    Detections(Vec<Detection>),
    /// Dense value planes, `(channels, height, width)`.
    Values(Array3<f32>),
}

/// Pre/post-processing contract around an inference engine.
pub trait ModelAdapter: Send + Sync {
    /// The wrapped engine.
    fn engine(&self) -> &dyn InferenceEngine;

    /// Task variant and output sizing facts. Only meaningful after
    /// [`ModelAdapter::validate`] has passed.
    fn task(&self) -> TaskKind;

    /// Check the engine's declared shapes against the task's contract.
    /// Violations are systemic ([`Error::IncompatibleModel`]).
    fn validate(&self) -> Result<()>;

    /// Convert raw output tensors into the per-tile semantic result.
    fn postprocess(&self, outputs: Vec<ArrayD<f32>>) -> Result<PerTileResult>;

    /// Normalize a raw pixel block into the model input batch: select the
    /// leading model channels, scale into `[0, 1]`, reorder HWC to CHW and
    /// add a batch dimension of one.
    fn preprocess(&self, block: &Array3<u8>) -> Result<Array4<f32>> {
        preprocess_block(block, self.engine().input_channels())
    }

    /// Full per-tile chain: preprocess, infer, postprocess.
    fn process(&self, block: &Array3<u8>) -> Result<PerTileResult> {
        let batch = self.preprocess(block)?;
        let outputs = self
            .engine()
            .infer(&batch)
            .map_err(|e| Error::Inference {
                reason: e.to_string(),
            })?;
        self.postprocess(outputs)
    }
}

/// Shared preprocessing used by all adapters.
#[allow(clippy::cast_lossless)]
pub(crate) fn preprocess_block(block: &Array3<u8>, model_channels: usize) -> Result<Array4<f32>> {
    let (height, width, available) = block.dim();
    if available < model_channels {
        return Err(Error::IncompatibleModel {
            reason: format!(
                "model expects {model_channels} input channels, pixel block has {available}"
            ),
        });
    }
    let mut batch = Array4::<f32>::zeros((1, model_channels, height, width));
    for c in 0..model_channels {
        for y in 0..height {
            for x in 0..width {
                batch[(0, c, y, x)] = f32::from(block[(y, x, c)]) / SOURCE_BIT_DEPTH_MAX;
            }
        }
    }
    Ok(batch)
}

/// Contract check shared by the dense-output adapters: one output of shape
/// `(1, C, H, W)` with a square spatial size.
pub(crate) fn validate_dense_output(engine: &dyn InferenceEngine, task: &str) -> Result<Vec<usize>> {
    let shapes = engine.output_shapes();
    if shapes.len() != 1 {
        return Err(Error::IncompatibleModel {
            reason: format!(
                "{task} model must have exactly 1 output, has {}",
                shapes.len()
            ),
        });
    }
    let shape = &shapes[0];
    if shape.len() != 4 {
        return Err(Error::IncompatibleModel {
            reason: format!(
                "{task} model output should have 4 dimensions (batch, channels, height, width), has {shape:?}"
            ),
        });
    }
    if shape[0] != 1 {
        return Err(Error::IncompatibleModel {
            reason: format!("{task} model can handle only 1-batch outputs, has {shape:?}"),
        });
    }
    if shape[2] != shape[3] {
        return Err(Error::IncompatibleModel {
            reason: format!("{task} model can handle only square output masks, has {shape:?}"),
        });
    }
    Ok(shape.clone())
}

/// Extract the sole output tensor as `(channels, height, width)` planes.
pub(crate) fn dense_output_planes(outputs: Vec<ArrayD<f32>>) -> Result<Array3<f32>> {
    let output = outputs.into_iter().next().ok_or_else(|| Error::Inference {
        reason: "engine returned no output tensors".to_string(),
    })?;
    let shape = output.shape().to_vec();
    if shape.len() != 4 || shape[0] != 1 {
        return Err(Error::Inference {
            reason: format!("unexpected output tensor shape {shape:?}"),
        });
    }
    let planes = output
        .into_shape_with_order((shape[1], shape[2], shape[3]))
        .map_err(|e| Error::Inference {
            reason: format!("failed to reshape output tensor: {e}"),
        })?;
    Ok(planes)
}
