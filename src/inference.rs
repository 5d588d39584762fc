//! Inference engine interface.
//!
//! The engine is a black box from the pipeline's perspective: a batch
//! tensor goes in, output tensors come out, synchronously and without
//! observable state between calls. Concrete backends (ONNX Runtime, remote
//! services, test stubs) live outside this crate.

use ndarray::{Array4, ArrayD};

/// Error type engines report; the pipeline wraps it per tile.
pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// Black-box model runtime.
///
/// Implementations must be callable from multiple worker threads
/// (`Send + Sync`); an engine that is not internally re-entrant should
/// serialize calls itself.
pub trait InferenceEngine: Send + Sync {
    /// Declared input tensor shape, batch first: `[1, C, H, W]`.
    fn input_shape(&self) -> &[usize];

    /// Declared shapes of all output tensors, batch first.
    fn output_shapes(&self) -> &[Vec<usize>];

    /// Run the model on one preprocessed batch.
    fn infer(&self, batch: &Array4<f32>) -> Result<Vec<ArrayD<f32>>, EngineError>;

    /// Number of input channels the model consumes.
    fn input_channels(&self) -> usize {
        self.input_shape().get(1).copied().unwrap_or(0)
    }

    /// Spatial size of the model's square input.
    fn input_size(&self) -> usize {
        self.input_shape().get(2).copied().unwrap_or(0)
    }
}
