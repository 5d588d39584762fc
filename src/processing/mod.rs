//! Map processing pipeline: tile scheduling and result aggregation.

pub mod aggregator;
pub mod processor;
pub mod vectorize;

pub use aggregator::{
    DetectionAccumulator, FinalResult, GlobalResult, RasterAccumulator, RasterKind,
    SegmentationResult, WorldDetection,
};
pub use processor::{MapProcessor, RunOutcome, RunStatus, TileFailure};
pub use vectorize::{mask_to_polygons, ring_to_world};
