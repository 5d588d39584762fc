//! deepraster - tiled neural-network inference over georeferenced rasters.
//!
//! Large rasters do not fit a model's fixed input, so this crate partitions
//! a processing extent into overlapping tiles, runs per-tile inference
//! through a pluggable [`inference::InferenceEngine`], and stitches the
//! per-tile outputs back into one spatially consistent result: a class
//! mask, a dense value raster, or a deduplicated detection list, all with
//! world coordinates.
//!
//! The pipeline is `extent -> tile grid -> per-tile fetch / preprocess /
//! infer / postprocess -> aggregation -> finalization`. Raster reading,
//! the inference runtime and any UI are collaborators behind traits.

#![warn(missing_docs)]

pub mod channels;
pub mod config;
pub mod constants;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod inference;
pub mod model;
pub mod output;
pub mod processing;
pub mod source;

pub use channels::{ChannelsMapping, ImageChannel};
pub use config::{PipelineConfig, ProcessedArea, ProcessingParameters};
pub use error::{Error, Result};
pub use geometry::{BoundingBox, CoordSpace, CoordinateMapper, WorldRect};
pub use grid::{TileGrid, TileSpec};
pub use model::{ModelAdapter, ModelOutputFormat, PerTileResult};
pub use processing::{FinalResult, MapProcessor, RunOutcome, RunStatus};
pub use source::{InMemoryRaster, PaddingPolicy, RasterSource};
