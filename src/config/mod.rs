//! Configuration surface consumed by the host UI or CLI.

mod file;
mod types;
mod validate;

pub use file::{load_config, save_config};
pub use types::{PipelineConfig, ProcessedArea, ProcessingParameters};
pub use validate::{validate_config, validate_parameters};
