//! Configuration file persistence.

use crate::config::{PipelineConfig, validate_config};
use crate::error::{Error, Result};
use std::path::Path;

/// Load and validate a pipeline configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let config: PipelineConfig =
        toml::from_str(&contents).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
    validate_config(&config)?;
    Ok(config)
}

/// Save a pipeline configuration as TOML.
pub fn save_config(path: &Path, config: &PipelineConfig) -> Result<()> {
    let contents =
        toml::to_string_pretty(config).map_err(|source| Error::ConfigSerialize { source })?;
    std::fs::write(path, contents).map_err(|source| Error::ConfigWrite {
        path: path.to_path_buf(),
        source,
    })
}
