//! Error types for deepraster.

/// Result type alias for deepraster operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for deepraster.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid tile, overlap or threshold configuration. Raised before any
    /// tile is processed.
    #[error("invalid parameter: {message}")]
    InvalidParameter {
        /// Description of the parameter violation.
        message: String,
    },

    /// The model's shape or output contract is violated. Systemic: aborts
    /// the whole run.
    #[error("incompatible model: {reason}")]
    IncompatibleModel {
        /// Description of the contract violation.
        reason: String,
    },

    /// Data source failed to deliver pixels for one tile. Tolerated: the
    /// tile is marked failed and processing continues.
    #[error("failed to fetch pixels: {reason}")]
    TileFetch {
        /// Description of the fetch failure.
        reason: String,
    },

    /// Inference failed for one tile. Tolerated by default, configurable to
    /// be fatal.
    #[error("inference failed: {reason}")]
    Inference {
        /// Description of the inference failure.
        reason: String,
    },

    /// A coordinate fell outside the raster's pixel range in strict mode.
    /// Programming error, always fatal.
    #[error("coordinate ({x}, {y}) outside raster of {width}x{height} px")]
    OutOfBounds {
        /// Offending pixel x coordinate.
        x: i64,
        /// Offending pixel y coordinate.
        y: i64,
        /// Raster width in pixels.
        width: usize,
        /// Raster height in pixels.
        height: usize,
    },

    /// Failed to read configuration file.
    #[error("failed to read config file '{path}'")]
    ConfigRead {
        /// Path to the config file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("failed to parse config file '{path}'")]
    ConfigParse {
        /// Path to the config file.
        path: std::path::PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// Failed to write configuration file.
    #[error("failed to write config file '{path}'")]
    ConfigWrite {
        /// Path to the config file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize configuration.
    #[error("failed to serialize config")]
    ConfigSerialize {
        /// Underlying serialization error.
        #[source]
        source: toml::ser::Error,
    },

    /// Failed to write CSV output.
    #[error("failed to write CSV output '{path}'")]
    CsvWrite {
        /// Path to the CSV file.
        path: std::path::PathBuf,
        /// Underlying CSV error.
        #[source]
        source: csv::Error,
    },

    /// Failed to write JSON output.
    #[error("failed to write JSON output '{path}'")]
    JsonWrite {
        /// Path to the JSON file.
        path: std::path::PathBuf,
        /// Underlying serialization error.
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// Whether this error aborts a whole processing run, as opposed to
    /// failing a single tile.
    pub fn is_systemic(&self) -> bool {
        !matches!(self, Self::TileFetch { .. } | Self::Inference { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_errors_are_not_systemic() {
        let err = Error::TileFetch {
            reason: "read failed".to_string(),
        };
        assert!(!err.is_systemic());

        let err = Error::Inference {
            reason: "engine failure".to_string(),
        };
        assert!(!err.is_systemic());
    }

    #[test]
    fn test_model_and_parameter_errors_are_systemic() {
        let err = Error::IncompatibleModel {
            reason: "batch size 4".to_string(),
        };
        assert!(err.is_systemic());

        let err = Error::InvalidParameter {
            message: "stride must be positive".to_string(),
        };
        assert!(err.is_systemic());
    }
}
