//! CSV detection writer.

use crate::error::{Error, Result};
use crate::output::DetectionWriter;
use crate::processing::WorldDetection;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Writes detections as CSV rows with both pixel and world coordinates.
pub struct CsvDetectionWriter {
    writer: csv::Writer<File>,
    path: PathBuf,
}

impl CsvDetectionWriter {
    /// Create a writer targeting `path`.
    pub fn new(path: &Path) -> Result<Self> {
        let writer = csv::Writer::from_path(path).map_err(|source| Error::CsvWrite {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    fn wrap(&self, source: csv::Error) -> Error {
        Error::CsvWrite {
            path: self.path.clone(),
            source,
        }
    }
}

impl DetectionWriter for CsvDetectionWriter {
    fn write_header(&mut self) -> Result<()> {
        self.writer
            .write_record([
                "px_x_min",
                "px_y_min",
                "px_x_max",
                "px_y_max",
                "world_x_min",
                "world_y_min",
                "world_x_max",
                "world_y_max",
                "class",
                "confidence",
            ])
            .map_err(|e| self.wrap(e))
    }

    fn write_detection(&mut self, detection: &WorldDetection) -> Result<()> {
        self.writer
            .write_record([
                detection.bbox.x_min.to_string(),
                detection.bbox.y_min.to_string(),
                detection.bbox.x_max.to_string(),
                detection.bbox.y_max.to_string(),
                format!("{:.6}", detection.rect.x_min),
                format!("{:.6}", detection.rect.y_min),
                format!("{:.6}", detection.rect.x_max),
                format!("{:.6}", detection.rect.y_max),
                detection.class_id.to_string(),
                format!("{:.4}", detection.confidence),
            ])
            .map_err(|e| self.wrap(e))
    }

    fn finalize(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
