//! GeoJSON detection writer.

use crate::error::{Error, Result};
use crate::output::DetectionWriter;
use crate::processing::WorldDetection;
use serde_json::json;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Writes detections as a GeoJSON `FeatureCollection` of axis-aligned
/// polygons in world coordinates.
pub struct GeoJsonDetectionWriter {
    path: PathBuf,
    features: Vec<serde_json::Value>,
}

impl GeoJsonDetectionWriter {
    /// Create a writer targeting `path`. The file is written on
    /// [`DetectionWriter::finalize`].
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            features: Vec::new(),
        }
    }
}

impl DetectionWriter for GeoJsonDetectionWriter {
    fn write_header(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_detection(&mut self, detection: &WorldDetection) -> Result<()> {
        let r = detection.rect;
        // Closed ring, counter-clockwise.
        let ring = json!([
            [r.x_min, r.y_min],
            [r.x_max, r.y_min],
            [r.x_max, r.y_max],
            [r.x_min, r.y_max],
            [r.x_min, r.y_min],
        ]);
        self.features.push(json!({
            "type": "Feature",
            "geometry": {
                "type": "Polygon",
                "coordinates": [ring],
            },
            "properties": {
                "class": detection.class_id,
                "confidence": detection.confidence,
            },
        }));
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        let collection = json!({
            "type": "FeatureCollection",
            "features": self.features,
        });
        let file = File::create(&self.path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &collection).map_err(|source| {
            Error::JsonWrite {
                path: self.path.clone(),
                source,
            }
        })
    }
}
