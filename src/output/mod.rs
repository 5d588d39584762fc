//! Output writers, progress reporting and the run report.

pub mod csv;
pub mod geojson;
pub mod progress;
pub mod report;

pub use self::csv::CsvDetectionWriter;
pub use self::geojson::GeoJsonDetectionWriter;
pub use self::progress::{CancelToken, NullProgress, ProgressBarSink, ProgressSink};
pub use self::report::RunReport;

use crate::error::Result;
use crate::processing::WorldDetection;

/// Common interface of detection output writers.
pub trait DetectionWriter {
    /// Write the format's header, if any.
    fn write_header(&mut self) -> Result<()>;

    /// Write one detection.
    fn write_detection(&mut self, detection: &WorldDetection) -> Result<()>;

    /// Flush and close the output.
    fn finalize(&mut self) -> Result<()>;
}

/// Write a full detection list through any writer.
pub fn write_detections(
    writer: &mut dyn DetectionWriter,
    detections: &[WorldDetection],
) -> Result<()> {
    writer.write_header()?;
    for detection in detections {
        writer.write_detection(detection)?;
    }
    writer.finalize()
}
