//! Mapping from raster channels to model input channels.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// One source channel of the raster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageChannel {
    /// A standalone raster band, numbered from 1 as data sources do.
    StandaloneBand {
        /// Band number (1-based).
        band: usize,
        /// Semantic channel name (e.g. "red").
        name: String,
    },
    /// One byte of a packed composite pixel (e.g. ARGB32), numbered from 0.
    CompositeByte {
        /// Byte index within the packed pixel (0-based).
        byte: usize,
        /// Semantic channel name.
        name: String,
    },
}

impl ImageChannel {
    /// Semantic name of the channel.
    pub fn name(&self) -> &str {
        match self {
            Self::StandaloneBand { name, .. } | Self::CompositeByte { name, .. } => name,
        }
    }

    /// Zero-based index of the channel in the source's channel axis.
    pub fn source_index(&self) -> usize {
        match self {
            Self::StandaloneBand { band, .. } => band.saturating_sub(1),
            Self::CompositeByte { byte, .. } => *byte,
        }
    }
}

/// Ordered list of source channels assembled into the model input tensor.
///
/// When the mapping provides more channels than the model consumes, the
/// leading channels in mapping order are used and the rest ignored. Fewer
/// channels than the model expects is an [`Error::IncompatibleModel`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelsMapping {
    channels: Vec<ImageChannel>,
}

impl ChannelsMapping {
    /// Create a mapping from an ordered channel list.
    pub fn new(channels: Vec<ImageChannel>) -> Self {
        Self { channels }
    }

    /// Standard red/green/blue mapping over the raster's first three bands.
    pub fn rgb() -> Self {
        Self::new(vec![
            ImageChannel::StandaloneBand {
                band: 1,
                name: "red".to_string(),
            },
            ImageChannel::StandaloneBand {
                band: 2,
                name: "green".to_string(),
            },
            ImageChannel::StandaloneBand {
                band: 3,
                name: "blue".to_string(),
            },
        ])
    }

    /// Number of mapped channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Iterate over the mapped channels in order.
    pub fn iter(&self) -> std::slice::Iter<'_, ImageChannel> {
        self.channels.iter()
    }

    /// Check the mapping against the model's expected input channel count.
    pub fn validate_for_model(&self, model_channels: usize) -> Result<()> {
        if self.channels.len() < model_channels {
            return Err(Error::IncompatibleModel {
                reason: format!(
                    "model expects {model_channels} input channels but the mapping provides only {}",
                    self.channels.len()
                ),
            });
        }
        Ok(())
    }
}
