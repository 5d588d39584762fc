//! Raster data source interface and boundary padding.
//!
//! Tiles at the raster edge still need full model-sized pixel blocks; the
//! reader fills the out-of-raster part according to a [`PaddingPolicy`].
//! Blocks are `(height, width, channels)` arrays of raw 8-bit samples in
//! the order given by the [`ChannelsMapping`].

use crate::channels::{ChannelsMapping, ImageChannel};
use crate::error::{Error, Result};
use crate::geometry::{BoundingBox, CoordSpace};
use ndarray::{Array3, s};
use serde::{Deserialize, Serialize};

/// How out-of-raster pixels of an edge tile are filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingPolicy {
    /// Fill with zeros.
    Zero,
    /// Repeat the nearest edge pixel.
    Replicate,
    /// Mirror the image at the edge (edge pixel included).
    #[default]
    Reflect,
}

/// Pixel supplier for a georeferenced raster.
pub trait RasterSource: Send + Sync {
    /// Raster width in pixels.
    fn width(&self) -> usize;

    /// Raster height in pixels.
    fn height(&self) -> usize;

    /// Read a block fully inside the raster. `bbox` is in full-image space;
    /// the result is `(height, width, channels)` with channels ordered as
    /// in `channels`.
    fn read_block(&self, bbox: &BoundingBox, channels: &ChannelsMapping) -> Result<Array3<u8>>;

    /// Read a block that may extend past the raster, padding the outside
    /// part per `policy`. Fails with [`Error::OutOfBounds`] when the block
    /// does not intersect the raster at all.
    fn read_padded(
        &self,
        bbox: &BoundingBox,
        channels: &ChannelsMapping,
        policy: PaddingPolicy,
    ) -> Result<Array3<u8>> {
        let raster = BoundingBox::new(
            0,
            0,
            self.width() as i64,
            self.height() as i64,
            CoordSpace::FullImage,
        );
        let Some(inner) = bbox.intersect(&raster) else {
            return Err(Error::OutOfBounds {
                x: bbox.x_min,
                y: bbox.y_min,
                width: self.width(),
                height: self.height(),
            });
        };
        let block = self.read_block(&inner, channels)?;
        if inner == *bbox {
            return Ok(block);
        }
        let off_y = (inner.y_min - bbox.y_min) as usize;
        let off_x = (inner.x_min - bbox.x_min) as usize;
        Ok(pad_block(
            &block,
            (bbox.height(), bbox.width()),
            (off_y, off_x),
            policy,
        ))
    }
}

/// Embed an in-bounds block into a larger target, filling the margin per
/// the padding policy.
fn pad_block(
    block: &Array3<u8>,
    target: (usize, usize),
    offset: (usize, usize),
    policy: PaddingPolicy,
) -> Array3<u8> {
    let (inner_h, inner_w, bands) = block.dim();
    let (out_h, out_w) = target;
    let (off_y, off_x) = offset;

    let mut out = Array3::<u8>::zeros((out_h, out_w, bands));
    out.slice_mut(s![off_y..off_y + inner_h, off_x..off_x + inner_w, ..])
        .assign(block);

    if policy == PaddingPolicy::Zero {
        return out;
    }

    for y in 0..out_h {
        for x in 0..out_w {
            let inside = y >= off_y && y < off_y + inner_h && x >= off_x && x < off_x + inner_w;
            if inside {
                continue;
            }
            let rel_y = y as i64 - off_y as i64;
            let rel_x = x as i64 - off_x as i64;
            let (src_y, src_x) = match policy {
                PaddingPolicy::Replicate => (
                    rel_y.clamp(0, inner_h as i64 - 1),
                    rel_x.clamp(0, inner_w as i64 - 1),
                ),
                PaddingPolicy::Reflect => (
                    reflect_index(rel_y, inner_h as i64),
                    reflect_index(rel_x, inner_w as i64),
                ),
                PaddingPolicy::Zero => unreachable!(),
            };
            for c in 0..bands {
                out[(y, x, c)] = block[(src_y as usize, src_x as usize, c)];
            }
        }
    }
    out
}

/// Symmetric reflection of an index into `[0, n)`: `-1 -> 0`, `n -> n - 1`.
fn reflect_index(i: i64, n: i64) -> i64 {
    let period = 2 * n;
    let mut j = i.rem_euclid(period);
    if j >= n {
        j = period - 1 - j;
    }
    j
}

/// Raster held entirely in memory as `(height, width, channels)` samples.
///
/// Backs unit and integration tests, and small rasters that fit in RAM.
#[derive(Debug, Clone)]
pub struct InMemoryRaster {
    data: Array3<u8>,
}

impl InMemoryRaster {
    /// Wrap an existing `(height, width, channels)` array.
    pub fn new(data: Array3<u8>) -> Self {
        Self { data }
    }

    /// Number of channels stored.
    pub fn channel_count(&self) -> usize {
        self.data.dim().2
    }
}

impl RasterSource for InMemoryRaster {
    fn width(&self) -> usize {
        self.data.dim().1
    }

    fn height(&self) -> usize {
        self.data.dim().0
    }

    fn read_block(&self, bbox: &BoundingBox, channels: &ChannelsMapping) -> Result<Array3<u8>> {
        if bbox.space != CoordSpace::FullImage {
            return Err(Error::TileFetch {
                reason: "block extent must be in full-image space".to_string(),
            });
        }
        let raster = BoundingBox::new(
            0,
            0,
            self.width() as i64,
            self.height() as i64,
            CoordSpace::FullImage,
        );
        if bbox.intersect(&raster) != Some(*bbox) {
            return Err(Error::OutOfBounds {
                x: bbox.x_min,
                y: bbox.y_min,
                width: self.width(),
                height: self.height(),
            });
        }
        for channel in channels.iter() {
            if channel.source_index() >= self.channel_count() {
                return Err(Error::TileFetch {
                    reason: format!(
                        "channel '{}' maps to source index {} but the raster has {} channels",
                        channel.name(),
                        channel.source_index(),
                        self.channel_count()
                    ),
                });
            }
        }

        let indices: Vec<usize> = channels.iter().map(ImageChannel::source_index).collect();
        let view = self.data.slice(s![
            bbox.y_min as usize..bbox.y_max as usize,
            bbox.x_min as usize..bbox.x_max as usize,
            ..
        ]);
        let out = Array3::from_shape_fn(
            (bbox.height(), bbox.width(), indices.len()),
            |(y, x, c)| view[(y, x, indices[c])],
        );
        Ok(out)
    }
}
