//! Tile grid generation.
//!
//! Partitions a processing extent into overlapping, model-sized tiles in
//! row-major order. Edge tiles keep the full tile dimensions (the pixel
//! reader pads the out-of-raster part) and record which tile-local region
//! actually falls inside the extent, so the aggregator never blends padded
//! pixels into the result.

use crate::error::{Error, Result};
use crate::geometry::{BoundingBox, CoordSpace};

/// One tile of the processing grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSpec {
    /// Sequential index in row-major generation order.
    pub index: usize,
    /// Full-image pixel x of the tile's top-left corner.
    pub x: i64,
    /// Full-image pixel y of the tile's top-left corner.
    pub y: i64,
    /// Tile width and height in pixels (model input size).
    pub size: usize,
    /// Tile-local region that lies inside the processing extent.
    pub valid: BoundingBox,
    /// Whether part of the tile falls outside the extent.
    pub is_partial: bool,
}

impl TileSpec {
    /// The tile's full footprint in full-image coordinates.
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::new(
            self.x,
            self.y,
            self.x + self.size as i64,
            self.y + self.size as i64,
            CoordSpace::FullImage,
        )
    }

    /// The tile's valid region in full-image coordinates.
    pub fn valid_bbox_full(&self) -> BoundingBox {
        self.valid.tile_local_to_full((self.x, self.y))
    }

    /// Full-image pixel coordinate of the tile's center.
    #[allow(clippy::cast_precision_loss)]
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.size as f64 / 2.0,
            self.y as f64 + self.size as f64 / 2.0,
        )
    }
}

/// Row-major grid of overlapping tiles covering a processing extent.
///
/// Generation is lazy and deterministic: the same extent and parameters
/// always yield the identical sequence, which keeps progress reporting
/// stable and makes interrupted runs resumable.
#[derive(Debug, Clone)]
pub struct TileGrid {
    extent: BoundingBox,
    tile_size: usize,
    stride: usize,
    tiles_x: usize,
    tiles_y: usize,
}

impl TileGrid {
    /// Build a grid over `extent` (full-image space) with the given tile
    /// size and overlap in pixels.
    pub fn new(extent: BoundingBox, tile_size: usize, overlap_px: usize) -> Result<Self> {
        if extent.space != CoordSpace::FullImage {
            return Err(Error::InvalidParameter {
                message: "processing extent must be in full-image space".to_string(),
            });
        }
        if extent.is_empty() {
            return Err(Error::InvalidParameter {
                message: "processing extent is empty".to_string(),
            });
        }
        if tile_size == 0 {
            return Err(Error::InvalidParameter {
                message: "tile size must be positive".to_string(),
            });
        }
        if overlap_px >= tile_size {
            return Err(Error::InvalidParameter {
                message: format!(
                    "overlap ({overlap_px} px) must be smaller than tile size ({tile_size} px)"
                ),
            });
        }
        let stride = tile_size - overlap_px;
        let tiles_x = extent.width().div_ceil(stride);
        let tiles_y = extent.height().div_ceil(stride);
        Ok(Self {
            extent,
            tile_size,
            stride,
            tiles_x,
            tiles_y,
        })
    }

    /// The processing extent the grid covers.
    pub fn extent(&self) -> &BoundingBox {
        &self.extent
    }

    /// Distance between consecutive tile origins.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of tile columns.
    pub fn tiles_x(&self) -> usize {
        self.tiles_x
    }

    /// Number of tile rows.
    pub fn tiles_y(&self) -> usize {
        self.tiles_y
    }

    /// Total number of tiles.
    pub fn tile_count(&self) -> usize {
        self.tiles_x * self.tiles_y
    }

    /// Tile at the given grid column and row.
    pub fn tile_at(&self, col: usize, row: usize) -> TileSpec {
        let index = row * self.tiles_x + col;
        let x = self.extent.x_min + (col * self.stride) as i64;
        let y = self.extent.y_min + (row * self.stride) as i64;
        let bbox = BoundingBox::new(
            x,
            y,
            x + self.tile_size as i64,
            y + self.tile_size as i64,
            CoordSpace::FullImage,
        );
        // Never empty: every origin lies inside the extent.
        let valid_full = bbox.intersect(&self.extent).unwrap_or(bbox);
        let valid = BoundingBox::new(
            valid_full.x_min - x,
            valid_full.y_min - y,
            valid_full.x_max - x,
            valid_full.y_max - y,
            CoordSpace::TileLocal,
        );
        let is_partial = valid.width() != self.tile_size || valid.height() != self.tile_size;
        TileSpec {
            index,
            x,
            y,
            size: self.tile_size,
            valid,
            is_partial,
        }
    }

    /// Lazy row-major iterator over all tiles. Restartable: each call
    /// yields the identical sequence.
    pub fn iter(&self) -> impl Iterator<Item = TileSpec> + '_ {
        (0..self.tile_count()).map(|i| self.tile_at(i % self.tiles_x, i / self.tiles_x))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn extent(w: i64, h: i64) -> BoundingBox {
        BoundingBox::new(0, 0, w, h, CoordSpace::FullImage)
    }

    #[test]
    fn test_four_tiles_no_overlap() {
        let grid = TileGrid::new(extent(1024, 1024), 512, 0).unwrap();
        assert_eq!(grid.tile_count(), 4);
        let origins: Vec<(i64, i64)> = grid.iter().map(|t| (t.x, t.y)).collect();
        assert_eq!(origins, vec![(0, 0), (512, 0), (0, 512), (512, 512)]);
        assert!(grid.iter().all(|t| !t.is_partial));
    }

    #[test]
    fn test_nine_tiles_with_overlap() {
        let grid = TileGrid::new(extent(1024, 1024), 512, 128).unwrap();
        assert_eq!(grid.stride(), 384);
        assert_eq!(grid.tiles_x(), 3);
        assert_eq!(grid.tiles_y(), 3);
        assert_eq!(grid.tile_count(), 9);

        // Last column extends past the extent and is partial.
        let last = grid.tile_at(2, 0);
        assert_eq!(last.x, 768);
        assert!(last.is_partial);
        assert_eq!(last.valid.width(), 256);
        assert_eq!(last.valid.height(), 512);
    }

    #[test]
    fn test_stride_must_be_positive() {
        let err = TileGrid::new(extent(1024, 1024), 512, 512).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
        assert!(TileGrid::new(extent(1024, 1024), 512, 600).is_err());
    }

    #[test]
    fn test_empty_extent_rejected() {
        let err = TileGrid::new(extent(0, 100), 512, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    #[test]
    fn test_extent_smaller_than_tile() {
        let grid = TileGrid::new(extent(100, 60), 512, 0).unwrap();
        assert_eq!(grid.tile_count(), 1);
        let tile = grid.tile_at(0, 0);
        assert!(tile.is_partial);
        assert_eq!(tile.size, 512);
        assert_eq!(tile.valid.width(), 100);
        assert_eq!(tile.valid.height(), 60);
    }

    #[test]
    fn test_union_of_valid_regions_covers_extent() {
        let grid = TileGrid::new(extent(300, 200), 64, 16).unwrap();
        let mut covered = vec![false; 300 * 200];
        for tile in grid.iter() {
            let v = tile.valid_bbox_full();
            for y in v.y_min..v.y_max {
                for x in v.x_min..v.x_max {
                    covered[(y * 300 + x) as usize] = true;
                }
            }
        }
        assert!(covered.iter().all(|&c| c));
    }

    #[test]
    fn test_iteration_is_restartable() {
        let grid = TileGrid::new(extent(1000, 700), 256, 32).unwrap();
        let first: Vec<TileSpec> = grid.iter().collect();
        let second: Vec<TileSpec> = grid.iter().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), grid.tile_count());
        let indices: Vec<usize> = first.iter().map(|t| t.index).collect();
        assert_eq!(indices, (0..grid.tile_count()).collect::<Vec<_>>());
    }

    #[test]
    fn test_offset_extent_tile_origins() {
        let ext = BoundingBox::new(100, 50, 400, 350, CoordSpace::FullImage);
        let grid = TileGrid::new(ext, 128, 0).unwrap();
        let first = grid.tile_at(0, 0);
        assert_eq!((first.x, first.y), (100, 50));
        let next = grid.tile_at(1, 1);
        assert_eq!((next.x, next.y), (228, 178));
    }
}
