//! Coordinate spaces and transforms.
//!
//! Three spaces exist in a processing run: world (georeferenced) coordinates,
//! pixel coordinates of the full raster, and tile-local pixel coordinates.
//! Every [`BoundingBox`] carries its [`CoordSpace`] tag so boxes from
//! different spaces cannot be combined silently.

use crate::error::{Error, Result};

/// Pixel coordinate space a bounding box is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordSpace {
    /// Relative to a single tile's top-left corner.
    TileLocal,
    /// Relative to the full raster's top-left corner.
    FullImage,
}

/// Axis-aligned integer pixel rectangle, half-open (`x_max`/`y_max`
/// exclusive), tagged with its coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    /// Left edge (inclusive).
    pub x_min: i64,
    /// Top edge (inclusive).
    pub y_min: i64,
    /// Right edge (exclusive).
    pub x_max: i64,
    /// Bottom edge (exclusive).
    pub y_max: i64,
    /// Coordinate space the box lives in.
    pub space: CoordSpace,
}

impl BoundingBox {
    /// Create a bounding box from its edges.
    pub fn new(x_min: i64, y_min: i64, x_max: i64, y_max: i64, space: CoordSpace) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
            space,
        }
    }

    /// Width in pixels; zero for degenerate boxes.
    pub fn width(&self) -> usize {
        usize::try_from((self.x_max - self.x_min).max(0)).unwrap_or(0)
    }

    /// Height in pixels; zero for degenerate boxes.
    pub fn height(&self) -> usize {
        usize::try_from((self.y_max - self.y_min).max(0)).unwrap_or(0)
    }

    /// Whether the box covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.x_max <= self.x_min || self.y_max <= self.y_min
    }

    /// Covered area in pixels.
    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Intersection with another box in the same space. `None` when the
    /// boxes do not overlap or their spaces differ.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        if self.space != other.space {
            return None;
        }
        let out = Self::new(
            self.x_min.max(other.x_min),
            self.y_min.max(other.y_min),
            self.x_max.min(other.x_max),
            self.y_max.min(other.y_max),
            self.space,
        );
        if out.is_empty() { None } else { Some(out) }
    }

    /// Intersection-over-union with another box in the same space. Zero for
    /// disjoint boxes or mismatched spaces.
    pub fn iou(&self, other: &Self) -> f64 {
        let Some(inter) = self.intersect(other) else {
            return 0.0;
        };
        let inter_area = inter.area();
        let union = self.area() + other.area() - inter_area;
        if union == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            inter_area as f64 / union as f64
        }
    }

    /// Shift the box by an offset without changing its space tag.
    pub fn translated(&self, dx: i64, dy: i64) -> Self {
        Self::new(
            self.x_min + dx,
            self.y_min + dy,
            self.x_max + dx,
            self.y_max + dy,
            self.space,
        )
    }

    /// Re-express a tile-local box in full-image coordinates given the
    /// tile's full-image origin.
    pub fn tile_local_to_full(&self, tile_origin: (i64, i64)) -> Self {
        debug_assert_eq!(self.space, CoordSpace::TileLocal);
        let mut out = self.translated(tile_origin.0, tile_origin.1);
        out.space = CoordSpace::FullImage;
        out
    }
}

/// Axis-aligned world-coordinate rectangle. Distinct from [`BoundingBox`]
/// so pixel and world rectangles cannot be confused.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WorldRect {
    /// Western edge.
    pub x_min: f64,
    /// Southern edge.
    pub y_min: f64,
    /// Eastern edge.
    pub x_max: f64,
    /// Northern edge.
    pub y_max: f64,
}

impl WorldRect {
    /// Create a world rectangle from its edges.
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Extent width in world units.
    pub fn width(&self) -> f64 {
        (self.x_max - self.x_min).max(0.0)
    }

    /// Extent height in world units.
    pub fn height(&self) -> f64 {
        (self.y_max - self.y_min).max(0.0)
    }
}

/// Converts between full-raster pixel coordinates and world coordinates
/// for a north-up raster.
///
/// `pixel_to_world` maps a pixel to its *center* world coordinate; the
/// floor-based inverse therefore round-trips exactly for integer pixel
/// coordinates.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateMapper {
    origin_x: f64,
    origin_y: f64,
    pixel_size_x: f64,
    pixel_size_y: f64,
    width: usize,
    height: usize,
}

impl CoordinateMapper {
    /// Create a mapper from the raster's georeference.
    ///
    /// `origin` is the world coordinate of the raster's top-left corner,
    /// `pixel_size` the positive size of one pixel in world units per axis.
    pub fn new(
        origin: (f64, f64),
        pixel_size: (f64, f64),
        width: usize,
        height: usize,
    ) -> Result<Self> {
        if pixel_size.0 <= 0.0 || pixel_size.1 <= 0.0 {
            return Err(Error::InvalidParameter {
                message: format!(
                    "pixel size must be positive, got ({}, {})",
                    pixel_size.0, pixel_size.1
                ),
            });
        }
        if width == 0 || height == 0 {
            return Err(Error::InvalidParameter {
                message: format!("raster must be non-empty, got {width}x{height} px"),
            });
        }
        Ok(Self {
            origin_x: origin.0,
            origin_y: origin.1,
            pixel_size_x: pixel_size.0,
            pixel_size_y: pixel_size.1,
            width,
            height,
        })
    }

    /// Raster width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Raster height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// The full raster as a full-image bounding box.
    pub fn raster_bbox(&self) -> BoundingBox {
        BoundingBox::new(
            0,
            0,
            self.width as i64,
            self.height as i64,
            CoordSpace::FullImage,
        )
    }

    /// The full raster as a world rectangle.
    pub fn raster_world_rect(&self) -> WorldRect {
        self.pixel_bbox_to_world_rect(&self.raster_bbox())
    }

    /// World coordinate of a pixel's center.
    #[allow(clippy::cast_precision_loss)]
    pub fn pixel_to_world(&self, pixel: (i64, i64)) -> (f64, f64) {
        (
            self.origin_x + (pixel.0 as f64 + 0.5) * self.pixel_size_x,
            self.origin_y - (pixel.1 as f64 + 0.5) * self.pixel_size_y,
        )
    }

    /// World coordinate of a pixel's center, failing when the pixel lies
    /// outside the raster.
    pub fn pixel_to_world_strict(&self, pixel: (i64, i64)) -> Result<(f64, f64)> {
        self.check_bounds(pixel)?;
        Ok(self.pixel_to_world(pixel))
    }

    /// Pixel containing a world coordinate. No bounds check.
    #[allow(clippy::cast_possible_truncation)]
    pub fn world_to_pixel(&self, world: (f64, f64)) -> (i64, i64) {
        (
            ((world.0 - self.origin_x) / self.pixel_size_x).floor() as i64,
            ((self.origin_y - world.1) / self.pixel_size_y).floor() as i64,
        )
    }

    /// Pixel containing a world coordinate, failing when it falls outside
    /// the raster.
    pub fn world_to_pixel_strict(&self, world: (f64, f64)) -> Result<(i64, i64)> {
        let pixel = self.world_to_pixel(world);
        self.check_bounds(pixel)?;
        Ok(pixel)
    }

    /// Re-express a tile-local pixel coordinate in full-image coordinates.
    pub fn tile_local_to_full(tile_origin: (i64, i64), local: (i64, i64)) -> (i64, i64) {
        (tile_origin.0 + local.0, tile_origin.1 + local.1)
    }

    /// Smallest pixel bounding box covering a world rectangle, clipped to
    /// the raster.
    #[allow(clippy::cast_possible_truncation)]
    pub fn world_rect_to_pixel_bbox(&self, rect: &WorldRect) -> BoundingBox {
        let x_min = ((rect.x_min - self.origin_x) / self.pixel_size_x).floor() as i64;
        let x_max = ((rect.x_max - self.origin_x) / self.pixel_size_x).ceil() as i64;
        let y_min = ((self.origin_y - rect.y_max) / self.pixel_size_y).floor() as i64;
        let y_max = ((self.origin_y - rect.y_min) / self.pixel_size_y).ceil() as i64;
        BoundingBox::new(
            x_min.clamp(0, self.width as i64),
            y_min.clamp(0, self.height as i64),
            x_max.clamp(0, self.width as i64),
            y_max.clamp(0, self.height as i64),
            CoordSpace::FullImage,
        )
    }

    /// World rectangle spanned by a full-image pixel bounding box (pixel
    /// outer corners, not centers).
    #[allow(clippy::cast_precision_loss)]
    pub fn pixel_bbox_to_world_rect(&self, bbox: &BoundingBox) -> WorldRect {
        debug_assert_eq!(bbox.space, CoordSpace::FullImage);
        WorldRect::new(
            self.origin_x + bbox.x_min as f64 * self.pixel_size_x,
            self.origin_y - bbox.y_max as f64 * self.pixel_size_y,
            self.origin_x + bbox.x_max as f64 * self.pixel_size_x,
            self.origin_y - bbox.y_min as f64 * self.pixel_size_y,
        )
    }

    fn check_bounds(&self, pixel: (i64, i64)) -> Result<()> {
        if pixel.0 < 0
            || pixel.1 < 0
            || pixel.0 >= self.width as i64
            || pixel.1 >= self.height as i64
        {
            return Err(Error::OutOfBounds {
                x: pixel.0,
                y: pixel.1,
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}
