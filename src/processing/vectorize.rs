//! Mask-to-polygon extraction.
//!
//! Turns a finalized class mask into one polygon ring per 8-connected
//! region of a class, using Moore boundary tracing. Rings list boundary
//! pixel coordinates in trace order; interior holes are not extracted.

use crate::geometry::CoordinateMapper;
use ndarray::Array2;

/// Clockwise 8-neighborhood starting west, in (dy, dx) image coordinates.
const DIRS: [(i64, i64); 8] = [
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
];

/// Extract one boundary ring per 8-connected region of `class` in the
/// mask. Ring coordinates are `(x, y)` mask pixels in trace order.
pub fn mask_to_polygons(mask: &Array2<u8>, class: u8) -> Vec<Vec<(i64, i64)>> {
    let (height, width) = mask.dim();
    let mut visited = Array2::from_elem((height, width), false);
    let mut polygons = Vec::new();

    for y in 0..height {
        for x in 0..width {
            if visited[(y, x)] || mask[(y, x)] != class {
                continue;
            }
            let ring = trace_boundary(mask, class, (y as i64, x as i64))
                .into_iter()
                .map(|(py, px)| (px, py))
                .collect();
            polygons.push(ring);
            flood_fill(mask, class, (y, x), &mut visited);
        }
    }
    polygons
}

/// Map a pixel-space ring to world coordinates (pixel centers).
/// `extent_origin` is the full-image pixel of the mask's top-left corner.
pub fn ring_to_world(
    ring: &[(i64, i64)],
    mapper: &CoordinateMapper,
    extent_origin: (i64, i64),
) -> Vec<(f64, f64)> {
    ring.iter()
        .map(|&(x, y)| mapper.pixel_to_world((x + extent_origin.0, y + extent_origin.1)))
        .collect()
}

/// Moore boundary tracing from the region's first pixel in scan order.
fn trace_boundary(mask: &Array2<u8>, class: u8, start: (i64, i64)) -> Vec<(i64, i64)> {
    let (height, width) = mask.dim();
    let inside = |p: (i64, i64)| {
        p.0 >= 0
            && p.1 >= 0
            && p.0 < height as i64
            && p.1 < width as i64
            && mask[(p.0 as usize, p.1 as usize)] == class
    };
    let step =
        |cur: (i64, i64), backtrack: (i64, i64)| -> Option<((i64, i64), (i64, i64))> {
            let bidx = DIRS
                .iter()
                .position(|d| (cur.0 + d.0, cur.1 + d.1) == backtrack)
                .unwrap_or(0);
            for k in 1..=DIRS.len() {
                let idx = (bidx + k) % DIRS.len();
                let next = (cur.0 + DIRS[idx].0, cur.1 + DIRS[idx].1);
                if inside(next) {
                    let prev_idx = (idx + DIRS.len() - 1) % DIRS.len();
                    let new_backtrack = (cur.0 + DIRS[prev_idx].0, cur.1 + DIRS[prev_idx].1);
                    return Some((next, new_backtrack));
                }
            }
            None
        };

    // The scan reaches the region top-first, left-first, so the west
    // neighbor is outside the region.
    let start_backtrack = (start.0, start.1 - 1);
    let mut ring = vec![start];
    let Some((mut cur, mut backtrack)) = step(start, start_backtrack) else {
        return ring; // isolated pixel
    };

    let second = cur;
    let limit = 4 * height * width + 8;
    while ring.len() < limit {
        if cur == start {
            // Jacob's criterion: stop when the trace would repeat the
            // first move out of the start pixel.
            match step(cur, backtrack) {
                Some((next, _)) if next == second => break,
                Some(_) => {}
                None => break,
            }
        }
        ring.push(cur);
        let Some((next, new_backtrack)) = step(cur, backtrack) else {
            break;
        };
        cur = next;
        backtrack = new_backtrack;
    }
    ring
}

/// Mark one 8-connected region as visited.
fn flood_fill(mask: &Array2<u8>, class: u8, start: (usize, usize), visited: &mut Array2<bool>) {
    let (height, width) = mask.dim();
    let mut stack = vec![start];
    visited[start] = true;
    while let Some((y, x)) = stack.pop() {
        for (dy, dx) in DIRS {
            let ny = y as i64 + dy;
            let nx = x as i64 + dx;
            if ny < 0 || nx < 0 || ny >= height as i64 || nx >= width as i64 {
                continue;
            }
            let n = (ny as usize, nx as usize);
            if !visited[n] && mask[n] == class {
                visited[n] = true;
                stack.push(n);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> Array2<u8> {
        let height = rows.len();
        let width = rows[0].len();
        Array2::from_shape_fn((height, width), |(y, x)| {
            u8::from(rows[y].as_bytes()[x] == b'#')
        })
    }

    #[test]
    fn test_single_pixel() {
        let mask = mask_from(&["....", ".#..", "....", "...."]);
        let rings = mask_to_polygons(&mask, 1);
        assert_eq!(rings, vec![vec![(1, 1)]]);
    }

    #[test]
    fn test_square_ring() {
        let mask = mask_from(&["....", ".##.", ".##.", "...."]);
        let rings = mask_to_polygons(&mask, 1);
        assert_eq!(rings.len(), 1);
        let ring = &rings[0];
        assert_eq!(ring.len(), 4);
        for p in [(1, 1), (2, 1), (1, 2), (2, 2)] {
            assert!(ring.contains(&(p.0, p.1)), "missing {p:?}");
        }
    }

    #[test]
    fn test_two_components() {
        let mask = mask_from(&["#...", "....", "...#"]);
        let rings = mask_to_polygons(&mask, 1);
        assert_eq!(rings.len(), 2);
    }

    #[test]
    fn test_interior_not_in_ring() {
        let mask = mask_from(&["#####", "#####", "#####"]);
        let rings = mask_to_polygons(&mask, 1);
        assert_eq!(rings.len(), 1);
        // Center pixel of the 3x5 block is interior.
        assert!(!rings[0].contains(&(2, 1)));
        assert_eq!(rings[0].len(), 12);
    }

    #[test]
    fn test_diagonal_pixels_are_one_region() {
        let mask = mask_from(&["#..", ".#.", "..#"]);
        let rings = mask_to_polygons(&mask, 1);
        assert_eq!(rings.len(), 1);
    }

    #[test]
    fn test_ring_to_world() {
        let mapper = CoordinateMapper::new((10.0, 20.0), (1.0, 1.0), 100, 100).unwrap();
        let world = ring_to_world(&[(0, 0), (1, 0)], &mapper, (5, 5));
        assert!((world[0].0 - 15.5).abs() < 1e-9);
        assert!((world[0].1 - 14.5).abs() < 1e-9);
        assert!((world[1].0 - 16.5).abs() < 1e-9);
    }
}
