//! Tile planning
//!
//! Covers a frame with overlapping square tiles so that small or distant
//! text gets enough pixels per glyph. Overlap lets a word cut by one tile
//! boundary be read whole by the neighbouring tile.

use serde::{Deserialize, Serialize};

/// Smallest tile edge the planner will use
pub const MIN_TILE_SIZE: u32 = 64;

/// Largest accepted overlap ratio
pub const MAX_OVERLAP_RATIO: f32 = 0.9;

/// Default tile edge in pixels
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Default fraction of a tile shared with its neighbour
pub const DEFAULT_OVERLAP_RATIO: f32 = 0.2;

/// Pixel rectangle inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Tile {
    /// Exclusive right edge
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }
}

/// Tile size and overlap
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TilingOptions {
    /// Desired tile edge in pixels, clamped to `[64, max(width, height)]`
    pub tile_size: u32,
    /// Fraction of a tile shared with its neighbour, clamped to `[0, 0.9]`
    pub overlap_ratio: f32,
}

impl Default for TilingOptions {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            overlap_ratio: DEFAULT_OVERLAP_RATIO,
        }
    }
}

/// Plan the tiles covering a `frame_width` x `frame_height` frame.
///
/// Tiles come out row by row, top to bottom and left to right. The result is
/// deterministic, every pixel lies in at least one tile and no tile crosses
/// the frame edge. An empty frame yields no tiles.
pub fn plan_tiles(frame_width: u32, frame_height: u32, options: &TilingOptions) -> Vec<Tile> {
    if frame_width == 0 || frame_height == 0 {
        return Vec::new();
    }

    let tile_size = options
        .tile_size
        .max(MIN_TILE_SIZE)
        .min(frame_width.max(frame_height));
    let overlap = if options.overlap_ratio.is_finite() {
        options.overlap_ratio.clamp(0.0, MAX_OVERLAP_RATIO)
    } else {
        0.0
    };
    let step = ((f64::from(tile_size) * (1.0 - f64::from(overlap))).floor() as u32).max(1);

    let xs = axis_offsets(frame_width, tile_size, step);
    let ys = axis_offsets(frame_height, tile_size, step);

    let mut tiles = Vec::with_capacity(xs.len() * ys.len());
    for &y in &ys {
        for &x in &xs {
            tiles.push(Tile {
                x,
                y,
                width: tile_size.min(frame_width - x),
                height: tile_size.min(frame_height - y),
            });
        }
    }
    tiles
}

/// Start offsets along one axis. The last offset is pinned so its tile ends
/// exactly at the far edge.
fn axis_offsets(length: u32, tile_size: u32, step: u32) -> Vec<u32> {
    if length <= tile_size {
        return vec![0];
    }

    let last = length - tile_size;
    let mut offsets = vec![0];
    let mut offset = 0;
    while offset < last {
        offset = offset.saturating_add(step).min(last);
        if offsets.last() != Some(&offset) {
            offsets.push(offset);
        }
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(tile_size: u32, overlap_ratio: f32) -> TilingOptions {
        TilingOptions {
            tile_size,
            overlap_ratio,
        }
    }

    fn assert_covers(width: u32, height: u32, tiles: &[Tile]) {
        for tile in tiles {
            assert!(tile.width >= 1 && tile.height >= 1);
            assert!(tile.right() <= width, "{:?} exceeds width {}", tile, width);
            assert!(tile.bottom() <= height, "{:?} exceeds height {}", tile, height);
        }
        for py in 0..height {
            for px in 0..width {
                assert!(
                    tiles.iter().any(|t| t.contains(px, py)),
                    "pixel ({}, {}) not covered in {}x{}",
                    px,
                    py,
                    width,
                    height
                );
            }
        }
    }

    #[test]
    fn test_degenerate_input_is_empty() {
        assert!(plan_tiles(0, 720, &TilingOptions::default()).is_empty());
        assert!(plan_tiles(1280, 0, &TilingOptions::default()).is_empty());
    }

    #[test]
    fn test_hd_frame_offsets_reach_edges() {
        let tiles = plan_tiles(1280, 720, &options(384, 0.2));

        let mut xs: Vec<u32> = tiles.iter().map(|t| t.x).collect();
        xs.sort_unstable();
        xs.dedup();
        let mut ys: Vec<u32> = tiles.iter().map(|t| t.y).collect();
        ys.sort_unstable();
        ys.dedup();

        assert_eq!(xs, vec![0, 307, 614, 896]);
        assert_eq!(ys, vec![0, 307, 336]);
        assert!(tiles.iter().any(|t| t.x == 0));
        assert!(tiles.iter().any(|t| t.right() == 1280));
        assert!(tiles.iter().any(|t| t.y == 0));
        assert!(tiles.iter().any(|t| t.bottom() == 720));
        assert_eq!(tiles.len(), 12);
    }

    #[test]
    fn test_coverage_across_sizes() {
        let cases = [
            (1, 1, 512, 0.2),
            (63, 200, 64, 0.0),
            (200, 63, 64, 0.5),
            (300, 170, 100, 0.25),
            (257, 129, 128, 0.9),
            (640, 480, 2000, 0.2),
        ];
        for (w, h, size, overlap) in cases {
            let tiles = plan_tiles(w, h, &options(size, overlap));
            assert!(!tiles.is_empty());
            assert_covers(w, h, &tiles);
        }
    }

    #[test]
    fn test_deterministic() {
        let opts = options(384, 0.2);
        assert_eq!(plan_tiles(1920, 1080, &opts), plan_tiles(1920, 1080, &opts));
    }

    #[test]
    fn test_small_frame_single_tile() {
        let tiles = plan_tiles(320, 240, &options(512, 0.2));
        assert_eq!(
            tiles,
            vec![Tile {
                x: 0,
                y: 0,
                width: 320,
                height: 240
            }]
        );
    }

    #[test]
    fn test_tile_size_clamped_to_minimum() {
        let tiles = plan_tiles(256, 64, &options(8, 0.0));
        assert!(tiles.iter().all(|t| t.width == 64));
        assert_eq!(tiles.len(), 4);
    }

    #[test]
    fn test_overlap_clamped_and_offsets_unique() {
        let tiles = plan_tiles(200, 64, &options(64, 5.0));
        let xs: Vec<u32> = tiles.iter().map(|t| t.x).collect();
        let mut unique = xs.clone();
        unique.dedup();
        assert_eq!(xs, unique);
        // step = floor(64 * 0.1) = 6
        assert_eq!(xs[1], 6);
        assert_eq!(*xs.last().unwrap(), 136);
    }

    #[test]
    fn test_nan_overlap_means_no_overlap() {
        let tiles = plan_tiles(256, 64, &options(64, f32::NAN));
        let xs: Vec<u32> = tiles.iter().map(|t| t.x).collect();
        assert_eq!(xs, vec![0, 64, 128, 192]);
    }
}
