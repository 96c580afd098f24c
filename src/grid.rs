//! Obstacle grid for footprint-aware occupancy tracking.
//!
//! The grid stores an occupancy counter per cell rather than a plain flag so
//! that overlapping footprints stay blocked until the last entity covering a
//! cell leaves it. Cells may be coarser than terrain cells: one grid cell
//! covers a `ratio × ratio` block of terrain.

use serde::{Deserialize, Serialize};

use crate::math::Vec2;

/// A coordinate in grid space (integer cell indices).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: i32,
    pub y: i32,
}

impl GridCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance to another coordinate.
    pub fn manhattan_distance(&self, other: &GridCoord) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// Euclidean distance to another coordinate.
    pub fn distance(&self, other: &GridCoord) -> f32 {
        let dx = (self.x - other.x) as f32;
        let dy = (self.y - other.y) as f32;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Number of obstacle cells that cover a terrain of the given size at `ratio`.
pub fn cell_dims(terrain_width: u32, terrain_height: u32, ratio: u32) -> (u32, u32) {
    assert!(ratio >= 1, "grid ratio must be at least 1");
    (terrain_width.div_ceil(ratio), terrain_height.div_ceil(ratio))
}

/// Terrain-space coordinates covered by a `size` box centered at `pos`.
///
/// The entity position is the center of its footprint; cells outside the
/// terrain are omitted, so the result may be empty for degenerate inputs.
pub fn footprint_coords(
    pos: Vec2,
    size: Vec2,
    terrain_width: u32,
    terrain_height: u32,
) -> Vec<GridCoord> {
    let min_x = (pos.x - size.x / 2.0).round() as i32;
    let max_x = (pos.x + size.x / 2.0).round() as i32;
    let min_y = (pos.y - size.y / 2.0).round() as i32;
    let max_y = (pos.y + size.y / 2.0).round() as i32;

    let mut coords = Vec::new();
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            if x >= 0 && y >= 0 && x < terrain_width as i32 && y < terrain_height as i32 {
                coords.push(GridCoord::new(x, y));
            }
        }
    }
    coords
}

/// Occupancy grid masking entity footprints over the terrain.
///
/// Owned and mutated exclusively by the path manager; searches only ever read
/// boolean snapshots taken from it.
#[derive(Clone, Debug)]
pub struct ObstacleGrid {
    terrain_width: u32,
    terrain_height: u32,
    ratio: u32,
    cells_wide: u32,
    cells_high: u32,
    cells: Vec<u16>, // Row-major: [y * cells_wide + x]
    epoch: u64,
}

impl ObstacleGrid {
    /// Create an empty grid covering a `terrain_width × terrain_height`
    /// terrain at the given resolution ratio.
    pub fn new(terrain_width: u32, terrain_height: u32, ratio: u32) -> Self {
        let (cells_wide, cells_high) = cell_dims(terrain_width, terrain_height, ratio);
        Self {
            terrain_width,
            terrain_height,
            ratio,
            cells_wide,
            cells_high,
            cells: vec![0; (cells_wide * cells_high) as usize],
            epoch: 0,
        }
    }

    pub fn ratio(&self) -> u32 {
        self.ratio
    }

    pub fn cells_wide(&self) -> u32 {
        self.cells_wide
    }

    pub fn cells_high(&self) -> u32 {
        self.cells_high
    }

    /// Monotonic counter bumped on every mutation. Searches bound against an
    /// older epoch are stale and must be restarted on fresh data.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Replace the grid with an empty one at a new ratio. Any snapshot taken
    /// before this call is invalid.
    pub fn rebuild(&mut self, ratio: u32) {
        let epoch = self.epoch;
        *self = Self::new(self.terrain_width, self.terrain_height, ratio);
        self.epoch = epoch + 1;
    }

    pub fn in_bounds(&self, coord: GridCoord) -> bool {
        coord.x >= 0
            && coord.y >= 0
            && coord.x < self.cells_wide as i32
            && coord.y < self.cells_high as i32
    }

    /// Map a terrain-space position to the obstacle cell containing it.
    pub fn cell_of(&self, pos: Vec2) -> GridCoord {
        GridCoord::new(
            (pos.x.floor() as i32).div_euclid(self.ratio as i32),
            (pos.y.floor() as i32).div_euclid(self.ratio as i32),
        )
    }

    /// Occupancy count of a cell; out-of-bounds cells report 0.
    pub fn occupancy(&self, coord: GridCoord) -> u16 {
        if !self.in_bounds(coord) {
            return 0;
        }
        self.cells[(coord.y as u32 * self.cells_wide + coord.x as u32) as usize]
    }

    pub fn is_blocked(&self, coord: GridCoord) -> bool {
        self.occupancy(coord) > 0
    }

    /// Mark the footprint of an entity at `pos` with size `size` as occupied.
    pub fn stamp(&mut self, pos: Vec2, size: Vec2) {
        self.apply_footprint(pos, size, true);
    }

    /// Remove a previously stamped footprint. Must be paired with a `stamp`
    /// of the same position and size or the counters drift.
    pub fn unstamp(&mut self, pos: Vec2, size: Vec2) {
        self.apply_footprint(pos, size, false);
    }

    fn apply_footprint(&mut self, pos: Vec2, size: Vec2, add: bool) {
        for coord in footprint_coords(pos, size, self.terrain_width, self.terrain_height) {
            let cell = self.cell_of(Vec2::new(coord.x as f32, coord.y as f32));
            let idx = (cell.y as u32 * self.cells_wide + cell.x as u32) as usize;
            if add {
                self.cells[idx] = self.cells[idx].saturating_add(1);
            } else {
                self.cells[idx] = self.cells[idx].saturating_sub(1);
            }
        }
        self.epoch += 1;
    }

    /// Boolean view of the grid suitable for binding to a search.
    pub fn snapshot(&self) -> Vec<bool> {
        self.cells.iter().map(|&c| c > 0).collect()
    }

    /// Boolean view with one entity's own footprint subtracted, so a pathing
    /// entity never treats itself as an obstacle.
    pub fn snapshot_excluding(&self, pos: Vec2, size: Vec2) -> Vec<bool> {
        let mut cells = self.cells.clone();
        for coord in footprint_coords(pos, size, self.terrain_width, self.terrain_height) {
            let cell = self.cell_of(Vec2::new(coord.x as f32, coord.y as f32));
            let idx = (cell.y as u32 * self.cells_wide + cell.x as u32) as usize;
            cells[idx] = cells[idx].saturating_sub(1);
        }
        cells.into_iter().map(|c| c > 0).collect()
    }
}
