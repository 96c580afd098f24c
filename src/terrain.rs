//! Minimal terrain collaborator: dimensions and per-cell height lookup.
//!
//! The pathfinding subsystem only needs enough of the terrain to size its
//! grids and to price height differences into movement costs; everything
//! else about terrain (types, rendering, authoring) lives elsewhere.

use thiserror::Error;

use crate::grid::GridCoord;
use crate::math::Vec2;

#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("height buffer has {got} entries, terrain {width}x{height} needs {expected}")]
    HeightBufferMismatch {
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },
}

/// Heightmapped terrain of `width × height` cells.
#[derive(Clone, Debug)]
pub struct Terrain {
    width: u32,
    height: u32,
    heights: Vec<f32>, // Row-major: [y * width + x]
}

impl Terrain {
    /// Create a completely flat terrain (all heights zero).
    pub fn flat(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            heights: vec![0.0; (width * height) as usize],
        }
    }

    /// Create a terrain from an explicit height buffer.
    pub fn with_heights(width: u32, height: u32, heights: Vec<f32>) -> Result<Self, TerrainError> {
        let expected = (width * height) as usize;
        if heights.len() != expected {
            return Err(TerrainError::HeightBufferMismatch {
                width,
                height,
                expected,
                got: heights.len(),
            });
        }
        Ok(Self {
            width,
            height,
            heights,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Height of the terrain cell containing `coord`, clamped at the borders.
    pub fn height_at(&self, coord: GridCoord) -> f32 {
        let x = coord.x.clamp(0, self.width as i32 - 1) as u32;
        let y = coord.y.clamp(0, self.height as i32 - 1) as u32;
        self.heights[(y * self.width + x) as usize]
    }

    /// Height at a world-space position, using the containing cell.
    pub fn height_at_pos(&self, pos: Vec2) -> f32 {
        self.height_at(GridCoord::new(pos.x.floor() as i32, pos.y.floor() as i32))
    }

    /// Clamp a world-space position into the terrain bounds.
    pub fn clamp_pos(&self, pos: Vec2) -> Vec2 {
        pos.clamp(
            Vec2::ZERO,
            Vec2::new(self.width as f32 - 1.0, self.height as f32 - 1.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_heights_rejects_wrong_buffer_size() {
        let result = Terrain::with_heights(10, 10, vec![0.0; 99]);
        assert!(matches!(
            result,
            Err(TerrainError::HeightBufferMismatch { expected: 100, got: 99, .. })
        ));
    }

    #[test]
    fn height_lookup_clamps_at_borders() {
        let mut heights = vec![0.0; 16];
        heights[15] = 3.5; // cell (3, 3)
        let terrain = Terrain::with_heights(4, 4, heights).unwrap();

        assert_eq!(terrain.height_at(GridCoord::new(3, 3)), 3.5);
        assert_eq!(terrain.height_at(GridCoord::new(7, 7)), 3.5);
        assert_eq!(terrain.height_at(GridCoord::new(-1, -1)), 0.0);
    }

    #[test]
    fn clamp_pos_stays_inside() {
        let terrain = Terrain::flat(10, 10);
        let clamped = terrain.clamp_pos(Vec2::new(-4.0, 22.0));
        assert_eq!(clamped, Vec2::new(0.0, 9.0));
    }
}
