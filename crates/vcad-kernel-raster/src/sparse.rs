//! Sparse tool representation: occupied cells as offsets from the tool tip.

use serde::{Deserialize, Serialize};

use crate::error::{RasterError, Result};
use crate::heightmap::HeightMap;

/// One occupied tool cell relative to the tip cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToolOffset {
    /// Column offset in grid cells.
    pub dx: i32,
    /// Row offset in grid cells.
    pub dy: i32,
    /// Height above the tip (never negative).
    pub dz: f64,
}

/// Compacted tool: only the occupied cells of a tool height map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseTool {
    offsets: Vec<ToolOffset>,
    tip_z: f64,
    step: f64,
    dense_width: usize,
    dense_height: usize,
}

impl SparseTool {
    /// Compact a tool height map, discarding empty cells.
    ///
    /// The tip is the lowest cell (first in row-major order on ties) and is
    /// always present as offset `(0, 0, 0)`.
    pub fn from_height_map(map: &HeightMap) -> Result<Self> {
        let (tip_x, tip_y, tip_z) = map.lowest_cell().ok_or(RasterError::EmptyTool)?;

        let mut offsets = Vec::with_capacity(map.occupied_count());
        for iy in 0..map.height() {
            for ix in 0..map.width() {
                if let Some(z) = map.get(ix, iy) {
                    offsets.push(ToolOffset {
                        dx: ix as i32 - tip_x as i32,
                        dy: iy as i32 - tip_y as i32,
                        dz: z - tip_z,
                    });
                }
            }
        }

        Ok(Self {
            offsets,
            tip_z,
            step: map.grid().step,
            dense_width: map.width(),
            dense_height: map.height(),
        })
    }

    /// Occupied cells.
    pub fn offsets(&self) -> &[ToolOffset] {
        &self.offsets
    }

    /// Number of occupied cells.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Always false: a tool contributes at least its tip.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Absolute Z of the tip in the tool's own frame.
    pub fn tip_z(&self) -> f64 {
        self.tip_z
    }

    /// Grid step the tool was sampled at.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Cell count of the tool's bounding rectangle.
    pub fn dense_cell_count(&self) -> usize {
        self.dense_width * self.dense_height
    }

    /// Largest `|dx|` and `|dy|` over the occupied cells.
    pub fn extent_cells(&self) -> (u32, u32) {
        self.offsets.iter().fold((0, 0), |(mx, my), o| {
            (mx.max(o.dx.unsigned_abs()), my.max(o.dy.unsigned_abs()))
        })
    }

    /// Half-width of the tool across the Y axis in world units.
    pub fn radius_y(&self) -> f64 {
        self.extent_cells().1 as f64 * self.step
    }

    /// Largest reach from the tip along either axis in world units.
    pub fn reach(&self) -> f64 {
        let (ex, ey) = self.extent_cells();
        ex.max(ey) as f64 * self.step
    }
}

/// Compact a tool height map into its sparse form.
pub fn build_sparse_tool(map: &HeightMap) -> Result<SparseTool> {
    SparseTool::from_height_map(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{triangles_from_flat, Vec3};
    use crate::heightmap::Aggregation;
    use crate::rasterize::{rasterize, FilterMode, RasterOptions};
    use crate::shapes;

    #[test]
    fn test_empty_tool_rejected() {
        let map = HeightMap::from_points(&[], 1.0, Aggregation::Min).unwrap();
        assert_eq!(SparseTool::from_height_map(&map), Err(RasterError::EmptyTool));
    }

    #[test]
    fn test_offsets_relative_to_tip() {
        let pts = [
            Vec3::new(0.0, 0.0, 3.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(2.0, 0.0, 4.0),
        ];
        let map = HeightMap::from_points(&pts, 1.0, Aggregation::Min).unwrap();
        let tool = build_sparse_tool(&map).unwrap();
        assert_eq!(tool.tip_z(), 1.0);
        assert_eq!(
            tool.offsets(),
            &[
                ToolOffset { dx: -1, dy: 0, dz: 2.0 },
                ToolOffset { dx: 0, dy: 0, dz: 0.0 },
                ToolOffset { dx: 1, dy: 0, dz: 3.0 },
            ]
        );
        assert_eq!(tool.extent_cells(), (1, 0));
    }

    #[test]
    fn test_ball_tool_is_sparse_and_has_tip() {
        let tris = triangles_from_flat(&shapes::ball_end_mill(6.0, 24)).unwrap();
        let raster = rasterize(&tris, 0.25, FilterMode::Tool, None, &RasterOptions::default()).unwrap();
        let map = HeightMap::from_points(&raster.points, 0.25, Aggregation::Min).unwrap();
        let tool = build_sparse_tool(&map).unwrap();

        assert!(tool.len() < tool.dense_cell_count());
        assert!(tool.offsets().iter().any(|o| o.dx == 0 && o.dy == 0 && o.dz == 0.0));
        assert!(tool.offsets().iter().all(|o| o.dz >= 0.0));
        // Tip of a ball sits near its centre.
        let (ex, ey) = tool.extent_cells();
        assert!((ex as i32 - 12).abs() <= 1);
        assert!((ey as i32 - 12).abs() <= 1);
        assert!((tool.radius_y() - 3.0).abs() <= 0.26);
    }
}
