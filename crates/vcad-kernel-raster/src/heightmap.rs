//! Dense height maps built from rasterized point sets.

use serde::{Deserialize, Serialize};

use crate::error::{check_step, RasterError, Result};
use crate::geometry::{BoundingBox, Vec3};
use crate::grid::GridSpec;

/// Rule for combining several points that land in one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregation {
    /// Keep the highest Z (terrain).
    Max,
    /// Keep the lowest Z (tool).
    Min,
}

impl Aggregation {
    /// Whether `candidate` should overwrite `current` (NaN = empty).
    ///
    /// Ordering is strict, so the first of several equal values wins.
    #[inline]
    pub fn replaces(self, current: f64, candidate: f64) -> bool {
        current.is_nan()
            || match self {
                Aggregation::Max => candidate > current,
                Aggregation::Min => candidate < current,
            }
    }
}

/// A dense grid of Z values; empty cells hold no data.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightMap {
    grid: GridSpec,
    cells: Vec<f64>,
}

impl HeightMap {
    /// Create an empty height map over `grid`.
    pub fn empty(grid: GridSpec) -> Self {
        Self {
            grid,
            cells: vec![f64::NAN; grid.len()],
        }
    }

    /// Wrap per-node heights (NaN = no data) produced for `grid`.
    pub fn from_cells(grid: GridSpec, cells: Vec<f64>) -> Result<Self> {
        if cells.len() != grid.len() {
            return Err(RasterError::InvalidBounds(format!(
                "{} cells for a {}x{} grid",
                cells.len(),
                grid.width,
                grid.height
            )));
        }
        Ok(Self { grid, cells })
    }

    /// Build a height map over the bounds of `points` at `step`.
    pub fn from_points(points: &[Vec3], step: f64, aggregation: Aggregation) -> Result<Self> {
        check_step(step)?;
        let bounds = BoundingBox::from_points(points).unwrap_or_else(BoundingBox::zero);
        let grid = GridSpec::from_bounds(&bounds, step)?;
        Ok(Self::from_points_on(points, grid, aggregation))
    }

    /// Build a height map over an explicit grid. Points outside it are dropped.
    pub fn from_points_on(points: &[Vec3], grid: GridSpec, aggregation: Aggregation) -> Self {
        let mut map = Self::empty(grid);
        for p in points {
            if let Some((ix, iy)) = grid.cell_of(p.x, p.y) {
                map.merge(ix, iy, p.z, aggregation);
            }
        }
        map
    }

    /// Combine `z` into a cell using `aggregation`.
    #[inline]
    pub fn merge(&mut self, ix: usize, iy: usize, z: f64, aggregation: Aggregation) {
        let slot = &mut self.cells[iy * self.grid.width + ix];
        if aggregation.replaces(*slot, z) {
            *slot = z;
        }
    }

    /// The sampling grid.
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.grid.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.grid.height
    }

    /// Height at a local cell.
    #[inline]
    pub fn get(&self, ix: usize, iy: usize) -> Option<f64> {
        let z = self.cells[iy * self.grid.width + ix];
        (!z.is_nan()).then_some(z)
    }

    /// Height at a lattice index, `None` outside the map or on empty cells.
    #[inline]
    pub fn get_lattice(&self, gx: i64, gy: i64) -> Option<f64> {
        let (ix, iy) = self.grid.local(gx, gy)?;
        self.get(ix, iy)
    }

    /// Raw cells, row-major, NaN where empty.
    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    /// Take back the cell buffer.
    pub fn into_cells(self) -> Vec<f64> {
        self.cells
    }

    /// Number of cells holding data.
    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|z| !z.is_nan()).count()
    }

    /// The lowest occupied cell as `(ix, iy, z)`; the first one wins ties.
    pub fn lowest_cell(&self) -> Option<(usize, usize, f64)> {
        let mut best: Option<(usize, usize, f64)> = None;
        for iy in 0..self.grid.height {
            for ix in 0..self.grid.width {
                if let Some(z) = self.get(ix, iy) {
                    if best.map_or(true, |(_, _, b)| z < b) {
                        best = Some((ix, iy, z));
                    }
                }
            }
        }
        best
    }
}
