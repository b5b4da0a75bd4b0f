//! 2D uniform grid for triangle lookup by XY position.
//!
//! Triangles are bucketed by their projected bounding box. The cell size is
//! derived from the triangle count so that the average bucket holds roughly
//! `triangles_per_cell` entries regardless of mesh size.

use crate::geometry::Triangle;

/// Upper bound on cells per axis.
const MAX_CELLS_PER_AXIS: usize = 2048;

/// Uniform 2D bucket grid over a triangle set.
#[derive(Debug, Clone)]
pub struct TriangleGrid {
    min_x: f64,
    min_y: f64,
    cell_w: f64,
    cell_h: f64,
    nx: usize,
    ny: usize,
    cells: Vec<Vec<u32>>,
}

impl TriangleGrid {
    /// Bucket `triangles` into a grid sized for `triangles_per_cell`.
    pub fn build(triangles: &[Triangle], triangles_per_cell: f64) -> Self {
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for tri in triangles {
            min_x = min_x.min(tri.bbox_min_x);
            min_y = min_y.min(tri.bbox_min_y);
            max_x = max_x.max(tri.bbox_max_x);
            max_y = max_y.max(tri.bbox_max_y);
        }

        if triangles.is_empty() {
            return Self {
                min_x: 0.0,
                min_y: 0.0,
                cell_w: 1.0,
                cell_h: 1.0,
                nx: 1,
                ny: 1,
                cells: vec![Vec::new()],
            };
        }

        let w = max_x - min_x;
        let h = max_y - min_y;
        let target_cells = (triangles.len() as f64 / triangles_per_cell.max(1.0))
            .ceil()
            .max(1.0);

        // Square cells when possible; a flat axis collapses to one cell.
        let side = if w > 0.0 && h > 0.0 {
            (w * h / target_cells).sqrt()
        } else {
            w.max(h) / target_cells
        };
        let axis_cells = |extent: f64| -> usize {
            if extent > 0.0 && side > 0.0 {
                ((extent / side).ceil() as usize).clamp(1, MAX_CELLS_PER_AXIS)
            } else {
                1
            }
        };
        let nx = axis_cells(w);
        let ny = axis_cells(h);
        let cell_w = if w > 0.0 { w / nx as f64 } else { 1.0 };
        let cell_h = if h > 0.0 { h / ny as f64 } else { 1.0 };

        let mut grid = Self {
            min_x,
            min_y,
            cell_w,
            cell_h,
            nx,
            ny,
            cells: vec![Vec::new(); nx * ny],
        };

        for (idx, tri) in triangles.iter().enumerate() {
            let (x0, y0) = grid.clamped_cell(tri.bbox_min_x, tri.bbox_min_y);
            let (x1, y1) = grid.clamped_cell(tri.bbox_max_x, tri.bbox_max_y);
            for iy in y0..=y1 {
                for ix in x0..=x1 {
                    grid.cells[iy * nx + ix].push(idx as u32);
                }
            }
        }

        grid
    }

    fn clamped_cell(&self, x: f64, y: f64) -> (usize, usize) {
        let fx = ((x - self.min_x) / self.cell_w).floor();
        let fy = ((y - self.min_y) / self.cell_h).floor();
        (
            (fx.max(0.0) as usize).min(self.nx - 1),
            (fy.max(0.0) as usize).min(self.ny - 1),
        )
    }

    /// Indices of triangles whose bounding box may contain `(x, y)`.
    ///
    /// Positions outside the grid by more than one cell return nothing.
    pub fn candidates(&self, x: f64, y: f64) -> &[u32] {
        let fx = (x - self.min_x) / self.cell_w;
        let fy = (y - self.min_y) / self.cell_h;
        if fx < -1.0 || fy < -1.0 || fx > self.nx as f64 + 1.0 || fy > self.ny as f64 + 1.0 {
            return &[];
        }
        let (ix, iy) = self.clamped_cell(x, y);
        &self.cells[iy * self.nx + ix]
    }

    /// Grid dimensions in cells.
    pub fn dims(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    /// Largest bucket size.
    pub fn max_bucket(&self) -> usize {
        self.cells.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Mean bucket size over all cells.
    pub fn mean_bucket(&self) -> f64 {
        let total: usize = self.cells.iter().map(Vec::len).sum();
        total as f64 / self.cells.len() as f64
    }
}
