//! Regular XY sampling lattice shared by rasterization, height maps and tiles.

use serde::{Deserialize, Serialize};

use crate::error::{check_step, Result};
use crate::geometry::BoundingBox;

/// Slack applied when converting an extent into a cell count, so that
/// `84.0 / 0.1` still yields 841 samples.
const CELL_SNAP: f64 = 1e-6;

/// Number of samples needed to cover `extent` at `step` spacing.
pub fn cell_count(extent: f64, step: f64) -> usize {
    ((extent / step + CELL_SNAP).floor().max(0.0) as usize).saturating_add(1)
}

/// A rectangular window onto an infinite lattice with spacing `step`.
///
/// Local cell `(ix, iy)` sits at
/// `(origin_x + (x0 + ix) * step, origin_y + (y0 + iy) * step)`, so
/// sub-grids sample exactly the same coordinates as their parent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// X coordinate of lattice index 0.
    pub origin_x: f64,
    /// Y coordinate of lattice index 0.
    pub origin_y: f64,
    /// Lattice spacing.
    pub step: f64,
    /// Lattice X index of the first column.
    pub x0: i64,
    /// Lattice Y index of the first row.
    pub y0: i64,
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
}

impl GridSpec {
    /// Grid covering `bounds` in XY, anchored at `bounds.min`.
    ///
    /// A zero-size axis yields a single row or column.
    pub fn from_bounds(bounds: &BoundingBox, step: f64) -> Result<Self> {
        check_step(step)?;
        bounds.validate()?;
        Ok(Self {
            origin_x: bounds.min.x,
            origin_y: bounds.min.y,
            step,
            x0: 0,
            y0: 0,
            width: cell_count(bounds.width(), step),
            height: cell_count(bounds.height(), step),
        })
    }

    /// Total number of cells, saturating at `usize::MAX`.
    pub fn len(&self) -> usize {
        self.width.saturating_mul(self.height)
    }

    /// Total number of cells, or `None` if it does not fit a `u64`.
    pub fn checked_len(&self) -> Option<u64> {
        (self.width as u64).checked_mul(self.height as u64)
    }

    /// Whether the grid has no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major index of a local cell.
    #[inline]
    pub fn index(&self, ix: usize, iy: usize) -> usize {
        iy * self.width + ix
    }

    /// X coordinate of local column `ix`.
    #[inline]
    pub fn x_at(&self, ix: usize) -> f64 {
        self.origin_x + (self.x0 + ix as i64) as f64 * self.step
    }

    /// Y coordinate of local row `iy`.
    #[inline]
    pub fn y_at(&self, iy: usize) -> f64 {
        self.origin_y + (self.y0 + iy as i64) as f64 * self.step
    }

    /// Nearest lattice index for a world position (may be outside the window).
    #[inline]
    pub fn lattice_of(&self, x: f64, y: f64) -> (i64, i64) {
        (
            ((x - self.origin_x) / self.step).round() as i64,
            ((y - self.origin_y) / self.step).round() as i64,
        )
    }

    /// Local cell containing a world position, using nearest-cell rounding.
    pub fn cell_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (gx, gy) = self.lattice_of(x, y);
        self.local(gx, gy)
    }

    /// Convert a lattice index into a local cell, if inside the window.
    #[inline]
    pub fn local(&self, gx: i64, gy: i64) -> Option<(usize, usize)> {
        let lx = gx - self.x0;
        let ly = gy - self.y0;
        if lx < 0 || ly < 0 || lx >= self.width as i64 || ly >= self.height as i64 {
            None
        } else {
            Some((lx as usize, ly as usize))
        }
    }

    /// A window onto the same lattice covering local columns `xs` and rows `ys`.
    pub fn subgrid(&self, xs: std::ops::Range<usize>, ys: std::ops::Range<usize>) -> Self {
        Self {
            x0: self.x0 + xs.start as i64,
            y0: self.y0 + ys.start as i64,
            width: xs.len(),
            height: ys.len(),
            ..*self
        }
    }

    /// XY footprint of the sample points, with Z copied from `z_source`.
    pub fn bounds(&self, z_source: &BoundingBox) -> BoundingBox {
        let mut b = *z_source;
        b.min.x = self.x_at(0);
        b.min.y = self.y_at(0);
        b.max.x = self.x_at(self.width.saturating_sub(1));
        b.max.y = self.y_at(self.height.saturating_sub(1));
        b
    }
}
