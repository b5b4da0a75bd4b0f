//! Collision search: how far can the tool drop at each sample?
//!
//! At a sample the tool tip sits on a terrain lattice node. Every occupied
//! tool cell `(dx, dy, dz)` looks up the terrain under it; the tool may sit
//! no lower than `terrainZ - dz` for any of them, so the safe height is the
//! maximum of that expression. Samples with no terrain under any tool cell
//! take the caller's out-of-bounds floor.
//!
//! Samples are taken at every `x_step`-th column and `y_step`-th row of the
//! terrain grid, starting at its first node.

use std::ops::Range;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use vcad_kernel_raster::{HeightMap, RasterError, SparseTool};

use crate::error::{Result, ToolpathError};

/// Dense grid of safe tool heights, one scanline per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPath {
    /// Samples per scanline.
    pub points_per_line: usize,
    /// Number of scanlines.
    pub num_scanlines: usize,
    /// Row-major Z values.
    pub path_data: Vec<f64>,
}

impl ToolPath {
    /// Z at `(column, scanline)`.
    pub fn get(&self, column: usize, scanline: usize) -> Option<f64> {
        if column >= self.points_per_line || scanline >= self.num_scanlines {
            return None;
        }
        self.path_data.get(scanline * self.points_per_line + column).copied()
    }

    /// One scanline, `None` past the last.
    pub fn scanline(&self, index: usize) -> Option<&[f64]> {
        if index >= self.num_scanlines {
            return None;
        }
        let start = index * self.points_per_line;
        self.path_data.get(start..start + self.points_per_line)
    }

    /// Largest absolute difference to `other`, `None` if the shapes differ.
    pub fn max_abs_diff(&self, other: &ToolPath) -> Option<f64> {
        if self.points_per_line != other.points_per_line
            || self.num_scanlines != other.num_scanlines
        {
            return None;
        }
        Some(
            self.path_data
                .iter()
                .zip(&other.path_data)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max),
        )
    }
}

/// Collision search implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    /// Every cell of the tool's bounding rectangle.
    Dense,
    /// Occupied tool cells only.
    Sparse,
    /// Sparse search per overlapping tile.
    Tiled,
}

/// Tool kept as its full bounding rectangle, empty cells included.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseTool {
    width: usize,
    height: usize,
    tip_x: usize,
    tip_y: usize,
    /// Height above the tip per cell, NaN where empty.
    dz: Vec<f64>,
    step: f64,
}

impl DenseTool {
    /// Re-express a tool height map relative to its lowest cell.
    pub fn from_height_map(map: &HeightMap) -> Result<Self> {
        let (tip_x, tip_y, tip_z) = map.lowest_cell().ok_or(RasterError::EmptyTool)?;
        Ok(Self {
            width: map.width(),
            height: map.height(),
            tip_x,
            tip_y,
            dz: map.cells().iter().map(|z| z - tip_z).collect(),
            step: map.grid().step,
        })
    }

    /// Cells in the bounding rectangle.
    pub fn cell_count(&self) -> usize {
        self.dz.len()
    }
}

/// Per-sample collision kernel.
pub trait DropKernel: Sync {
    /// Safe tip height at terrain lattice node `(gx, gy)`.
    fn drop_at(&self, terrain: &HeightMap, gx: i64, gy: i64) -> Option<f64>;

    /// Grid step the tool was sampled at.
    fn tool_step(&self) -> f64;
}

impl DropKernel for SparseTool {
    #[inline]
    fn drop_at(&self, terrain: &HeightMap, gx: i64, gy: i64) -> Option<f64> {
        let mut best: Option<f64> = None;
        for o in self.offsets() {
            if let Some(z) = terrain.get_lattice(gx + o.dx as i64, gy + o.dy as i64) {
                let h = z - o.dz;
                if best.map_or(true, |b| h > b) {
                    best = Some(h);
                }
            }
        }
        best
    }

    fn tool_step(&self) -> f64 {
        self.step()
    }
}

impl DropKernel for DenseTool {
    #[inline]
    fn drop_at(&self, terrain: &HeightMap, gx: i64, gy: i64) -> Option<f64> {
        let mut best: Option<f64> = None;
        for ty in 0..self.height {
            let dy = ty as i64 - self.tip_y as i64;
            for tx in 0..self.width {
                let dz = self.dz[ty * self.width + tx];
                if dz.is_nan() {
                    continue;
                }
                let dx = tx as i64 - self.tip_x as i64;
                if let Some(z) = terrain.get_lattice(gx + dx, gy + dy) {
                    let h = z - dz;
                    if best.map_or(true, |b| h > b) {
                        best = Some(h);
                    }
                }
            }
        }
        best
    }

    fn tool_step(&self) -> f64 {
        self.step
    }
}

/// Sample layout over a terrain grid of `width x height` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLayout {
    /// Terrain columns.
    pub width: usize,
    /// Terrain rows.
    pub height: usize,
    /// Column stride.
    pub x_step: usize,
    /// Row stride.
    pub y_step: usize,
}

impl SampleLayout {
    /// Validate strides and build a layout.
    pub fn new(width: usize, height: usize, x_step: usize, y_step: usize) -> Result<Self> {
        if x_step == 0 || y_step == 0 {
            return Err(ToolpathError::InvalidInput(format!(
                "sample strides must be at least 1, got x={x_step} y={y_step}"
            )));
        }
        Ok(Self {
            width,
            height,
            x_step,
            y_step,
        })
    }

    /// Samples per scanline.
    pub fn points_per_line(&self) -> usize {
        self.width.div_ceil(self.x_step)
    }

    /// Scanline count.
    pub fn num_scanlines(&self) -> usize {
        self.height.div_ceil(self.y_step)
    }

    /// Sample columns whose terrain column lies in `cells`.
    pub fn columns_in(&self, cells: &Range<usize>) -> Range<usize> {
        cells.start.div_ceil(self.x_step)..cells.end.div_ceil(self.x_step)
    }

    /// Scanlines whose terrain row lies in `cells`.
    pub fn rows_in(&self, cells: &Range<usize>) -> Range<usize> {
        cells.start.div_ceil(self.y_step)..cells.end.div_ceil(self.y_step)
    }
}

pub(crate) fn check_tool_step(kernel: &impl DropKernel, terrain: &HeightMap) -> Result<()> {
    let (a, b) = (kernel.tool_step(), terrain.grid().step);
    if (a - b).abs() > 1e-9 * a.abs().max(b.abs()) {
        return Err(ToolpathError::InvalidInput(format!(
            "tool sampled at step {a} but terrain at step {b}"
        )));
    }
    Ok(())
}

/// Fill `out` for sample `rows x cols` of `layout`, looking terrain up in `terrain`.
///
/// `out` is laid out row-major with `cols.len()` entries per row. Lattice
/// coordinates of samples are taken relative to `lattice_origin`, the
/// lattice index of terrain column 0 / row 0 of the full domain.
#[allow(clippy::too_many_arguments)]
pub(crate) fn fill_region(
    terrain: &HeightMap,
    kernel: &impl DropKernel,
    layout: &SampleLayout,
    lattice_origin: (i64, i64),
    rows: Range<usize>,
    cols: Range<usize>,
    out_of_bounds_z: f64,
    parallel: bool,
    out: &mut [f64],
) {
    let width = cols.len();
    if width == 0 {
        return;
    }
    let do_row = |j: usize, row: &mut [f64]| {
        let gy = lattice_origin.1 + ((rows.start + j) * layout.y_step) as i64;
        for (k, slot) in row.iter_mut().enumerate() {
            let gx = lattice_origin.0 + ((cols.start + k) * layout.x_step) as i64;
            *slot = kernel.drop_at(terrain, gx, gy).unwrap_or(out_of_bounds_z);
        }
    };
    if parallel {
        out.par_chunks_mut(width)
            .enumerate()
            .for_each(|(j, row)| do_row(j, row));
    } else {
        out.chunks_mut(width)
            .enumerate()
            .for_each(|(j, row)| do_row(j, row));
    }
}

/// Run `kernel` over every sample of `terrain`.
pub fn generate(
    terrain: &HeightMap,
    kernel: &impl DropKernel,
    x_step: usize,
    y_step: usize,
    out_of_bounds_z: f64,
    parallel: bool,
) -> Result<ToolPath> {
    check_tool_step(kernel, terrain)?;
    let layout = SampleLayout::new(terrain.width(), terrain.height(), x_step, y_step)?;
    let ppl = layout.points_per_line();
    let lines = layout.num_scanlines();
    let mut path_data = vec![out_of_bounds_z; ppl * lines];
    let grid = terrain.grid();
    fill_region(
        terrain,
        kernel,
        &layout,
        (grid.x0, grid.y0),
        0..lines,
        0..ppl,
        out_of_bounds_z,
        parallel,
        &mut path_data,
    );
    Ok(ToolPath {
        points_per_line: ppl,
        num_scanlines: lines,
        path_data,
    })
}

/// Dense search: iterate the tool's whole bounding rectangle per sample.
pub fn generate_dense(
    terrain: &HeightMap,
    tool: &DenseTool,
    x_step: usize,
    y_step: usize,
    out_of_bounds_z: f64,
    parallel: bool,
) -> Result<ToolPath> {
    generate(terrain, tool, x_step, y_step, out_of_bounds_z, parallel)
}

/// Sparse search: iterate occupied tool cells only.
pub fn generate_sparse(
    terrain: &HeightMap,
    tool: &SparseTool,
    x_step: usize,
    y_step: usize,
    out_of_bounds_z: f64,
    parallel: bool,
) -> Result<ToolPath> {
    generate(terrain, tool, x_step, y_step, out_of_bounds_z, parallel)
}

/// Sample the lattice row `gy` of `terrain` every `x_step` columns.
pub fn scanline(
    terrain: &HeightMap,
    tool: &SparseTool,
    gy: i64,
    x_step: usize,
    out_of_bounds_z: f64,
    out: &mut Vec<f64>,
) {
    let grid = terrain.grid();
    let count = grid.width.div_ceil(x_step.max(1));
    out.extend((0..count).map(|k| {
        let gx = grid.x0 + (k * x_step) as i64;
        tool.drop_at(terrain, gx, gy).unwrap_or(out_of_bounds_z)
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use vcad_kernel_raster::{Aggregation, Vec3};

    fn flat_terrain(n: usize, z: f64) -> HeightMap {
        let pts: Vec<Vec3> = (0..n)
            .flat_map(|y| (0..n).map(move |x| Vec3::new(x as f64, y as f64, z)))
            .collect();
        HeightMap::from_points(&pts, 1.0, Aggregation::Max).unwrap()
    }

    /// A 3x3 tool: tip in the middle, the ring one unit higher.
    fn cup_tool() -> HeightMap {
        let mut pts = Vec::new();
        for y in 0..3 {
            for x in 0..3 {
                let z = if x == 1 && y == 1 { 0.0 } else { 1.0 };
                pts.push(Vec3::new(x as f64, y as f64, z));
            }
        }
        HeightMap::from_points(&pts, 1.0, Aggregation::Min).unwrap()
    }

    #[test]
    fn test_flat_terrain_rests_on_tip() {
        let terrain = flat_terrain(6, 2.0);
        let tool = SparseTool::from_height_map(&cup_tool()).unwrap();
        let path = generate_sparse(&terrain, &tool, 1, 1, -99.0, false).unwrap();
        assert_eq!(path.points_per_line, 6);
        assert_eq!(path.num_scanlines, 6);
        for z in &path.path_data {
            assert_relative_eq!(*z, 2.0);
        }
        assert_eq!(path.scanline(5).map(<[f64]>::len), Some(6));
        assert_eq!(path.scanline(6), None);
        assert_eq!(path.scanline(usize::MAX), None);
    }

    #[test]
    fn test_spike_lifts_neighbours() {
        let mut pts = vec![];
        for y in 0..5 {
            for x in 0..5 {
                let z = if x == 2 && y == 2 { 5.0 } else { 0.0 };
                pts.push(Vec3::new(x as f64, y as f64, z));
            }
        }
        let terrain = HeightMap::from_points(&pts, 1.0, Aggregation::Max).unwrap();
        let tool = SparseTool::from_height_map(&cup_tool()).unwrap();
        let path = generate_sparse(&terrain, &tool, 1, 1, -99.0, false).unwrap();
        // On the spike the tip touches it, next to it the ring does.
        assert_relative_eq!(path.get(2, 2).unwrap(), 5.0);
        assert_relative_eq!(path.get(1, 2).unwrap(), 4.0);
        assert_relative_eq!(path.get(0, 0).unwrap(), 0.0);
    }

    #[test]
    fn test_out_of_bounds_floor() {
        let pts = [Vec3::new(0.0, 0.0, 1.0), Vec3::new(9.0, 0.0, 1.0)];
        let terrain = HeightMap::from_points(&pts, 1.0, Aggregation::Max).unwrap();
        let tool = SparseTool::from_height_map(&cup_tool()).unwrap();
        let path = generate_sparse(&terrain, &tool, 1, 1, -42.0, false).unwrap();
        assert_relative_eq!(path.get(5, 0).unwrap(), -42.0);
        assert_relative_eq!(path.get(0, 0).unwrap(), 1.0);
        assert_relative_eq!(path.get(1, 0).unwrap(), 0.0);
    }

    #[test]
    fn test_dense_matches_sparse() {
        let mut pts = vec![];
        for y in 0..12 {
            for x in 0..15 {
                if (x + y) % 7 == 0 {
                    continue;
                }
                let z = ((x * 3 + y * 5) % 11) as f64 * 0.3;
                pts.push(Vec3::new(x as f64, y as f64, z));
            }
        }
        let terrain = HeightMap::from_points(&pts, 1.0, Aggregation::Max).unwrap();
        let tool_map = cup_tool();
        let sparse = SparseTool::from_height_map(&tool_map).unwrap();
        let dense = DenseTool::from_height_map(&tool_map).unwrap();
        let a = generate_sparse(&terrain, &sparse, 2, 3, -1.0, true).unwrap();
        let b = generate_dense(&terrain, &dense, 2, 3, -1.0, false).unwrap();
        assert_eq!(a.points_per_line, 8);
        assert_eq!(a.num_scanlines, 4);
        assert!(a.max_abs_diff(&b).unwrap() < 1e-12);
    }

    #[test]
    fn test_rejects_bad_strides_and_steps() {
        let terrain = flat_terrain(3, 0.0);
        let tool = SparseTool::from_height_map(&cup_tool()).unwrap();
        let err = generate_sparse(&terrain, &tool, 0, 1, 0.0, false).unwrap_err();
        assert!(matches!(err, ToolpathError::InvalidInput(_)));

        let coarse = HeightMap::from_points(&[Vec3::zeros()], 2.0, Aggregation::Min).unwrap();
        let coarse_tool = SparseTool::from_height_map(&coarse).unwrap();
        assert!(generate_sparse(&terrain, &coarse_tool, 1, 1, 0.0, false).is_err());
    }

    #[test]
    fn test_layout_ranges() {
        let layout = SampleLayout::new(10, 7, 3, 2).unwrap();
        assert_eq!(layout.points_per_line(), 4);
        assert_eq!(layout.num_scanlines(), 4);
        // Columns 0, 3, 6, 9: terrain cells 4..8 hold column 6 only.
        assert_eq!(layout.columns_in(&(4..8)), 2..3);
        assert_eq!(layout.rows_in(&(0..3)), 0..2);
    }

    #[test]
    fn test_scanline_row() {
        let terrain = flat_terrain(5, 3.0);
        let tool = SparseTool::from_height_map(&cup_tool()).unwrap();
        let mut out = Vec::new();
        scanline(&terrain, &tool, 2, 2, -1.0, &mut out);
        assert_eq!(out, vec![3.0, 3.0, 3.0]);
        scanline(&terrain, &tool, 20, 2, -1.0, &mut out);
        assert_eq!(out.len(), 6);
        assert_eq!(out[3], -1.0);
    }
}
