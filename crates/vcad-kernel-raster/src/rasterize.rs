//! Mesh-to-point-set rasterization by vertical ray casting.
//!
//! For every node of a regular XY grid a ray is cast along +Z and tested
//! against the triangles bucketed in the node's [`TriangleGrid`] cell. Terrain
//! keeps the highest hit, tools keep the lowest. Nodes without a hit produce
//! no point.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::accel::TriangleGrid;
use crate::error::{check_step, Result};
use crate::geometry::{BoundingBox, PointSet, Triangle, Vec3};
use crate::grid::GridSpec;
use crate::heightmap::Aggregation;
use crate::ray::{intersect_up, RAY_EPSILON};

/// Default spatial grid density.
pub const TRIANGLES_PER_CELL: f64 = 20.0;

/// Which faces of a mesh take part in rasterization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Upward-facing faces, highest hit per node.
    Terrain,
    /// Downward-facing faces, lowest hit per node.
    Tool,
}

impl FilterMode {
    /// How hits landing on the same node are combined.
    pub fn aggregation(self) -> Aggregation {
        match self {
            FilterMode::Terrain => Aggregation::Max,
            FilterMode::Tool => Aggregation::Min,
        }
    }
}

/// Tunable constants for rasterization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterOptions {
    /// Parallel-ray rejection epsilon, also used for the facing test.
    pub epsilon: f64,
    /// Target mean bucket size of the spatial grid.
    pub triangles_per_cell: f64,
    /// Cast rows on the rayon thread pool.
    pub parallel: bool,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            epsilon: RAY_EPSILON,
            triangles_per_cell: TRIANGLES_PER_CELL,
            parallel: true,
        }
    }
}

/// Result of a rasterization call.
#[derive(Debug, Clone)]
pub struct RasterOutput {
    /// Hit points, row-major by grid node.
    pub points: PointSet,
    /// Bounds used to lay out the grid.
    pub bounds: BoundingBox,
    /// Sampling grid.
    pub grid: GridSpec,
}

impl RasterOutput {
    /// Number of points produced.
    pub fn point_count(&self) -> usize {
        self.points.len()
    }
}

/// Triangles surviving `filter`, in input order.
pub fn filter_triangles(triangles: &[Triangle], filter: FilterMode, epsilon: f64) -> Vec<Triangle> {
    triangles
        .iter()
        .filter(|t| t.passes(filter, epsilon))
        .copied()
        .collect()
}

/// Bounds of a filtered triangle set, with the XY extent taken from
/// `bounds_override` when given.
pub fn raster_bounds(filtered: &[Triangle], bounds_override: Option<&BoundingBox>) -> BoundingBox {
    match (bounds_override, BoundingBox::from_triangles(filtered)) {
        (Some(o), Some(mesh)) => BoundingBox::new(
            Vec3::new(o.min.x, o.min.y, o.min.z.min(mesh.min.z)),
            Vec3::new(o.max.x, o.max.y, o.max.z.max(mesh.max.z)),
        ),
        (Some(o), None) => *o,
        (None, Some(mesh)) => mesh,
        (None, None) => BoundingBox::zero(),
    }
}

/// Rasterize `triangles` at `step`.
///
/// Zero triangles after filtering yields an empty point set, not an error.
pub fn rasterize(
    triangles: &[Triangle],
    step: f64,
    filter: FilterMode,
    bounds_override: Option<&BoundingBox>,
    options: &RasterOptions,
) -> Result<RasterOutput> {
    check_step(step)?;
    if let Some(b) = bounds_override {
        b.validate()?;
    }

    let filtered = filter_triangles(triangles, filter, options.epsilon);
    let bounds = raster_bounds(&filtered, bounds_override);
    let grid = GridSpec::from_bounds(&bounds, step)?;

    if filtered.is_empty() {
        debug!(input = triangles.len(), "no triangles left after filtering");
        return Ok(RasterOutput {
            points: Vec::new(),
            bounds,
            grid,
        });
    }

    let mut cells = Vec::new();
    rasterize_cells(&filtered, &grid, filter, options, &mut cells);
    let points = cells_to_points(&grid, &cells);

    debug!(
        triangles = filtered.len(),
        width = grid.width,
        height = grid.height,
        points = points.len(),
        "rasterized"
    );

    Ok(RasterOutput {
        points,
        bounds,
        grid,
    })
}

/// Cast one ray per node of `grid` against pre-filtered triangles.
///
/// `out` is resized to `grid.len()` and receives one Z per node, NaN where
/// nothing was hit. Only triangles overlapping the grid footprint are
/// bucketed, so windows onto a large mesh stay cheap.
pub fn rasterize_cells(
    filtered: &[Triangle],
    grid: &GridSpec,
    filter: FilterMode,
    options: &RasterOptions,
    out: &mut Vec<f64>,
) {
    out.clear();
    out.resize(grid.len(), f64::NAN);
    if grid.is_empty() {
        return;
    }

    let footprint = grid
        .bounds(&BoundingBox::zero())
        .expanded_xy(grid.step);
    let local: Vec<Triangle> = filtered
        .iter()
        .filter(|t| {
            t.bbox_max_x >= footprint.min.x
                && t.bbox_min_x <= footprint.max.x
                && t.bbox_max_y >= footprint.min.y
                && t.bbox_min_y <= footprint.max.y
        })
        .copied()
        .collect();
    if local.is_empty() {
        return;
    }

    // Ray origin depends on the whole set so any window of the grid
    // reproduces the full-grid heights exactly.
    let origin_z = filtered
        .iter()
        .map(|t| t.z_range().0)
        .fold(f64::INFINITY, f64::min)
        - 1.0;
    let accel = TriangleGrid::build(&local, options.triangles_per_cell);
    trace!(
        triangles = local.len(),
        buckets = ?accel.dims(),
        max_bucket = accel.max_bucket(),
        mean_bucket = accel.mean_bucket(),
        "bucketed triangles"
    );
    let aggregation = filter.aggregation();

    let cast_row = |iy: usize, row: &mut [f64]| {
        let y = grid.y_at(iy);
        for (ix, slot) in row.iter_mut().enumerate() {
            let x = grid.x_at(ix);
            for &idx in accel.candidates(x, y) {
                let tri = &local[idx as usize];
                if x < tri.bbox_min_x || x > tri.bbox_max_x || y < tri.bbox_min_y || y > tri.bbox_max_y {
                    continue;
                }
                if let Some(z) = intersect_up(tri, x, y, origin_z, options.epsilon) {
                    if aggregation.replaces(*slot, z) {
                        *slot = z;
                    }
                }
            }
        }
    };

    if options.parallel {
        out.par_chunks_mut(grid.width)
            .enumerate()
            .for_each(|(iy, row)| cast_row(iy, row));
    } else {
        out.chunks_mut(grid.width)
            .enumerate()
            .for_each(|(iy, row)| cast_row(iy, row));
    }
}

/// Expand per-node heights into a sparse point set in row-major order.
pub fn cells_to_points(grid: &GridSpec, cells: &[f64]) -> PointSet {
    let mut points = Vec::new();
    for iy in 0..grid.height {
        let y = grid.y_at(iy);
        for ix in 0..grid.width {
            let z = cells[grid.index(ix, iy)];
            if !z.is_nan() {
                points.push(Vec3::new(grid.x_at(ix), y, z));
            }
        }
    }
    points
}
