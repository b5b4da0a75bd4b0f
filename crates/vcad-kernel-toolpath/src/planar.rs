//! Planar toolpaths from terrain and tool point sets.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vcad_kernel_raster::{
    Aggregation, BoundingBox, GridSpec, HeightMap, SparseTool, Vec3,
};

use crate::context::{ComputeContext, KernelKind};
use crate::error::{Result, ToolpathError};
use crate::search::{fill_region, generate_dense, generate_sparse, DenseTool, SampleLayout, SearchStrategy, ToolPath};
use crate::tiling::TilePlanner;

/// Parameters of a planar toolpath.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanarParams {
    /// Column stride.
    pub x_step: usize,
    /// Row stride.
    pub y_step: usize,
    /// Height reported where the tool finds no terrain.
    pub out_of_bounds_z: f64,
    /// Lattice spacing for both height maps.
    pub grid_step: f64,
    /// Domain override; the terrain's bounds when absent.
    pub terrain_bounds: Option<BoundingBox>,
    /// Forced strategy; chosen from the memory estimate when absent.
    pub strategy: Option<SearchStrategy>,
}

impl PlanarParams {
    /// Parameters with unit strides and automatic strategy.
    pub fn new(grid_step: f64, out_of_bounds_z: f64) -> Self {
        Self {
            x_step: 1,
            y_step: 1,
            out_of_bounds_z,
            grid_step,
            terrain_bounds: None,
            strategy: None,
        }
    }
}

/// Output of a planar run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanarResult {
    /// Safe heights, one scanline per sampled row.
    pub toolpath: ToolPath,
    /// Strategy that produced it.
    pub strategy: SearchStrategy,
    /// Tiles processed (1 unless tiled).
    pub tile_count: usize,
    /// Wall time of the call.
    pub generation_time_ms: f64,
}

/// Generate a planar toolpath on `ctx`.
pub(crate) fn generate_planar(
    ctx: &mut ComputeContext,
    planner: &TilePlanner,
    auto_tiling: bool,
    terrain_points: &[Vec3],
    tool_points: &[Vec3],
    params: &PlanarParams,
) -> Result<PlanarResult> {
    let start = Instant::now();
    let step = params.grid_step;

    let tool_map = HeightMap::from_points(tool_points, step, Aggregation::Min)?;
    let tool = SparseTool::from_height_map(&tool_map)?;

    let bounds = match &params.terrain_bounds {
        Some(b) => {
            b.validate()?;
            *b
        }
        None => BoundingBox::from_points(terrain_points)
            .ok_or_else(|| ToolpathError::InvalidInput("terrain point set is empty".into()))?,
    };
    let grid = GridSpec::from_bounds(&bounds, step)?;
    let layout = SampleLayout::new(grid.width, grid.height, params.x_step, params.y_step)?;
    // Fails on grids too large to count before anything is allocated.
    let estimate = planner.estimate_memory(&bounds, step)?;

    let strategy = match params.strategy {
        Some(s) => s,
        None => match (estimate.needs_tiling, auto_tiling) {
            (true, true) => SearchStrategy::Tiled,
            (true, false) => {
                warn!(
                    bytes = estimate.bytes_needed,
                    budget = estimate.budget_bytes,
                    "terrain exceeds the compute budget but auto tiling is off"
                );
                SearchStrategy::Sparse
            }
            (false, _) => SearchStrategy::Sparse,
        },
    };

    let (toolpath, tile_count) = match strategy {
        SearchStrategy::Dense => {
            let terrain = HeightMap::from_points_on(terrain_points, grid, Aggregation::Max);
            let dense = DenseTool::from_height_map(&tool_map)?;
            let path = generate_dense(
                &terrain,
                &dense,
                params.x_step,
                params.y_step,
                params.out_of_bounds_z,
                ctx.parallel(),
            )?;
            (path, 1)
        }
        SearchStrategy::Sparse => {
            let terrain = HeightMap::from_points_on(terrain_points, grid, Aggregation::Max);
            let path = generate_sparse(
                &terrain,
                &tool,
                params.x_step,
                params.y_step,
                params.out_of_bounds_z,
                ctx.parallel(),
            )?;
            (path, 1)
        }
        SearchStrategy::Tiled => generate_tiled(
            ctx,
            planner,
            terrain_points,
            &tool,
            &bounds,
            &grid,
            &layout,
            params.out_of_bounds_z,
        )?,
    };

    let generation_time_ms = start.elapsed().as_secs_f64() * 1000.0;
    info!(
        ?strategy,
        tiles = tile_count,
        points_per_line = toolpath.points_per_line,
        scanlines = toolpath.num_scanlines,
        ms = generation_time_ms,
        "planar toolpath generated"
    );
    Ok(PlanarResult {
        toolpath,
        strategy,
        tile_count,
        generation_time_ms,
    })
}

/// Sparse search per tile over its extended terrain, keeping core samples.
#[allow(clippy::too_many_arguments)]
fn generate_tiled(
    ctx: &mut ComputeContext,
    planner: &TilePlanner,
    terrain_points: &[Vec3],
    tool: &SparseTool,
    bounds: &BoundingBox,
    grid: &GridSpec,
    layout: &SampleLayout,
    out_of_bounds_z: f64,
) -> Result<(ToolPath, usize)> {
    let tiles = planner.plan_tiles(bounds, grid.step, tool.reach())?;
    let ppl = layout.points_per_line();
    let lines = layout.num_scanlines();
    let mut path_data = vec![out_of_bounds_z; ppl * lines];
    let mut scratch = ctx.scratch(KernelKind::Toolpath);

    for tile in &tiles {
        let cols = layout.columns_in(&tile.core_x);
        let rows = layout.rows_in(&tile.core_y);
        if cols.is_empty() || rows.is_empty() {
            continue;
        }
        let window = grid.subgrid(tile.extended_x.clone(), tile.extended_y.clone());
        let terrain = HeightMap::from_points_on(terrain_points, window, Aggregation::Max);

        scratch.clear();
        scratch.resize(cols.len() * rows.len(), out_of_bounds_z);
        fill_region(
            &terrain,
            tool,
            layout,
            (grid.x0, grid.y0),
            rows.clone(),
            cols.clone(),
            out_of_bounds_z,
            ctx.parallel(),
            &mut scratch,
        );
        for (j, row) in scratch.chunks(cols.len()).enumerate() {
            let at = (rows.start + j) * ppl + cols.start;
            path_data[at..at + cols.len()].copy_from_slice(row);
        }
    }
    ctx.recycle(KernelKind::Toolpath, scratch);

    Ok((
        ToolPath {
            points_per_line: ppl,
            num_scanlines: lines,
            path_data,
        },
        tiles.len(),
    ))
}
