//! Toolpath engine: the public entry point tying rasterization, planning,
//! collision search and the worker pool together.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use vcad_kernel_raster::{
    cells_to_points, filter_triangles, raster_bounds, Aggregation, BoundingBox, FilterMode,
    GridSpec, HeightMap, RasterOutput, SparseTool, Triangle, Vec3,
};

use crate::config::EngineConfig;
use crate::context::{ComputeContext, KernelKind};
use crate::device::{Device, DeviceCapabilities};
use crate::error::{Result, ToolpathError};
use crate::planar::{self, PlanarParams, PlanarResult};
use crate::pool::WorkerPool;
use crate::radial::{slice_ranges, ExecutionMode, RadialJob, RadialParams, RadialResult};
use crate::tiling::{plan_tiles, MemoryEstimate, TilePlanner};

/// Forwards completed-rotation counts to a caller callback, never going
/// backwards even if a sweep is restarted.
struct Progress<'a> {
    callback: Option<&'a mut dyn FnMut(usize)>,
    reported: usize,
}

impl Progress<'_> {
    fn advance(&mut self, completed: usize) {
        if completed > self.reported {
            self.reported = completed;
            if let Some(cb) = self.callback.as_mut() {
                cb(completed);
            }
        }
    }
}

/// Height-field toolpath engine.
///
/// Owns a coordinator compute context and, when configured, a pool of
/// workers for radial sweeps.
pub struct ToolpathEngine {
    device: Device,
    config: EngineConfig,
    planner: TilePlanner,
    context: ComputeContext,
    pool: Option<WorkerPool>,
}

impl ToolpathEngine {
    /// Create an engine on `device`.
    ///
    /// Fails if the configuration is invalid or no compute context can be
    /// acquired. A worker pool that cannot start is not an error: radial
    /// sweeps then run sequentially.
    pub fn new(device: Device, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let context = ComputeContext::new(&device, 0, &config, true)?;

        let pool = if config.parallel_worker_count > 0 {
            match WorkerPool::new(&device, &config, config.parallel_worker_count) {
                Ok(pool) => Some(pool),
                Err(e) => {
                    warn!(error = %e, "worker pool unavailable, radial sweeps run sequentially");
                    None
                }
            }
        } else {
            None
        };

        let planner = TilePlanner::new(config.clone(), device.capabilities().clone());
        info!(
            device = %device.capabilities().name,
            workers = pool.as_ref().map_or(0, WorkerPool::len),
            "toolpath engine ready"
        );
        Ok(Self {
            device,
            config,
            planner,
            context,
            pool,
        })
    }

    /// Engine on the CPU backend with default settings.
    pub fn cpu() -> Result<Self> {
        Self::new(Device::cpu(), EngineConfig::default())
    }

    /// Capabilities of the compute device.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        self.device.capabilities()
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of pool workers (0 when running sequentially).
    pub fn worker_count(&self) -> usize {
        self.pool.as_ref().map_or(0, WorkerPool::len)
    }

    /// Estimate memory for processing `bounds` at `step`.
    pub fn estimate_memory(&self, bounds: &BoundingBox, step: f64) -> Result<MemoryEstimate> {
        self.planner.estimate_memory(bounds, step)
    }

    /// Whether a job over `bounds` at `step` would be tiled.
    pub fn will_use_tiling(&self, bounds: &BoundingBox, step: f64) -> Result<bool> {
        Ok(self.config.auto_tiling && self.estimate_memory(bounds, step)?.needs_tiling)
    }

    /// Rasterize `triangles` at `step`.
    ///
    /// Grids over budget are rasterized one core tile at a time; the output
    /// is identical to a single pass.
    pub fn rasterize(
        &mut self,
        triangles: &[Triangle],
        step: f64,
        filter: FilterMode,
        bounds_override: Option<&BoundingBox>,
    ) -> Result<RasterOutput> {
        if let Some(b) = bounds_override {
            b.validate()?;
        }
        let filtered = filter_triangles(triangles, filter, self.config.ray_epsilon);
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

        let estimate = self.estimate_memory(&bounds, step)?;
        let points = if self.config.auto_tiling && estimate.needs_tiling {
            let tiles = plan_tiles(
                &bounds,
                step,
                self.planner.budget_bytes(),
                0.0,
                self.config.min_tile_size,
            )?;
            info!(tiles = tiles.len(), "rasterizing in tiles");
            let mut cells = vec![f64::NAN; grid.len()];
            for tile in &tiles {
                let window = grid.subgrid(tile.core_x.clone(), tile.core_y.clone());
                let map = self.context.raster_map(&filtered, window, filter)?;
                for (j, row) in map.cells().chunks(window.width).enumerate() {
                    let at = grid.index(tile.core_x.start, tile.core_y.start + j);
                    cells[at..at + window.width].copy_from_slice(row);
                }
                self.context.recycle(KernelKind::Rasterize, map.into_cells());
            }
            cells_to_points(&grid, &cells)
        } else {
            let map = self.context.raster_map(&filtered, grid, filter)?;
            let points = cells_to_points(&grid, map.cells());
            self.context.recycle(KernelKind::Rasterize, map.into_cells());
            points
        };

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

    /// Generate a planar toolpath from terrain and tool point sets.
    pub fn generate_planar(
        &mut self,
        terrain_points: &[Vec3],
        tool_points: &[Vec3],
        params: &PlanarParams,
    ) -> Result<PlanarResult> {
        planar::generate_planar(
            &mut self.context,
            &self.planner,
            self.config.auto_tiling,
            terrain_points,
            tool_points,
            params,
        )
    }

    /// Sweep `terrain` through a full turn about the X axis.
    ///
    /// Scanline `i` is the toolpath at angle `i * rotation_step_degrees`.
    /// `progress` receives the number of completed rotations, increasing.
    pub fn generate_radial(
        &mut self,
        terrain: &[Triangle],
        tool_points: &[Vec3],
        params: &RadialParams,
        progress: Option<&mut dyn FnMut(usize)>,
    ) -> Result<RadialResult> {
        let start = Instant::now();
        let tool_map = HeightMap::from_points(tool_points, params.grid_step, Aggregation::Min)?;
        let tool = SparseTool::from_height_map(&tool_map)?;
        let job = Arc::new(RadialJob::new(
            terrain.to_vec(),
            tool,
            params,
            self.config.ray_epsilon,
        )?);
        let rotations = job.rotations();
        let mut progress = Progress {
            callback: progress,
            reported: 0,
        };

        let parallel = self
            .pool
            .as_ref()
            .filter(|_| rotations >= self.config.min_parallel_rotations.max(2));

        let (path_data, execution) = match parallel {
            Some(pool) => match run_parallel(pool, &job, &mut progress) {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "parallel sweep failed, retrying sequentially");
                    (
                        run_sequential(&job, &mut self.context, &mut progress)?,
                        ExecutionMode::Sequential,
                    )
                }
            },
            None => (
                run_sequential(&job, &mut self.context, &mut progress)?,
                ExecutionMode::Sequential,
            ),
        };

        let toolpath = job.into_toolpath(path_data);
        let generation_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(
            rotations,
            points_per_line = toolpath.points_per_line,
            ?execution,
            ms = generation_time_ms,
            "radial toolpath generated"
        );
        Ok(RadialResult {
            toolpath,
            num_rotations: rotations,
            rotation_step_degrees: params.rotation_step_degrees,
            generation_time_ms,
            execution,
        })
    }
}

fn run_sequential(job: &RadialJob, ctx: &mut ComputeContext, progress: &mut Progress<'_>) -> Result<Vec<f64>> {
    let mut done = 0;
    job.run(0..job.rotations(), ctx, &mut || {
        done += 1;
        progress.advance(done);
    })
}

fn run_parallel(
    pool: &WorkerPool,
    job: &Arc<RadialJob>,
    progress: &mut Progress<'_>,
) -> Result<(Vec<f64>, ExecutionMode)> {
    let slices = slice_ranges(job.rotations(), pool.len());
    let (tick, ticks) = mpsc::channel();
    let handles = slices
        .iter()
        .enumerate()
        .map(|(slot, angles)| pool.submit_radial(slot, Arc::clone(job), angles.clone(), tick.clone()))
        .collect::<Result<Vec<_>>>()?;
    drop(tick);
    debug!(slices = handles.len(), "radial slices dispatched");

    // Ends once every worker has dropped its task.
    let mut done = 0;
    for n in ticks {
        done += n;
        progress.advance(done);
    }

    let mut path_data = Vec::with_capacity(job.rotations() * job.points_per_line());
    for handle in handles {
        path_data.extend(handle.wait()?);
    }
    if path_data.len() != job.rotations() * job.points_per_line() {
        return Err(ToolpathError::ResourceUnavailable(
            "parallel sweep returned an incomplete result".into(),
        ));
    }
    Ok((
        path_data,
        ExecutionMode::Parallel {
            workers: slices.len(),
        },
    ))
}

impl std::fmt::Debug for ToolpathEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolpathEngine")
            .field("device", &self.device.capabilities().name)
            .field("config", &self.config)
            .field("workers", &self.worker_count())
            .finish()
    }
}
