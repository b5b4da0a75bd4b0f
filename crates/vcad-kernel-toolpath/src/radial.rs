//! Radial (lathe) sweeps.
//!
//! The terrain is turned in fixed angular steps about an axis parallel to
//! X through the YZ centre of its bounds. At each angle a narrow strip
//! around the axis, as wide as the tool, is rasterized and a single
//! scanline along its centre row becomes one row of the toolpath. Heights
//! are measured from the axis.

use std::ops::Range;

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use vcad_kernel_raster::{
    grid::cell_count, BoundingBox, FilterMode, GridSpec, SparseTool, Triangle, Vec3,
};

use crate::context::{ComputeContext, KernelKind};
use crate::error::{Result, ToolpathError};
use crate::search::{scanline, ToolPath};

/// Parameters of a radial sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadialParams {
    /// Angle between scanlines, in (0, 360].
    pub rotation_step_degrees: f64,
    /// Column stride along X.
    pub x_step: usize,
    /// Height reported where the tool finds no terrain.
    pub out_of_bounds_z: f64,
    /// Lattice spacing.
    pub grid_step: f64,
    /// X extent of the sweep and, through its YZ centre, the rotation
    /// axis; the terrain's bounds when absent.
    pub terrain_bounds: Option<BoundingBox>,
}

impl RadialParams {
    /// Parameters with unit stride and no bounds override.
    pub fn new(rotation_step_degrees: f64, grid_step: f64, out_of_bounds_z: f64) -> Self {
        Self {
            rotation_step_degrees,
            x_step: 1,
            out_of_bounds_z,
            grid_step,
            terrain_bounds: None,
        }
    }
}

/// How a sweep was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionMode {
    /// One angle after another on the coordinator.
    Sequential,
    /// Contiguous angle slices on pool workers.
    Parallel {
        /// Slices dispatched.
        workers: usize,
    },
}

/// Output of a radial sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadialResult {
    /// One scanline per rotation, in ascending angle order.
    pub toolpath: ToolPath,
    /// Number of rotations.
    pub num_rotations: usize,
    /// Angle between scanlines.
    pub rotation_step_degrees: f64,
    /// Wall time of the call.
    pub generation_time_ms: f64,
    /// Execution path taken.
    pub execution: ExecutionMode,
}

/// Number of scanlines for a rotation step: `ceil(360 / step)`.
pub fn rotation_count(rotation_step_degrees: f64) -> Result<usize> {
    if !(rotation_step_degrees.is_finite()
        && rotation_step_degrees > 0.0
        && rotation_step_degrees <= 360.0)
    {
        return Err(ToolpathError::InvalidInput(format!(
            "rotation step must be in (0, 360], got {rotation_step_degrees}"
        )));
    }
    Ok(((360.0 / rotation_step_degrees - 1e-9).ceil() as usize).max(1))
}

/// Split `0..count` into at most `parts` contiguous slices differing in
/// length by at most one. Empty slices are omitted.
pub fn slice_ranges(count: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let base = count / parts;
    let extra = count % parts;
    let mut start = 0;
    let mut slices = Vec::with_capacity(parts);
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        if len > 0 {
            slices.push(start..start + len);
        }
        start += len;
    }
    slices
}

/// Immutable description of one sweep, shared by every executor.
#[derive(Debug)]
pub struct RadialJob {
    triangles: Vec<Triangle>,
    tool: SparseTool,
    axis: (f64, f64),
    strip: GridSpec,
    band: f64,
    x_step: usize,
    out_of_bounds_z: f64,
    rotation_step_degrees: f64,
    rotations: usize,
    epsilon: f64,
}

impl RadialJob {
    /// Prepare a sweep of `triangles` with `tool`.
    ///
    /// The triangles are moved so the rotation axis lies on `y = z = 0`.
    /// The tool's half-width across Y, taken from its occupied offsets,
    /// fixes the strip height for every angle.
    pub fn new(
        triangles: Vec<Triangle>,
        tool: SparseTool,
        params: &RadialParams,
        epsilon: f64,
    ) -> Result<Self> {
        let rotations = rotation_count(params.rotation_step_degrees)?;
        if params.x_step == 0 {
            return Err(ToolpathError::InvalidInput("x step must be at least 1".into()));
        }
        let step = params.grid_step;
        let bounds = match &params.terrain_bounds {
            Some(b) => {
                b.validate()?;
                *b
            }
            None => BoundingBox::from_triangles(&triangles).ok_or_else(|| {
                ToolpathError::InvalidInput("terrain has no triangles".into())
            })?,
        };
        // Validates the step as well.
        let x_grid = GridSpec::from_bounds(&bounds, step)?;
        if (tool.step() - step).abs() > 1e-9 * step {
            return Err(ToolpathError::InvalidInput(format!(
                "tool sampled at step {} but sweep uses {step}",
                tool.step()
            )));
        }

        let axis = (
            0.5 * (bounds.min.y + bounds.max.y),
            0.5 * (bounds.min.z + bounds.max.z),
        );
        let to_axis = Vec3::new(0.0, -axis.0, -axis.1);
        let triangles: Vec<Triangle> = triangles.iter().map(|t| t.translated(&to_axis)).collect();

        let radius_cells = tool.extent_cells().1 as usize;
        let strip = GridSpec {
            origin_x: x_grid.origin_x,
            origin_y: 0.0,
            step,
            x0: 0,
            y0: -(radius_cells as i64),
            width: cell_count(bounds.width(), step),
            height: 2 * radius_cells + 1,
        };

        Ok(Self {
            triangles,
            tool,
            axis,
            strip,
            band: (radius_cells + 1) as f64 * step,
            x_step: params.x_step,
            out_of_bounds_z: params.out_of_bounds_z,
            rotation_step_degrees: params.rotation_step_degrees,
            rotations,
            epsilon,
        })
    }

    /// Number of rotations in the sweep.
    pub fn rotations(&self) -> usize {
        self.rotations
    }

    /// Samples per scanline.
    pub fn points_per_line(&self) -> usize {
        self.strip.width.div_ceil(self.x_step)
    }

    /// Angle of rotation `index` in degrees.
    pub fn angle(&self, index: usize) -> f64 {
        index as f64 * self.rotation_step_degrees
    }

    /// World `(y, z)` of the rotation axis.
    pub fn axis(&self) -> (f64, f64) {
        self.axis
    }

    /// Strip grid rasterized at every angle, in axis coordinates.
    pub fn strip(&self) -> &GridSpec {
        &self.strip
    }

    /// Rotate, rasterize the strip and append the centre scanline to `out`.
    pub fn run_angle(&self, index: usize, ctx: &mut ComputeContext, out: &mut Vec<f64>) -> Result<()> {
        let rotation = Rotation3::from_axis_angle(&Vector3::x_axis(), self.angle(index).to_radians());
        let band: Vec<Triangle> = self
            .triangles
            .iter()
            .map(|t| t.rotated(&rotation))
            .filter(|t| {
                t.bbox_max_y >= -self.band
                    && t.bbox_min_y <= self.band
                    && t.passes(FilterMode::Terrain, self.epsilon)
            })
            .collect();

        let map = ctx.raster_map(&band, self.strip, FilterMode::Terrain)?;
        scanline(&map, &self.tool, 0, self.x_step, self.out_of_bounds_z, out);
        ctx.recycle(KernelKind::Rasterize, map.into_cells());
        Ok(())
    }

    /// Run `angles` in ascending order, calling `on_done` after each one.
    pub fn run(
        &self,
        angles: Range<usize>,
        ctx: &mut ComputeContext,
        on_done: &mut dyn FnMut(),
    ) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(angles.len() * self.points_per_line());
        for index in angles {
            self.run_angle(index, ctx, &mut out)?;
            on_done();
        }
        Ok(out)
    }

    /// Wrap concatenated scanlines into a toolpath.
    pub fn into_toolpath(&self, path_data: Vec<f64>) -> ToolPath {
        ToolPath {
            points_per_line: self.points_per_line(),
            num_scanlines: self.rotations,
            path_data,
        }
    }
}
