//! Engine configuration.

use serde::{Deserialize, Serialize};
use vcad_kernel_raster::{RasterOptions, RAY_EPSILON};

use crate::error::{Result, ToolpathError};

/// Settings for a [`ToolpathEngine`](crate::ToolpathEngine).
///
/// Missing fields in a JSON document take their default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Compute budget per dispatch in MiB.
    #[serde(rename = "maxComputeBudgetMB")]
    pub max_compute_budget_mb: f64,
    /// Fraction of the budget that planning may use (0, 1].
    pub safety_margin: f64,
    /// Overlap added around each tile core (mm). Raised to the tool reach if smaller.
    pub tile_overlap_distance: f64,
    /// Tile automatically when a problem exceeds the budget.
    pub auto_tiling: bool,
    /// Smallest tile side the planner may choose (mm).
    pub min_tile_size: f64,
    /// Worker pool size for radial sweeps (0 disables the pool).
    pub parallel_worker_count: usize,
    /// Fewer rotations than this run sequentially.
    pub min_parallel_rotations: usize,
    /// Parallel-ray rejection epsilon.
    pub ray_epsilon: f64,
    /// Spatial grid density target for rasterization.
    pub triangles_per_cell: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_compute_budget_mb: 256.0,
            safety_margin: 0.8,
            tile_overlap_distance: 10.0,
            auto_tiling: true,
            min_tile_size: 50.0,
            parallel_worker_count: 4,
            min_parallel_rotations: 4,
            ray_epsilon: RAY_EPSILON,
            triangles_per_cell: 20.0,
        }
    }
}

impl EngineConfig {
    /// Validate settings.
    pub fn validate(&self) -> Result<()> {
        if !(self.max_compute_budget_mb.is_finite() && self.max_compute_budget_mb > 0.0) {
            return Err(ToolpathError::InvalidInput(
                "maxComputeBudgetMB must be positive".into(),
            ));
        }
        if !(self.safety_margin > 0.0 && self.safety_margin <= 1.0) {
            return Err(ToolpathError::InvalidInput(
                "safetyMargin must be in (0, 1]".into(),
            ));
        }
        if !(self.tile_overlap_distance.is_finite() && self.tile_overlap_distance >= 0.0) {
            return Err(ToolpathError::InvalidInput(
                "tileOverlapDistance must be non-negative".into(),
            ));
        }
        if !(self.min_tile_size.is_finite() && self.min_tile_size > 0.0) {
            return Err(ToolpathError::InvalidInput(
                "minTileSize must be positive".into(),
            ));
        }
        if !(self.ray_epsilon.is_finite() && self.ray_epsilon >= 0.0) {
            return Err(ToolpathError::InvalidInput(
                "rayEpsilon must be non-negative".into(),
            ));
        }
        if !(self.triangles_per_cell.is_finite() && self.triangles_per_cell >= 1.0) {
            return Err(ToolpathError::InvalidInput(
                "trianglesPerCell must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Parse a JSON document, filling defaults, and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ToolpathError::InvalidInput(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Budget per dispatch in bytes before the safety margin.
    pub fn budget_bytes(&self) -> u64 {
        (self.max_compute_budget_mb * 1024.0 * 1024.0) as u64
    }

    /// Rasterization options derived from this configuration.
    pub fn raster_options(&self, parallel: bool) -> RasterOptions {
        RasterOptions {
            epsilon: self.ray_epsilon,
            triangles_per_cell: self.triangles_per_cell,
            parallel,
        }
    }
}
