//! Memory estimation and tile planning.
//!
//! Every grid node costs a position (three components) plus a validity flag,
//! four 4-byte components in all. When the whole grid does not fit the
//! budget the domain is cut into square tiles whose extended footprint
//! (core plus overlap on every side) does.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vcad_kernel_raster::{BoundingBox, GridSpec};

use crate::config::EngineConfig;
use crate::device::DeviceCapabilities;
use crate::error::{Result, ToolpathError};

/// Bytes held per grid node during a dispatch.
pub const BYTES_PER_CELL: u64 = 4 * 4;

/// Result of a memory estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEstimate {
    /// Grid nodes covering the bounds.
    pub total_points: u64,
    /// Bytes needed to process the grid in one dispatch.
    pub bytes_needed: u64,
    /// Bytes the planner may use per dispatch.
    pub budget_bytes: u64,
    /// Whether the grid exceeds the budget.
    pub needs_tiling: bool,
    /// Tiles a plan with the configured overlap would cut, or 1 when the
    /// grid fits. A tool reach larger than that overlap can raise the real
    /// count; when even the minimum tile exceeds the budget this is the
    /// count at the minimum side.
    pub tile_count_estimate: u64,
}

/// One tile of a planned domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    /// Row-major position in the plan.
    pub index: usize,
    /// Region whose results this tile owns.
    pub core_bounds: BoundingBox,
    /// Core expanded by the overlap margin.
    pub extended_bounds: BoundingBox,
    /// Core grid columns (half-open).
    pub core_x: Range<usize>,
    /// Core grid rows (half-open).
    pub core_y: Range<usize>,
    /// Extended columns clipped to the grid.
    pub extended_x: Range<usize>,
    /// Extended rows clipped to the grid.
    pub extended_y: Range<usize>,
}

impl Tile {
    /// Grid nodes inside the clipped extended region.
    pub fn extended_cell_count(&self) -> usize {
        self.extended_x.len() * self.extended_y.len()
    }
}

/// Budget in bytes a dispatch may use on `caps` under `config`.
pub fn budget_bytes(config: &EngineConfig, caps: &DeviceCapabilities) -> u64 {
    let ceiling = config.budget_bytes().min(caps.max_buffer_size);
    (ceiling as f64 * config.safety_margin) as u64
}

/// Estimate the memory needed to process `bounds` at `step` in one dispatch.
///
/// A grid too large to count in bytes fails with
/// [`ToolpathError::BudgetExceeded`] so the caller can pick a coarser step.
pub fn estimate_memory(
    bounds: &BoundingBox,
    step: f64,
    config: &EngineConfig,
    caps: &DeviceCapabilities,
) -> Result<MemoryEstimate> {
    let grid = GridSpec::from_bounds(bounds, step)?;
    let budget = budget_bytes(config, caps);
    let overflow = || ToolpathError::BudgetExceeded {
        bounds: *bounds,
        step,
        min_tile_size: config.min_tile_size,
        required_bytes: u64::MAX,
        budget_bytes: budget,
    };
    let total_points = grid.checked_len().ok_or_else(overflow)?;
    let bytes_needed = total_points.checked_mul(BYTES_PER_CELL).ok_or_else(overflow)?;
    let needs_tiling = bytes_needed > budget;
    let tile_count_estimate = if needs_tiling {
        let shape = TileShape::new(&grid, config.tile_overlap_distance, config.min_tile_size);
        let side = shape.largest_side(budget).unwrap_or(shape.min_side);
        shape.count(side).ok_or_else(overflow)? as u64
    } else {
        1
    };
    Ok(MemoryEstimate {
        total_points,
        bytes_needed,
        budget_bytes: budget,
        needs_tiling,
        tile_count_estimate,
    })
}

/// Square-tile geometry over a grid, in cells.
struct TileShape {
    width: usize,
    height: usize,
    margin: usize,
    min_side: usize,
}

impl TileShape {
    fn new(grid: &GridSpec, overlap_margin: f64, min_tile_size: f64) -> Self {
        let longest = grid.width.max(grid.height);
        Self {
            width: grid.width,
            height: grid.height,
            margin: (overlap_margin / grid.step - 1e-9).ceil().max(0.0) as usize,
            min_side: ((min_tile_size / grid.step).ceil().max(1.0) as usize).min(longest),
        }
    }

    fn extended_len(&self, side: usize, total: usize) -> usize {
        side.min(total)
            .saturating_add(self.margin.saturating_mul(2))
            .min(total)
    }

    /// Bytes of a clipped extended tile, `None` on overflow.
    fn bytes(&self, side: usize) -> Option<u64> {
        (self.extended_len(side, self.width) as u64)
            .checked_mul(self.extended_len(side, self.height) as u64)?
            .checked_mul(BYTES_PER_CELL)
    }

    fn fits(&self, side: usize, budget_bytes: u64) -> bool {
        self.bytes(side).is_some_and(|b| b <= budget_bytes)
    }

    /// Largest side in `[min_side, longest]` that fits, by binary search.
    fn largest_side(&self, budget_bytes: u64) -> Option<usize> {
        if !self.fits(self.min_side, budget_bytes) {
            return None;
        }
        let (mut lo, mut hi) = (self.min_side, self.width.max(self.height));
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if self.fits(mid, budget_bytes) {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        Some(lo)
    }

    fn count(&self, side: usize) -> Option<usize> {
        self.width.div_ceil(side).checked_mul(self.height.div_ceil(side))
    }
}

/// Partition `bounds` into tiles whose extended region fits `budget_bytes`.
///
/// The tile side is the largest that fits, found by binary search between
/// `min_tile_size` and the longer grid axis. Fails with
/// [`ToolpathError::BudgetExceeded`] when even the minimum side is too big.
pub fn plan_tiles(
    bounds: &BoundingBox,
    step: f64,
    budget_bytes: u64,
    overlap_margin: f64,
    min_tile_size: f64,
) -> Result<Vec<Tile>> {
    let grid = GridSpec::from_bounds(bounds, step)?;
    if !(overlap_margin.is_finite() && overlap_margin >= 0.0) {
        return Err(ToolpathError::InvalidInput(format!(
            "overlap margin must be non-negative, got {overlap_margin}"
        )));
    }
    let shape = TileShape::new(&grid, overlap_margin, min_tile_size);
    let exceeded = |required_bytes| ToolpathError::BudgetExceeded {
        bounds: *bounds,
        step,
        min_tile_size,
        required_bytes,
        budget_bytes,
    };
    let side = shape
        .largest_side(budget_bytes)
        .ok_or_else(|| exceeded(shape.bytes(shape.min_side).unwrap_or(u64::MAX)))?;
    let count = shape.count(side).ok_or_else(|| exceeded(u64::MAX))?;

    let (w, h, margin) = (shape.width, shape.height, shape.margin);
    let tiles_x = w.div_ceil(side);
    let tiles_y = h.div_ceil(side);
    let mut tiles = Vec::with_capacity(count);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let core_x = tx * side..((tx + 1) * side).min(w);
            let core_y = ty * side..((ty + 1) * side).min(h);
            let extended_x = core_x.start.saturating_sub(margin)..core_x.end.saturating_add(margin).min(w);
            let extended_y = core_y.start.saturating_sub(margin)..core_y.end.saturating_add(margin).min(h);
            let core_bounds = grid
                .subgrid(core_x.clone(), core_y.clone())
                .bounds(bounds);
            tiles.push(Tile {
                index: tiles.len(),
                core_bounds,
                extended_bounds: core_bounds.expanded_xy(overlap_margin),
                core_x,
                core_y,
                extended_x,
                extended_y,
            });
        }
    }

    debug!(
        width = w,
        height = h,
        side,
        margin,
        tiles = tiles.len(),
        "planned tiles"
    );
    Ok(tiles)
}

/// Tile planning bound to an engine configuration and device.
#[derive(Debug, Clone)]
pub struct TilePlanner {
    config: EngineConfig,
    caps: DeviceCapabilities,
}

impl TilePlanner {
    /// Create a planner.
    pub fn new(config: EngineConfig, caps: DeviceCapabilities) -> Self {
        Self { config, caps }
    }

    /// Bytes available per dispatch.
    pub fn budget_bytes(&self) -> u64 {
        budget_bytes(&self.config, &self.caps)
    }

    /// Estimate memory for `bounds` at `step`.
    pub fn estimate_memory(&self, bounds: &BoundingBox, step: f64) -> Result<MemoryEstimate> {
        estimate_memory(bounds, step, &self.config, &self.caps)
    }

    /// Plan tiles with at least the configured overlap.
    pub fn plan_tiles(&self, bounds: &BoundingBox, step: f64, overlap_margin: f64) -> Result<Vec<Tile>> {
        plan_tiles(
            bounds,
            step,
            self.budget_bytes(),
            overlap_margin.max(self.config.tile_overlap_distance),
            self.config.min_tile_size,
        )
    }
}
