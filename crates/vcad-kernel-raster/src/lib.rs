#![warn(missing_docs)]

//! Triangle mesh to height-field rasterization for vcad CAM.
//!
//! This crate turns triangle soups into discretized height fields:
//!
//! - [`rasterize`] casts one vertical ray per grid node, accelerated by a
//!   2D bucket grid, and keeps the highest (terrain) or lowest (tool) hit.
//! - [`HeightMap`] stores the resulting point set on a dense grid.
//! - [`SparseTool`] compacts a tool height map into offsets from its tip.
//!
//! # Example
//!
//! ```
//! use vcad_kernel_raster::{
//!     rasterize, shapes, triangles_from_flat, Aggregation, FilterMode, HeightMap,
//!     RasterOptions, SparseTool,
//! };
//!
//! let coords = shapes::ball_end_mill(6.0, 24);
//! let triangles = triangles_from_flat(&coords).unwrap();
//! let raster = rasterize(&triangles, 0.5, FilterMode::Tool, None, &RasterOptions::default()).unwrap();
//!
//! let map = HeightMap::from_points(&raster.points, 0.5, Aggregation::Min).unwrap();
//! let tool = SparseTool::from_height_map(&map).unwrap();
//! assert!(tool.len() < tool.dense_cell_count());
//! ```

pub mod accel;
mod error;
pub mod geometry;
pub mod grid;
pub mod heightmap;
pub mod rasterize;
pub mod ray;
pub mod shapes;
pub mod sparse;

pub use accel::TriangleGrid;
pub use error::{RasterError, Result};
pub use geometry::{triangles_from_flat, BoundingBox, PointSet, Triangle, Vec3};
pub use grid::GridSpec;
pub use heightmap::{Aggregation, HeightMap};
pub use rasterize::{
    cells_to_points, filter_triangles, raster_bounds, rasterize, rasterize_cells, FilterMode,
    RasterOptions, RasterOutput,
};
pub use ray::RAY_EPSILON;
pub use sparse::{build_sparse_tool, SparseTool, ToolOffset};

/// Build a height map from a point set (terrain: `Max`, tool: `Min`).
pub fn build_height_map(points: &[Vec3], step: f64, aggregation: Aggregation) -> Result<HeightMap> {
    HeightMap::from_points(points, step, aggregation)
}
