#![warn(missing_docs)]

//! Height-field toolpath generation for vcad CAM.
//!
//! Given a terrain and a tool, both rasterized by [`vcad_kernel_raster`],
//! this crate answers at every sample "how low can the tool go before it
//! touches the terrain?":
//!
//! - [`search`] implements the dense and sparse collision searches.
//! - [`tiling`] estimates memory and cuts oversized domains into tiles
//!   whose overlap keeps seams exact.
//! - [`radial`] sweeps a lathe blank through a full turn, one scanline per
//!   angle, sequentially or sliced across a [`WorkerPool`].
//! - [`ToolpathEngine`] ties these together behind one facade.
//!
//! # Example
//!
//! ```
//! use vcad_kernel_raster::{shapes, triangles_from_flat, FilterMode};
//! use vcad_kernel_toolpath::{PlanarParams, ToolpathEngine};
//!
//! let mut engine = ToolpathEngine::cpu().unwrap();
//! let terrain = triangles_from_flat(&shapes::wavy_terrain(20.0, 20.0, 1.0, 2.0)).unwrap();
//! let tool = triangles_from_flat(&shapes::ball_end_mill(3.0, 16)).unwrap();
//!
//! let terrain = engine.rasterize(&terrain, 0.5, FilterMode::Terrain, None).unwrap();
//! let tool = engine.rasterize(&tool, 0.5, FilterMode::Tool, None).unwrap();
//!
//! let params = PlanarParams {
//!     terrain_bounds: Some(terrain.bounds),
//!     ..PlanarParams::new(0.5, -10.0)
//! };
//! let result = engine
//!     .generate_planar(&terrain.points, &tool.points, &params)
//!     .unwrap();
//! assert_eq!(result.toolpath.points_per_line, 41);
//! ```

pub mod config;
pub mod context;
pub mod device;
mod engine;
mod error;
pub mod planar;
pub mod pool;
pub mod radial;
pub mod search;
pub mod tiling;

pub use config::EngineConfig;
pub use context::{ComputeContext, KernelKind};
pub use device::{Device, DeviceCapabilities, DeviceLease};
pub use engine::ToolpathEngine;
pub use error::{ErrorKind, Result, ToolpathError};
pub use planar::{PlanarParams, PlanarResult};
pub use pool::{TaskHandle, WorkerPool};
pub use radial::{rotation_count, ExecutionMode, RadialJob, RadialParams, RadialResult};
pub use search::{
    generate_dense, generate_sparse, DenseTool, DropKernel, SearchStrategy, ToolPath,
};
pub use tiling::{estimate_memory, plan_tiles, MemoryEstimate, Tile, TilePlanner};
