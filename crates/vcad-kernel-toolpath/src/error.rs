//! Error types for toolpath generation.

use thiserror::Error;
use vcad_kernel_raster::{BoundingBox, RasterError};

/// Errors that can occur while planning or generating toolpaths.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolpathError {
    /// Caller supplied parameters that cannot be processed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Triangle decoding or height-field construction failed.
    #[error(transparent)]
    Raster(#[from] RasterError),

    /// No compute context could be acquired.
    #[error("compute resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Even the smallest tile does not fit the memory budget.
    #[error(
        "tile budget exceeded: a {min_tile_size}-unit tile at step {step} needs \
         {required_bytes} bytes but the budget is {budget_bytes} (bounds {bounds:?})"
    )]
    BudgetExceeded {
        /// Bounds that were being tiled.
        bounds: BoundingBox,
        /// Grid step requested.
        step: f64,
        /// Configured minimum tile side.
        min_tile_size: f64,
        /// Bytes the minimum tile would need (`u64::MAX` when the count
        /// itself overflows).
        required_bytes: u64,
        /// Bytes available per dispatch.
        budget_bytes: u64,
    },

    /// A worker stopped without delivering its result.
    #[error("worker {0} stopped before returning its result")]
    WorkerLost(usize),
}

/// Coarse classification of a [`ToolpathError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself was malformed.
    BadInput,
    /// Compute resources could not be acquired or were lost.
    ResourceUnavailable,
    /// The problem does not fit the memory budget at this step size.
    BudgetExceeded,
}

impl ToolpathError {
    /// Which of the three caller-visible failure classes this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolpathError::InvalidInput(_) | ToolpathError::Raster(_) => ErrorKind::BadInput,
            ToolpathError::ResourceUnavailable(_) | ToolpathError::WorkerLost(_) => {
                ErrorKind::ResourceUnavailable
            }
            ToolpathError::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
        }
    }
}

/// Result type for toolpath operations.
pub type Result<T> = std::result::Result<T, ToolpathError>;
