//! Error types for rasterization.

use thiserror::Error;

/// Errors that can occur while decoding triangles or building height fields.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RasterError {
    /// Triangle buffer does not hold whole triangles.
    #[error("triangle buffer has {0} floats, expected a multiple of 9")]
    MalformedTriangles(usize),

    /// A vertex coordinate is NaN or infinite.
    #[error("triangle {0} has a non-finite vertex coordinate")]
    NonFiniteVertex(usize),

    /// Grid step is zero, negative or not finite.
    #[error("step size must be positive and finite, got {0}")]
    InvalidStep(f64),

    /// Bounding box is inverted or not finite.
    #[error("invalid bounds: {0}")]
    InvalidBounds(String),

    /// Tool height map has no occupied cells.
    #[error("tool has no occupied cells")]
    EmptyTool,
}

/// Result type for rasterization operations.
pub type Result<T> = std::result::Result<T, RasterError>;

/// Reject step sizes that cannot define a grid.
pub(crate) fn check_step(step: f64) -> Result<()> {
    if step.is_finite() && step > 0.0 {
        Ok(())
    } else {
        Err(RasterError::InvalidStep(step))
    }
}
