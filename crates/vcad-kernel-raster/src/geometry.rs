//! Geometry primitives: vectors, bounding boxes and triangles.

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{RasterError, Result};
use crate::rasterize::FilterMode;

/// A vector (or point) in 3D space.
pub type Vec3 = Vector3<f64>;

/// Flat sequence of points produced by one rasterization call.
pub type PointSet = Vec<Vec3>;

/// Twice the area below which a triangle is considered degenerate.
pub const DEGENERATE_AREA: f64 = 1e-12;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl BoundingBox {
    /// Create a bounding box from two corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// A zero-size box at the origin.
    pub fn zero() -> Self {
        Self::new(Vec3::zeros(), Vec3::zeros())
    }

    /// Compute the box enclosing a set of points, or `None` if empty.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self::new(*first, *first);
        for p in iter {
            bounds.include(p);
        }
        Some(bounds)
    }

    /// Compute the box enclosing a set of triangles, or `None` if empty.
    pub fn from_triangles(triangles: &[Triangle]) -> Option<Self> {
        Self::from_points(triangles.iter().flat_map(|t| [&t.v0, &t.v1, &t.v2]))
    }

    /// Grow the box to contain `p`.
    pub fn include(&mut self, p: &Vec3) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    /// Check that every coordinate is finite and `min <= max` on every axis.
    pub fn validate(&self) -> Result<()> {
        let finite = self.min.iter().chain(self.max.iter()).all(|c| c.is_finite());
        if !finite {
            return Err(RasterError::InvalidBounds(format!("{self:?} is not finite")));
        }
        if (0..3).any(|axis| self.min[axis] > self.max[axis]) {
            return Err(RasterError::InvalidBounds(format!(
                "min {:?} exceeds max {:?}",
                self.min.as_slice(),
                self.max.as_slice()
            )));
        }
        Ok(())
    }

    /// Extent along X.
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    /// Extent along Y.
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    /// Box grown by `margin` on every side in X and Y. Z is unchanged.
    pub fn expanded_xy(&self, margin: f64) -> Self {
        Self::new(
            Vec3::new(self.min.x - margin, self.min.y - margin, self.min.z),
            Vec3::new(self.max.x + margin, self.max.y + margin, self.max.z),
        )
    }

    /// Whether the XY footprints of two boxes overlap (touching counts).
    pub fn intersects_xy(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }
}

/// A triangle with precomputed 2D bounds and facing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    /// First vertex.
    pub v0: Vec3,
    /// Second vertex.
    pub v1: Vec3,
    /// Third vertex.
    pub v2: Vec3,
    /// Minimum X of the projected triangle.
    pub bbox_min_x: f64,
    /// Maximum X of the projected triangle.
    pub bbox_max_x: f64,
    /// Minimum Y of the projected triangle.
    pub bbox_min_y: f64,
    /// Maximum Y of the projected triangle.
    pub bbox_max_y: f64,
    /// Z component of the unit normal (0 for degenerate triangles).
    pub normal_z: f64,
    /// Length of `(v1 - v0) x (v2 - v0)`, twice the triangle area.
    pub double_area: f64,
}

impl Triangle {
    /// Create a triangle from counter-clockwise (outward facing) vertices.
    pub fn new(v0: Vec3, v1: Vec3, v2: Vec3) -> Self {
        let n = (v1 - v0).cross(&(v2 - v0));
        let double_area = n.norm();
        let normal_z = if double_area > DEGENERATE_AREA {
            n.z / double_area
        } else {
            0.0
        };

        Self {
            v0,
            v1,
            v2,
            bbox_min_x: v0.x.min(v1.x).min(v2.x),
            bbox_max_x: v0.x.max(v1.x).max(v2.x),
            bbox_min_y: v0.y.min(v1.y).min(v2.y),
            bbox_max_y: v0.y.max(v1.y).max(v2.y),
            normal_z,
            double_area,
        }
    }

    /// Whether the triangle has (near) zero area.
    pub fn is_degenerate(&self) -> bool {
        self.double_area <= DEGENERATE_AREA
    }

    /// Whether the triangle survives `filter`.
    ///
    /// Degenerate triangles and triangles whose normal is within `epsilon`
    /// of horizontal never pass.
    pub fn passes(&self, filter: FilterMode, epsilon: f64) -> bool {
        if self.is_degenerate() {
            return false;
        }
        match filter {
            FilterMode::Terrain => self.normal_z > epsilon,
            FilterMode::Tool => self.normal_z < -epsilon,
        }
    }

    /// Minimum and maximum Z of the vertices.
    pub fn z_range(&self) -> (f64, f64) {
        (
            self.v0.z.min(self.v1.z).min(self.v2.z),
            self.v0.z.max(self.v1.z).max(self.v2.z),
        )
    }

    /// The same triangle transformed by `rotation`.
    pub fn rotated(&self, rotation: &Rotation3<f64>) -> Self {
        Self::new(rotation * self.v0, rotation * self.v1, rotation * self.v2)
    }

    /// The same triangle moved by `offset`.
    pub fn translated(&self, offset: &Vec3) -> Self {
        Self::new(self.v0 + offset, self.v1 + offset, self.v2 + offset)
    }
}

/// Decode a flat triangle soup (9 floats per triangle, no indexing).
pub fn triangles_from_flat(coords: &[f32]) -> Result<Vec<Triangle>> {
    if coords.len() % 9 != 0 {
        return Err(RasterError::MalformedTriangles(coords.len()));
    }

    coords
        .chunks_exact(9)
        .enumerate()
        .map(|(i, c)| {
            if c.iter().any(|v| !v.is_finite()) {
                return Err(RasterError::NonFiniteVertex(i));
            }
            let v = |k: usize| Vec3::new(c[k] as f64, c[k + 1] as f64, c[k + 2] as f64);
            Ok(Triangle::new(v(0), v(3), v(6)))
        })
        .collect()
}
