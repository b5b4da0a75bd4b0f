//! Vertical ray / triangle intersection.

use crate::geometry::Triangle;

/// Default determinant epsilon for rejecting rays parallel to a triangle.
pub const RAY_EPSILON: f64 = 1e-7;

/// Intersect the ray `(x, y, origin_z) + t * (0, 0, 1)` with a triangle.
///
/// Möller–Trumbore with the direction fixed to +Z. Returns the Z coordinate
/// of the hit, or `None` for near-parallel rays, misses and hits at `t <= 0`.
#[inline]
pub fn intersect_up(tri: &Triangle, x: f64, y: f64, origin_z: f64, epsilon: f64) -> Option<f64> {
    let e1 = tri.v1 - tri.v0;
    let e2 = tri.v2 - tri.v0;

    // h = dir x e2 with dir = +Z
    let hx = -e2.y;
    let hy = e2.x;
    let det = e1.x * hx + e1.y * hy;
    if det.abs() < epsilon {
        return None;
    }
    let inv_det = 1.0 / det;

    let sx = x - tri.v0.x;
    let sy = y - tri.v0.y;
    let sz = origin_z - tri.v0.z;

    let u = inv_det * (sx * hx + sy * hy);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    // q = s x e1
    let qx = sy * e1.z - sz * e1.y;
    let qy = sz * e1.x - sx * e1.z;
    let qz = sx * e1.y - sy * e1.x;

    let v = inv_det * qz;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = inv_det * (e2.x * qx + e2.y * qy + e2.z * qz);
    if t > epsilon {
        Some(origin_z + t)
    } else {
        None
    }
}
