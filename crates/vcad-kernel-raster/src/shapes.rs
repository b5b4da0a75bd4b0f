//! Triangle-soup generators for common stock, terrain and cutter shapes.
//!
//! Every generator returns the flat `[x0, y0, z0, x1, ...]` layout accepted
//! by [`triangles_from_flat`](crate::triangles_from_flat), nine floats per
//! triangle, wound counter-clockwise when seen from outside.

use std::f64::consts::{PI, TAU};

type P = [f64; 3];

fn push_tri(out: &mut Vec<f32>, a: P, b: P, c: P) {
    for p in [a, b, c] {
        out.extend(p.iter().map(|&v| v as f32));
    }
}

/// Push the quad `a b c d` (counter-clockwise from outside) as two triangles.
fn push_quad(out: &mut Vec<f32>, a: P, b: P, c: P, d: P) {
    push_tri(out, a, b, c);
    push_tri(out, a, c, d);
}

/// Axis-aligned box.
pub fn box_mesh(min: P, max: P) -> Vec<f32> {
    let [x0, y0, z0] = min;
    let [x1, y1, z1] = max;
    let mut out = Vec::with_capacity(12 * 9);
    // bottom, top
    push_quad(&mut out, [x0, y0, z0], [x0, y1, z0], [x1, y1, z0], [x1, y0, z0]);
    push_quad(&mut out, [x0, y0, z1], [x1, y0, z1], [x1, y1, z1], [x0, y1, z1]);
    // -Y, +Y
    push_quad(&mut out, [x0, y0, z0], [x1, y0, z0], [x1, y0, z1], [x0, y0, z1]);
    push_quad(&mut out, [x0, y1, z0], [x0, y1, z1], [x1, y1, z1], [x1, y1, z0]);
    // -X, +X
    push_quad(&mut out, [x0, y0, z0], [x0, y0, z1], [x0, y1, z1], [x0, y1, z0]);
    push_quad(&mut out, [x1, y0, z0], [x1, y1, z0], [x1, y1, z1], [x1, y0, z1]);
    out
}

/// Latitude/longitude sphere. `rings` should be even so the equator is a ring.
pub fn uv_sphere(center: P, radius: f64, segments: usize, rings: usize) -> Vec<f32> {
    let segments = segments.max(3);
    let rings = rings.max(2);
    let point = |i: usize, j: usize| -> P {
        let lat = -PI / 2.0 + PI * i as f64 / rings as f64;
        let lon = TAU * (j % segments) as f64 / segments as f64;
        [
            center[0] + radius * lat.cos() * lon.cos(),
            center[1] + radius * lat.cos() * lon.sin(),
            center[2] + radius * lat.sin(),
        ]
    };

    let mut out = Vec::new();
    for i in 0..rings {
        for j in 0..segments {
            let a = point(i, j);
            let b = point(i, j + 1);
            let c = point(i + 1, j + 1);
            let d = point(i + 1, j);
            if i == 0 {
                push_tri(&mut out, a, c, d);
            } else if i == rings - 1 {
                push_tri(&mut out, a, b, c);
            } else {
                push_quad(&mut out, a, b, c, d);
            }
        }
    }
    out
}

/// Ball end mill with its tip at the origin.
///
/// Only the spherical end matters for a drop test, so the cutter is a sphere
/// of the tool diameter resting on `z = 0`.
pub fn ball_end_mill(diameter: f64, segments: usize) -> Vec<f32> {
    let r = diameter / 2.0;
    let rings = (segments / 2).max(2);
    uv_sphere([0.0, 0.0, r], r, segments, rings + rings % 2)
}

/// Flat end mill: a closed cylinder standing on `z = 0`.
pub fn flat_end_mill(diameter: f64, length: f64, segments: usize) -> Vec<f32> {
    let r = diameter / 2.0;
    let segments = segments.max(3);
    let ring = |j: usize, z: f64| -> P {
        let a = TAU * (j % segments) as f64 / segments as f64;
        [r * a.cos(), r * a.sin(), z]
    };

    let mut out = Vec::new();
    for j in 0..segments {
        push_tri(&mut out, [0.0, 0.0, 0.0], ring(j + 1, 0.0), ring(j, 0.0));
        push_tri(&mut out, [0.0, 0.0, length], ring(j, length), ring(j + 1, length));
        push_quad(
            &mut out,
            ring(j, 0.0),
            ring(j + 1, 0.0),
            ring(j + 1, length),
            ring(j, length),
        );
    }
    out
}

/// Closed cylinder lying on the X axis, from `x = 0` to `x = length`.
pub fn cylinder_x(length: f64, radius: f64, segments: usize) -> Vec<f32> {
    let segments = segments.max(3);
    let ring = |j: usize, x: f64| -> P {
        let a = TAU * (j % segments) as f64 / segments as f64;
        [x, radius * a.cos(), radius * a.sin()]
    };

    let mut out = Vec::new();
    for j in 0..segments {
        push_tri(&mut out, [0.0, 0.0, 0.0], ring(j + 1, 0.0), ring(j, 0.0));
        push_tri(&mut out, [length, 0.0, 0.0], ring(j, length), ring(j + 1, length));
        push_quad(
            &mut out,
            ring(j, 0.0),
            ring(j + 1, 0.0),
            ring(j + 1, length),
            ring(j, length),
        );
    }
    out
}

fn wave(x: f64, y: f64, amplitude: f64) -> f64 {
    amplitude * (1.0 + (x * 0.35).sin() * (y * 0.27).cos())
}

fn divisions(extent: f64, resolution: f64) -> usize {
    ((extent / resolution).ceil() as usize).max(1)
}

/// Open wavy surface over `[0, size_x] x [0, size_y]`, heights in `[0, 2 * amplitude]`.
pub fn wavy_terrain(size_x: f64, size_y: f64, resolution: f64, amplitude: f64) -> Vec<f32> {
    let nx = divisions(size_x, resolution);
    let ny = divisions(size_y, resolution);
    let top = |i: usize, j: usize| -> P {
        let x = size_x * i as f64 / nx as f64;
        let y = size_y * j as f64 / ny as f64;
        [x, y, wave(x, y, amplitude)]
    };
    wavy_top(nx, ny, &top)
}

/// Closed block with a wavy top surface, standing on `z = 0`.
///
/// The top reaches `height` at its crests and dips by up to
/// `2 * amplitude` in the troughs.
pub fn terrain_block(size_x: f64, size_y: f64, height: f64, resolution: f64, amplitude: f64) -> Vec<f32> {
    let nx = divisions(size_x, resolution);
    let ny = divisions(size_y, resolution);
    let xs = |i: usize| size_x * i as f64 / nx as f64;
    let ys = |j: usize| size_y * j as f64 / ny as f64;
    let top = |i: usize, j: usize| -> P {
        let (x, y) = (xs(i), ys(j));
        [x, y, height - 2.0 * amplitude + wave(x, y, amplitude)]
    };
    let base = |i: usize, j: usize| -> P { [xs(i), ys(j), 0.0] };

    let mut out = wavy_top(nx, ny, &top);
    push_quad(&mut out, base(0, 0), base(0, ny), base(nx, ny), base(nx, 0));
    for i in 0..nx {
        push_quad(&mut out, base(i, 0), base(i + 1, 0), top(i + 1, 0), top(i, 0));
        push_quad(&mut out, base(i + 1, ny), base(i, ny), top(i, ny), top(i + 1, ny));
    }
    for j in 0..ny {
        push_quad(&mut out, base(0, j + 1), base(0, j), top(0, j), top(0, j + 1));
        push_quad(&mut out, base(nx, j), base(nx, j + 1), top(nx, j + 1), top(nx, j));
    }
    out
}

fn wavy_top(nx: usize, ny: usize, top: &dyn Fn(usize, usize) -> P) -> Vec<f32> {
    let mut out = Vec::with_capacity(nx * ny * 18);
    for j in 0..ny {
        for i in 0..nx {
            push_quad(&mut out, top(i, j), top(i + 1, j), top(i + 1, j + 1), top(i, j + 1));
        }
    }
    out
}
