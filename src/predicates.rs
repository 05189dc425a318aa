//! Geometric predicates.
//!
//! The tolerance-based predicates (`barycentric`, `point_in_triangle`, `point_in_angle`,
//! `lifted_det`, `side_of_line`) drive the engine. [`orient_2d`] is exact and is used where a
//! wrong sign would break the mesh: the orientation guard on splits and validation.
//!
//! With feature `robust` (default): uses the pure-Rust [robust] crate.
//!
//! With feature `geogram`: uses [geogram_predicates] (FFI to C++ geogram).

use nalgebra::{Matrix4, Vector2};

use crate::utils::types::Vertex2;

// Exactly one of robust or geogram must be enabled.
#[cfg(not(any(feature = "robust", feature = "geogram")))]
compile_error!(
    "Exactly one of features 'robust' or 'geogram' must be enabled. Use default (robust) or --no-default-features --features geogram."
);

#[cfg(all(feature = "robust", feature = "geogram"))]
compile_error!(
    "Features 'robust' and 'geogram' are mutually exclusive. For geogram use --no-default-features --features geogram."
);

#[cfg(all(feature = "robust", not(feature = "geogram")))]
mod imp {
    use super::*;
    use robust::{orient2d, Coord};

    #[inline]
    fn coord2(p: &Vertex2) -> Coord<f64> {
        Coord { x: p[0], y: p[1] }
    }

    #[inline]
    pub fn orient_2d(a: &Vertex2, b: &Vertex2, c: &Vertex2) -> i8 {
        let r = orient2d(coord2(a), coord2(b), coord2(c));
        if r > 0.0 {
            1
        } else if r < 0.0 {
            -1
        } else {
            0
        }
    }
}

#[cfg(all(feature = "geogram", not(feature = "robust")))]
mod imp {
    use super::*;
    use geogram_predicates as gp;

    #[inline]
    pub fn orient_2d(a: &Vertex2, b: &Vertex2, c: &Vertex2) -> i8 {
        let r = gp::orient_2d(a, b, c);
        if r > 0i16 {
            1
        } else if r < 0i16 {
            -1
        } else {
            0
        }
    }
}

/// Exact orientation of `abc`: `1` counter-clockwise, `-1` clockwise, `0` collinear (y-up).
pub use imp::orient_2d;

/// Returns `true` if `abc` is strictly clockwise, exactly evaluated.
#[inline]
pub fn is_clockwise(a: &Vertex2, b: &Vertex2, c: &Vertex2) -> bool {
    orient_2d(a, b, c) < 0
}

/// Returns the two barycentric components of `p` in the triangle `abc`.
///
/// `u` is the weight along `c - a`, `v` the weight along `b - a`.
/// A degenerate triangle yields non-finite values, which fail every containment test.
pub fn barycentric(p: &Vertex2, a: &Vertex2, b: &Vertex2, c: &Vertex2) -> (f64, f64) {
    let a = Vector2::new(a[0], a[1]);
    let v0 = Vector2::new(c[0], c[1]) - a;
    let v1 = Vector2::new(b[0], b[1]) - a;
    let v2 = Vector2::new(p[0], p[1]) - a;

    let dot00 = v0.dot(&v0);
    let dot01 = v0.dot(&v1);
    let dot02 = v0.dot(&v2);
    let dot11 = v1.dot(&v1);
    let dot12 = v1.dot(&v2);

    let norm = dot00 * dot11 - dot01 * dot01;
    let u = (dot11 * dot02 - dot01 * dot12) / norm;
    let v = (dot00 * dot12 - dot01 * dot02) / norm;

    (u, v)
}

/// Returns `true` if `p` is inside the triangle `abc`, up to `eps` in barycentric units.
pub fn point_in_triangle(p: &Vertex2, a: &Vertex2, b: &Vertex2, c: &Vertex2, eps: f64) -> bool {
    let (u, v) = barycentric(p, a, b, c);
    u >= -eps && v >= -eps && u + v < 1.0 + 2.0 * eps
}

/// Returns `true` if `p` is inside the (infinite) wedge at `a` spanned by `ab` and `ac`.
pub fn point_in_angle(p: &Vertex2, a: &Vertex2, b: &Vertex2, c: &Vertex2, eps: f64) -> bool {
    let (u, v) = barycentric(p, a, b, c);
    u >= -eps && v >= -eps
}

/// How deep `p` lies inside `abc`: the smallest of its three barycentric coordinates.
///
/// Negative when `p` is outside.
pub fn depth_in_triangle(p: &Vertex2, a: &Vertex2, b: &Vertex2, c: &Vertex2) -> f64 {
    let (u, v) = barycentric(p, a, b, c);
    u.min(v).min(1.0 - u - v)
}

/// Determinant of the four points lifted to `(x, y, x² + y², 1)`, one row per point.
///
/// For a counter-clockwise `abc` it is positive iff `d` lies inside the circumcircle of `abc`;
/// for a clockwise `abc` the sign is reversed.
pub fn lifted_det(a: &Vertex2, b: &Vertex2, c: &Vertex2, d: &Vertex2) -> f64 {
    let lift = |p: &Vertex2| p[0] * p[0] + p[1] * p[1];

    #[rustfmt::skip]
    let m = Matrix4::new(
        a[0], a[1], lift(a), 1.0,
        b[0], b[1], lift(b), 1.0,
        c[0], c[1], lift(c), 1.0,
        d[0], d[1], lift(d), 1.0,
    );

    m.determinant()
}

/// Doubled signed area of `abp`: positive if `p` is left of the directed line `a -> b`.
#[inline]
pub fn side_of_line(a: &Vertex2, b: &Vertex2, p: &Vertex2) -> f64 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

/// Squared euclidean distance.
#[inline]
pub fn dist_sq(a: &Vertex2, b: &Vertex2) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}
