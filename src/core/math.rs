//! Mathematics module - positions, distances, and angles
//!
//! Point variables live in a problem of runtime dimension 2 or 3, so
//! positions are dynamically sized vectors built on nalgebra. The fixed-size
//! `Vector2`/`Vector3` types are used internally where the arithmetic is
//! dimension-specific (signed 2D angles, 3D frames).

use nalgebra::{DVector, Vector2, Vector3};

use super::precision::ApproxEq;

/// A point variable name.
///
/// Any hashable identifier works for the solver; strings keep problems
/// readable and serializable.
pub type Var = String;

/// A point position: a real-valued vector of length = problem dimension.
pub type Position = DVector<f64>;

/// Create a 2D position
#[inline]
pub fn point2(x: f64, y: f64) -> Position {
    DVector::from_vec(vec![x, y])
}

/// Create a 3D position
#[inline]
pub fn point3(x: f64, y: f64, z: f64) -> Position {
    DVector::from_vec(vec![x, y, z])
}

/// View a position as a fixed 2D vector (extra components ignored)
#[inline]
pub fn as_vector2(p: &Position) -> Vector2<f64> {
    Vector2::new(p[0], p[1])
}

/// View a position as a fixed 3D vector (missing components read as zero)
#[inline]
pub fn as_vector3(p: &Position) -> Vector3<f64> {
    Vector3::new(p[0], p[1], if p.len() > 2 { p[2] } else { 0.0 })
}

impl ApproxEq for Vector2<f64> {
    #[inline]
    fn approx_eq(&self, other: &Self) -> bool {
        self.approx_eq_eps(other, super::precision::EPSILON)
    }

    #[inline]
    fn approx_eq_eps(&self, other: &Self, epsilon: f64) -> bool {
        (self - other).norm() < epsilon
    }

    #[inline]
    fn approx_zero(&self) -> bool {
        self.approx_zero_eps(super::precision::EPSILON)
    }

    #[inline]
    fn approx_zero_eps(&self, epsilon: f64) -> bool {
        self.norm() < epsilon
    }
}

impl ApproxEq for Vector3<f64> {
    #[inline]
    fn approx_eq(&self, other: &Self) -> bool {
        self.approx_eq_eps(other, super::precision::EPSILON)
    }

    #[inline]
    fn approx_eq_eps(&self, other: &Self, epsilon: f64) -> bool {
        (self - other).norm() < epsilon
    }

    #[inline]
    fn approx_zero(&self) -> bool {
        self.approx_zero_eps(super::precision::EPSILON)
    }

    #[inline]
    fn approx_zero_eps(&self, epsilon: f64) -> bool {
        self.norm() < epsilon
    }
}

/// Euclidean distance between two positions.
pub fn distance(p: &Position, q: &Position) -> f64 {
    (p - q).norm()
}

/// Angle at `b` in the triangle `a`-`b`-`c`.
///
/// In 2D the angle is signed, measured counterclockwise from the ray `b→a`
/// to the ray `b→c`, in (-π, π]. In 3D the angle is unsigned, in [0, π].
/// Returns `None` when either ray is degenerate (a or c coincides with b).
pub fn angle_at(a: &Position, b: &Position, c: &Position) -> Option<f64> {
    if a.len() == 2 {
        let u = as_vector2(a) - as_vector2(b);
        let v = as_vector2(c) - as_vector2(b);
        if u.approx_zero() || v.approx_zero() {
            return None;
        }
        // perp-dot gives the signed area, dot the cosine; atan2 keeps the sign
        Some((u.perp(&v)).atan2(u.dot(&v)))
    } else {
        let u = as_vector3(a) - as_vector3(b);
        let v = as_vector3(c) - as_vector3(b);
        if u.approx_zero() || v.approx_zero() {
            return None;
        }
        let cos = (u.dot(&v) / (u.norm() * v.norm())).clamp(-1.0, 1.0);
        Some(cos.acos())
    }
}

/// Orientation sign of an ordered point tuple.
///
/// 2D: sign of the cross product of `(p1-p0, p2-p0)` for the first three
/// points. 3D: sign of the determinant of the first four points. Returns 0
/// for degenerate (collinear/coplanar) tuples or when too few points are
/// given. Prototype-based solution selection compares this sign between a
/// candidate configuration and the prototype.
pub fn orientation(points: &[&Position]) -> i8 {
    let dim = points.first().map(|p| p.len()).unwrap_or(0);
    let value = if dim == 2 && points.len() >= 3 {
        let u = as_vector2(points[1]) - as_vector2(points[0]);
        let v = as_vector2(points[2]) - as_vector2(points[0]);
        u.perp(&v)
    } else if dim == 3 && points.len() >= 4 {
        let u = as_vector3(points[1]) - as_vector3(points[0]);
        let v = as_vector3(points[2]) - as_vector3(points[0]);
        let w = as_vector3(points[3]) - as_vector3(points[0]);
        u.cross(&v).dot(&w)
    } else {
        0.0
    };
    if value.approx_zero_eps(super::precision::EPSILON_ROUGH) {
        0
    } else if value > 0.0 {
        1
    } else {
        -1
    }
}
