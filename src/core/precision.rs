//! Precision handling for constraint solving
//!
//! Provides epsilon constants and traits for floating-point comparison
//! with configurable tolerance levels. Every satisfaction test and every
//! merge consistency check in the crate goes through `tol_eq` so that the
//! whole solver agrees on what "equal" means.

use std::f64::consts::PI;

use crate::core::math::Position;

/// Rough precision - for coarse comparisons (1e-6)
pub const EPSILON_ROUGH: f64 = 1e-6;

/// Normal precision - standard geometric operations (1e-9)
pub const EPSILON_NORMAL: f64 = 1e-9;

/// Fine precision - high-precision operations (1e-12)
pub const EPSILON_FINE: f64 = 1e-12;

/// Default epsilon value (normal precision)
pub const EPSILON: f64 = EPSILON_NORMAL;

/// Tolerance used for constraint satisfaction tests.
///
/// Coarser than [`EPSILON`]: solutions travel through chains of rigid
/// transformations before they are verified, and user-supplied positions
/// are rarely exact.
pub const SATISFACTION_TOLERANCE: f64 = EPSILON_ROUGH;

/// Two times PI
pub const TAU: f64 = 2.0 * PI;

/// Tolerance comparison of two scalars.
///
/// Hybrid absolute/relative test: values within `SATISFACTION_TOLERANCE`
/// scaled by their magnitude compare equal, so both near-zero residuals and
/// large coordinates behave sensibly.
#[inline]
pub fn tol_eq(x: f64, y: f64) -> bool {
    (x - y).abs() <= SATISFACTION_TOLERANCE * f64::max(1.0, f64::max(x.abs(), y.abs()))
}

/// Trait for approximate equality comparison with tolerance
pub trait ApproxEq {
    /// Check if two values are approximately equal using default epsilon
    fn approx_eq(&self, other: &Self) -> bool;

    /// Check if two values are approximately equal using custom epsilon
    fn approx_eq_eps(&self, other: &Self, epsilon: f64) -> bool;

    /// Check if value is approximately zero using default epsilon
    fn approx_zero(&self) -> bool;

    /// Check if value is approximately zero using custom epsilon
    fn approx_zero_eps(&self, epsilon: f64) -> bool;
}

impl ApproxEq for f64 {
    #[inline]
    fn approx_eq(&self, other: &Self) -> bool {
        (self - other).abs() < EPSILON
    }

    #[inline]
    fn approx_eq_eps(&self, other: &Self, epsilon: f64) -> bool {
        (self - other).abs() < epsilon
    }

    #[inline]
    fn approx_zero(&self) -> bool {
        self.abs() < EPSILON
    }

    #[inline]
    fn approx_zero_eps(&self, epsilon: f64) -> bool {
        self.abs() < epsilon
    }
}

impl ApproxEq for Position {
    #[inline]
    fn approx_eq(&self, other: &Self) -> bool {
        self.approx_eq_eps(other, EPSILON)
    }

    #[inline]
    fn approx_eq_eps(&self, other: &Self, epsilon: f64) -> bool {
        self.len() == other.len() && (self - other).norm() < epsilon
    }

    #[inline]
    fn approx_zero(&self) -> bool {
        self.approx_zero_eps(EPSILON)
    }

    #[inline]
    fn approx_zero_eps(&self, epsilon: f64) -> bool {
        self.norm() < epsilon
    }
}

/// Normalize an angle to the range [0, 2π)
#[inline]
pub fn normalize_angle(angle: f64) -> f64 {
    let mut normalized = angle % TAU;
    if normalized < 0.0 {
        normalized += TAU;
    }
    normalized
}

/// Normalize an angle to the range [-π, π)
#[inline]
pub fn normalize_angle_signed(angle: f64) -> f64 {
    let mut normalized = angle % TAU;
    if normalized >= PI {
        normalized -= TAU;
    } else if normalized < -PI {
        normalized += TAU;
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::point2;

    #[test]
    fn test_approx_eq_f64() {
        assert!(1.0.approx_eq(&1.0));
        assert!(1.0.approx_eq(&(1.0 + EPSILON / 2.0)));
        assert!(!1.0.approx_eq(&(1.0 + EPSILON * 2.0)));
    }

    #[test]
    fn test_tol_eq_absolute() {
        assert!(tol_eq(0.0, 0.0));
        assert!(tol_eq(1.0, 1.0 + 1e-9));
        assert!(!tol_eq(1.0, 1.0 + 1e-3));
    }

    #[test]
    fn test_tol_eq_relative() {
        // 1e-3 apart but the magnitudes are 1e6, well within relative tolerance
        assert!(tol_eq(1.0e6, 1.0e6 + 1.0e-3));
        assert!(!tol_eq(1.0e6, 1.0e6 + 10.0));
    }

    #[test]
    fn test_approx_eq_position() {
        let a = point2(1.0, 2.0);
        let b = point2(1.0, 2.0 + EPSILON / 10.0);
        assert!(a.approx_eq(&b));
        assert!(!a.approx_eq(&point2(1.0, 2.1)));
    }

    #[test]
    fn test_normalize_angle() {
        assert!(normalize_angle(0.0).approx_eq(&0.0));
        assert!(normalize_angle(TAU).approx_eq(&0.0));
        assert!(normalize_angle(-PI).approx_eq(&PI));
        assert!(normalize_angle(PI).approx_eq(&PI));
    }

    #[test]
    fn test_normalize_angle_signed() {
        assert!(normalize_angle_signed(0.0).approx_eq(&0.0));
        assert!(normalize_angle_signed(PI).approx_eq(&-PI));
        assert!(normalize_angle_signed(-PI).approx_eq(&-PI));
        assert!(normalize_angle_signed(TAU).approx_eq(&0.0));
    }
}
