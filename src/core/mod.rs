//! Core module - foundational math and precision handling

pub mod math;
pub mod precision;

pub use math::{angle_at, distance, orientation, point2, point3, Position, Var};
pub use precision::{tol_eq, ApproxEq, EPSILON, EPSILON_FINE, EPSILON_NORMAL, EPSILON_ROUGH};
