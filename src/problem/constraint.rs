//! Constraint types
//!
//! Four constraint variants are supported: pairwise distance, triangle
//! angle, absolute fix and opaque selection. The parametric variants carry
//! a single parameter (scalar distance, scalar angle, vector position);
//! parameter edits go through [`GeometricProblem::set_parameter`] so the
//! change is re-broadcast to listeners.
//!
//! [`GeometricProblem::set_parameter`]: super::GeometricProblem::set_parameter

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ProblemError;
use crate::cluster::configuration::{Configuration, SelectionRule};
use crate::core::math::{angle_at, distance, Position, Var};
use crate::core::precision::tol_eq;

/// Unique identifier for a constraint, assigned on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstraintId(Uuid);

impl ConstraintId {
    /// Create a new unique constraint ID
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    #[inline]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConstraintId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "constraint-{}", &self.0.to_string()[..8])
    }
}

/// A constraint parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    /// Distance parameter of a distance constraint.
    Distance(f64),
    /// Angle parameter (radians) of an angle constraint.
    Angle(f64),
    /// Position parameter of a fix constraint.
    Position(Position),
}

/// The variant and payload of a constraint.
#[derive(Debug, Clone)]
pub enum ConstraintKind {
    /// ‖pos(a) − pos(b)‖ = distance.
    Distance {
        /// First endpoint.
        a: Var,
        /// Second endpoint.
        b: Var,
        /// Required distance.
        distance: f64,
    },
    /// The angle at apex `b` in the triangle `a`-`b`-`c` equals `angle`.
    /// Signed in 2D, unsigned in 3D.
    Angle {
        /// First ray endpoint.
        a: Var,
        /// The apex.
        b: Var,
        /// Second ray endpoint.
        c: Var,
        /// Required angle in radians.
        angle: f64,
    },
    /// pos(variable) = position, componentwise.
    Fix {
        /// The fixed variable.
        variable: Var,
        /// Required absolute position.
        position: Position,
    },
    /// An opaque acceptance predicate; never becomes a primitive cluster.
    Selection(Arc<dyn SelectionRule>),
}

/// A geometric constraint over point variables.
#[derive(Debug, Clone)]
pub struct Constraint {
    id: ConstraintId,
    kind: ConstraintKind,
}

impl Constraint {
    /// Create a distance constraint between two point variables.
    pub fn distance(a: impl Into<Var>, b: impl Into<Var>, distance: f64) -> Self {
        Constraint {
            id: ConstraintId::new(),
            kind: ConstraintKind::Distance {
                a: a.into(),
                b: b.into(),
                distance,
            },
        }
    }

    /// Create an angle constraint with apex `b`.
    pub fn angle(a: impl Into<Var>, b: impl Into<Var>, c: impl Into<Var>, angle: f64) -> Self {
        Constraint {
            id: ConstraintId::new(),
            kind: ConstraintKind::Angle {
                a: a.into(),
                b: b.into(),
                c: c.into(),
                angle,
            },
        }
    }

    /// Create a fix constraint pinning a variable to an absolute position.
    pub fn fix(variable: impl Into<Var>, position: Position) -> Self {
        Constraint {
            id: ConstraintId::new(),
            kind: ConstraintKind::Fix {
                variable: variable.into(),
                position,
            },
        }
    }

    /// Create a selection constraint from an opaque rule.
    pub fn selection(rule: Arc<dyn SelectionRule>) -> Self {
        Constraint {
            id: ConstraintId::new(),
            kind: ConstraintKind::Selection(rule),
        }
    }

    /// The constraint's identity handle.
    pub fn id(&self) -> ConstraintId {
        self.id
    }

    /// The constraint's variant and payload.
    pub fn kind(&self) -> &ConstraintKind {
        &self.kind
    }

    /// Whether this is a distance constraint.
    pub fn is_distance(&self) -> bool {
        matches!(self.kind, ConstraintKind::Distance { .. })
    }

    /// Whether this is a fix constraint.
    pub fn is_fix(&self) -> bool {
        matches!(self.kind, ConstraintKind::Fix { .. })
    }

    /// Whether this is a selection constraint.
    pub fn is_selection(&self) -> bool {
        matches!(self.kind, ConstraintKind::Selection(_))
    }

    /// The variables the constraint reads, in declaration order.
    pub fn variables(&self) -> Vec<Var> {
        match &self.kind {
            ConstraintKind::Distance { a, b, .. } => vec![a.clone(), b.clone()],
            ConstraintKind::Angle { a, b, c, .. } => vec![a.clone(), b.clone(), c.clone()],
            ConstraintKind::Fix { variable, .. } => vec![variable.clone()],
            ConstraintKind::Selection(rule) => rule.variables().to_vec(),
        }
    }

    /// The current parameter value of a parametric constraint.
    pub fn parameter(&self) -> Option<Parameter> {
        match &self.kind {
            ConstraintKind::Distance { distance, .. } => Some(Parameter::Distance(*distance)),
            ConstraintKind::Angle { angle, .. } => Some(Parameter::Angle(*angle)),
            ConstraintKind::Fix { position, .. } => Some(Parameter::Position(position.clone())),
            ConstraintKind::Selection(_) => None,
        }
    }

    /// Replace the parameter; fails when the value does not match the kind.
    pub(crate) fn set_parameter(&mut self, value: Parameter) -> Result<(), ProblemError> {
        match (&mut self.kind, value) {
            (ConstraintKind::Distance { distance, .. }, Parameter::Distance(d)) => {
                *distance = d;
                Ok(())
            }
            (ConstraintKind::Angle { angle, .. }, Parameter::Angle(theta)) => {
                *angle = theta;
                Ok(())
            }
            (ConstraintKind::Fix { position, .. }, Parameter::Position(p)) => {
                if p.len() != position.len() {
                    return Err(ProblemError::DimensionMismatch {
                        expected: position.len(),
                        got: p.len(),
                    });
                }
                *position = p;
                Ok(())
            }
            _ => Err(ProblemError::UnsupportedConstraint(
                "parameter value does not match the constraint kind".to_string(),
            )),
        }
    }

    /// Whether the mapping from variables to points satisfies the
    /// constraint within tolerance.
    ///
    /// A mapping missing any of the constraint's variables is unsatisfied.
    /// Angles are compared against the absolute parameter in 3D (unsigned)
    /// and against the signed parameter in 2D; an undefined angle (coincident
    /// points) is never satisfied. Fix compares componentwise over the
    /// parameter's components.
    pub fn satisfied(&self, mapping: &Configuration) -> bool {
        match &self.kind {
            ConstraintKind::Distance { a, b, distance: d } => {
                match (mapping.position(a), mapping.position(b)) {
                    (Some(pa), Some(pb)) => tol_eq(distance(pa, pb), *d),
                    _ => false,
                }
            }
            ConstraintKind::Angle { a, b, c, angle } => {
                let measured = match (mapping.position(a), mapping.position(b), mapping.position(c))
                {
                    (Some(pa), Some(pb), Some(pc)) => {
                        angle_at(pa, pb, pc).map(|m| (m, pa.len()))
                    }
                    _ => None,
                };
                match measured {
                    Some((m, len)) => {
                        // 3D angles are unsigned
                        let expected = if len >= 3 { angle.abs() } else { *angle };
                        tol_eq(m, expected)
                    }
                    None => false,
                }
            }
            ConstraintKind::Fix { variable, position } => match mapping.position(variable) {
                Some(actual) => {
                    actual.len() >= position.len()
                        && position
                            .iter()
                            .zip(actual.iter())
                            .all(|(want, have)| tol_eq(*want, *have))
                }
                None => false,
            },
            ConstraintKind::Selection(rule) => rule.test(mapping),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ConstraintKind::Distance { a, b, distance } => {
                write!(f, "distance({}, {}) = {:.4}", a, b, distance)
            }
            ConstraintKind::Angle { a, b, c, angle } => {
                write!(f, "angle({}, {}, {}) = {:.4} rad", a, b, c, angle)
            }
            ConstraintKind::Fix { variable, position } => {
                let coords: Vec<String> = position.iter().map(|x| format!("{:.4}", x)).collect();
                write!(f, "fix({}) = ({})", variable, coords.join(", "))
            }
            ConstraintKind::Selection(rule) => {
                let names: Vec<&str> = rule.variables().iter().map(String::as_str).collect();
                write!(f, "selection({})", names.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::{point2, point3};
    use std::f64::consts::FRAC_PI_2;

    fn mapping2(pairs: &[(&str, (f64, f64))]) -> Configuration {
        Configuration::from_pairs(
            pairs
                .iter()
                .map(|(v, (x, y))| (v.to_string(), point2(*x, *y))),
        )
    }

    #[test]
    fn test_distance_satisfied() {
        let con = Constraint::distance("A", "B", 5.0);
        assert!(con.satisfied(&mapping2(&[("A", (0.0, 0.0)), ("B", (3.0, 4.0))])));
        assert!(!con.satisfied(&mapping2(&[("A", (0.0, 0.0)), ("B", (3.0, 3.0))])));
        // missing variable is never satisfied
        assert!(!con.satisfied(&mapping2(&[("A", (0.0, 0.0))])));
    }

    #[test]
    fn test_angle_satisfied_2d_keeps_sign() {
        let ccw = mapping2(&[("A", (1.0, 0.0)), ("B", (0.0, 0.0)), ("C", (0.0, 1.0))]);
        assert!(Constraint::angle("A", "B", "C", FRAC_PI_2).satisfied(&ccw));
        assert!(!Constraint::angle("A", "B", "C", -FRAC_PI_2).satisfied(&ccw));
    }

    #[test]
    fn test_angle_satisfied_3d_unsigned() {
        let mapping = Configuration::from_pairs([
            ("A".to_string(), point3(1.0, 0.0, 0.0)),
            ("B".to_string(), point3(0.0, 0.0, 0.0)),
            ("C".to_string(), point3(0.0, 0.0, 1.0)),
        ]);
        assert!(Constraint::angle("A", "B", "C", FRAC_PI_2).satisfied(&mapping));
        // negative parameter compares by magnitude in 3D
        assert!(Constraint::angle("A", "B", "C", -FRAC_PI_2).satisfied(&mapping));
    }

    #[test]
    fn test_angle_undefined_is_unsatisfied() {
        let degenerate = mapping2(&[("A", (0.0, 0.0)), ("B", (0.0, 0.0)), ("C", (1.0, 0.0))]);
        assert!(!Constraint::angle("A", "B", "C", 0.0).satisfied(&degenerate));
    }

    #[test]
    fn test_fix_satisfied_componentwise() {
        let con = Constraint::fix("A", point2(1.0, 2.0));
        assert!(con.satisfied(&mapping2(&[("A", (1.0, 2.0))])));
        assert!(!con.satisfied(&mapping2(&[("A", (1.0, 2.5))])));
    }

    #[test]
    fn test_fix_satisfied_3d() {
        let con = Constraint::fix("A", point3(1.0, 2.0, 3.0));
        let good = Configuration::from_pairs([("A".to_string(), point3(1.0, 2.0, 3.0))]);
        let bad_z = Configuration::from_pairs([("A".to_string(), point3(1.0, 2.0, 9.0))]);
        assert!(con.satisfied(&good));
        // the third component participates
        assert!(!con.satisfied(&bad_z));
    }

    #[test]
    fn test_variables_order() {
        let con = Constraint::angle("A", "B", "C", 1.0);
        assert_eq!(con.variables(), ["A", "B", "C"]);
    }

    #[test]
    fn test_set_parameter_kind_mismatch() {
        let mut con = Constraint::distance("A", "B", 1.0);
        assert!(con.set_parameter(Parameter::Distance(2.0)).is_ok());
        assert!(matches!(
            con.parameter(),
            Some(Parameter::Distance(d)) if d == 2.0
        ));
        assert!(con.set_parameter(Parameter::Angle(1.0)).is_err());
    }
}
