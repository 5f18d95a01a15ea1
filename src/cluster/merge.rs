//! Numeric merge arithmetic for cluster configurations
//!
//! Merging two clusters means expressing one configuration in the
//! coordinate frame of another by a rigid motion (rotation + translation,
//! never reflection) that maps shared anchor variables onto each other.
//! Chirality variants are explicit: a merge that is ambiguous up to mirror
//! produces one configuration per handedness.

use nalgebra::{Matrix2, Matrix3, Vector3};

use crate::cluster::configuration::Configuration;
use crate::core::math::{as_vector2, as_vector3, point2, point3, Position, Var};
use crate::core::precision::{tol_eq, ApproxEq, EPSILON_ROUGH};

/// Express `moving` in the frame of `base` by the rigid motion that maps the
/// anchor variables of `moving` onto their positions in `base`.
///
/// All anchors must be present in both configurations. After the transform
/// every anchor (and any other shared variable) must agree within tolerance,
/// otherwise the two configurations describe incongruent shapes and the
/// merge has no solution: `None`.
///
/// 2D needs two anchors with non-degenerate separation; 3D needs three
/// non-collinear anchors.
pub fn align_onto(
    base: &Configuration,
    moving: &Configuration,
    anchors: &[Var],
    dimension: usize,
) -> Option<Configuration> {
    let transformed = if dimension == 2 {
        transform_2d(base, moving, anchors)?
    } else {
        transform_3d(base, moving, anchors)?
    };
    if !base.agrees_with(&transformed) {
        return None;
    }
    Some(base.union(&transformed))
}

fn transform_2d(
    base: &Configuration,
    moving: &Configuration,
    anchors: &[Var],
) -> Option<Configuration> {
    // first anchor pair with usable separation in both frames
    let (a0, a1) = anchor_pair(base, moving, anchors)?;
    let ob = as_vector2(base.position(&a0)?);
    let om = as_vector2(moving.position(&a0)?);
    let db = as_vector2(base.position(&a1)?) - ob;
    let dm = as_vector2(moving.position(&a1)?) - om;
    if !tol_eq(db.norm(), dm.norm()) {
        return None;
    }
    let phi = db.y.atan2(db.x) - dm.y.atan2(dm.x);
    let rot = Matrix2::new(phi.cos(), -phi.sin(), phi.sin(), phi.cos());
    Some(Configuration::from_pairs(moving.iter().map(|(var, pos)| {
        let p = ob + rot * (as_vector2(pos) - om);
        (var.clone(), point2(p.x, p.y))
    })))
}

fn transform_3d(
    base: &Configuration,
    moving: &Configuration,
    anchors: &[Var],
) -> Option<Configuration> {
    let (a0, a1, a2) = anchor_triple(base, moving, anchors)?;
    let ob = as_vector3(base.position(&a0)?);
    let om = as_vector3(moving.position(&a0)?);
    let fb = frame_3d(
        ob,
        as_vector3(base.position(&a1)?),
        as_vector3(base.position(&a2)?),
    )?;
    let fm = frame_3d(
        om,
        as_vector3(moving.position(&a1)?),
        as_vector3(moving.position(&a2)?),
    )?;
    let rot = fb * fm.transpose();
    Some(Configuration::from_pairs(moving.iter().map(|(var, pos)| {
        let p = ob + rot * (as_vector3(pos) - om);
        (var.clone(), point3(p.x, p.y, p.z))
    })))
}

/// Right-handed orthonormal frame spanned by two edge directions.
fn frame_3d(o: Vector3<f64>, p1: Vector3<f64>, p2: Vector3<f64>) -> Option<Matrix3<f64>> {
    let u = p1 - o;
    if u.approx_zero_eps(EPSILON_ROUGH) {
        return None;
    }
    let u = u.normalize();
    let n = u.cross(&(p2 - o));
    if n.approx_zero_eps(EPSILON_ROUGH) {
        return None;
    }
    let w = n.normalize();
    let v = w.cross(&u);
    Some(Matrix3::from_columns(&[u, v, w]))
}

fn anchor_pair(
    base: &Configuration,
    moving: &Configuration,
    anchors: &[Var],
) -> Option<(Var, Var)> {
    for (i, a0) in anchors.iter().enumerate() {
        for a1 in &anchors[i + 1..] {
            let sb = as_vector2(base.position(a0)?) - as_vector2(base.position(a1)?);
            let sm = as_vector2(moving.position(a0)?) - as_vector2(moving.position(a1)?);
            if !sb.approx_zero_eps(EPSILON_ROUGH) && !sm.approx_zero_eps(EPSILON_ROUGH) {
                return Some((a0.clone(), a1.clone()));
            }
        }
    }
    None
}

fn anchor_triple(
    base: &Configuration,
    moving: &Configuration,
    anchors: &[Var],
) -> Option<(Var, Var, Var)> {
    for (i, a0) in anchors.iter().enumerate() {
        for (j, a1) in anchors.iter().enumerate().skip(i + 1) {
            for a2 in &anchors[j + 1..] {
                let ok = |c: &Configuration| -> Option<bool> {
                    Some(
                        frame_3d(
                            as_vector3(c.position(a0)?),
                            as_vector3(c.position(a1)?),
                            as_vector3(c.position(a2)?),
                        )
                        .is_some(),
                    )
                };
                if ok(base)? && ok(moving)? {
                    return Some((a0.clone(), a1.clone(), a2.clone()));
                }
            }
        }
    }
    None
}

/// Whether two configurations give the given variables congruent shapes:
/// every pairwise distance among them agrees within tolerance.
///
/// A rigid whose variables are a subset of another's contributes no new
/// positions, only redundancy; congruence is the consistency test applied
/// to such merges (a transform would need more anchors than a two-variable
/// rigid has in 3D).
pub fn congruent_on(a: &Configuration, b: &Configuration, vars: &[Var]) -> bool {
    for (i, u) in vars.iter().enumerate() {
        for v in &vars[i + 1..] {
            let agree = match (a.position(u), a.position(v), b.position(u), b.position(v)) {
                (Some(au), Some(av), Some(bu), Some(bv)) => {
                    tol_eq((au - av).norm(), (bu - bv).norm())
                }
                _ => false,
            };
            if !agree {
                return false;
            }
        }
    }
    true
}

/// Solve the anchor triangle of a distance-distance-distance merge.
///
/// Places `a` at the origin and `b` on the positive x axis; returns the
/// candidate positions of `c` satisfying |ab| = `d_ab`, |bc| = `d_bc`,
/// |ca| = `d_ca`. In 2D both chiralities are returned; in 3D the single
/// planar embedding (a mirrored planar triangle is a rotation in space).
/// Empty when the side lengths admit no triangle.
pub fn solve_triangle(
    d_ab: f64,
    d_bc: f64,
    d_ca: f64,
    dimension: usize,
) -> Vec<(Position, Position, Position)> {
    if d_ab < EPSILON_ROUGH {
        return Vec::new();
    }
    let x = (d_ab * d_ab + d_ca * d_ca - d_bc * d_bc) / (2.0 * d_ab);
    let disc = d_ca * d_ca - x * x;
    let scale = f64::max(1.0, d_ca * d_ca);
    if disc < -EPSILON_ROUGH * scale {
        return Vec::new();
    }
    let y = disc.max(0.0).sqrt();
    let place = |cy: f64| {
        if dimension == 2 {
            (point2(0.0, 0.0), point2(d_ab, 0.0), point2(x, cy))
        } else {
            (
                point3(0.0, 0.0, 0.0),
                point3(d_ab, 0.0, 0.0),
                point3(x, cy, 0.0),
            )
        }
    };
    if y < EPSILON_ROUGH || dimension == 3 {
        vec![place(y)]
    } else {
        vec![place(y), place(-y)]
    }
}

/// Place the three points of a distance-angle-distance merge.
///
/// The apex `b` sits at the origin, `a` on the positive x axis at `d_ba`,
/// and `c` at `d_bc` under the angle `theta` measured at `b` from the ray
/// `b→a`. The caller supplies the signed angle in 2D and the unsigned angle
/// in 3D; either way the placement realizes it exactly.
pub fn place_sas(d_ba: f64, d_bc: f64, theta: f64, dimension: usize) -> (Position, Position, Position) {
    let (cx, cy) = (d_bc * theta.cos(), d_bc * theta.sin());
    if dimension == 2 {
        (point2(0.0, 0.0), point2(d_ba, 0.0), point2(cx, cy))
    } else {
        (
            point3(0.0, 0.0, 0.0),
            point3(d_ba, 0.0, 0.0),
            point3(cx, cy, 0.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::distance;
    use approx::assert_relative_eq;

    fn config2(pairs: &[(&str, (f64, f64))]) -> Configuration {
        Configuration::from_pairs(
            pairs
                .iter()
                .map(|(v, (x, y))| (v.to_string(), point2(*x, *y))),
        )
    }

    #[test]
    fn test_align_translates_and_rotates() {
        let base = config2(&[("A", (10.0, 0.0)), ("B", (10.0, 2.0))]);
        // same shape, axis-aligned differently, with one extra point
        let moving = config2(&[("A", (0.0, 0.0)), ("B", (2.0, 0.0)), ("C", (1.0, 1.0))]);
        let merged = align_onto(&base, &moving, &["A".into(), "B".into()], 2).unwrap();
        assert_eq!(merged.len(), 3);
        let c = merged.position("C").unwrap();
        assert_relative_eq!(c[0], 9.0, epsilon = 1e-9);
        assert_relative_eq!(c[1], 1.0, epsilon = 1e-9);
        // anchor positions come from the base frame
        assert_relative_eq!(merged.position("A").unwrap()[0], 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_align_rejects_incongruent_anchors() {
        let base = config2(&[("A", (0.0, 0.0)), ("B", (1.0, 0.0))]);
        let moving = config2(&[("A", (0.0, 0.0)), ("B", (2.0, 0.0)), ("C", (1.0, 1.0))]);
        assert!(align_onto(&base, &moving, &["A".into(), "B".into()], 2).is_none());
    }

    #[test]
    fn test_align_checks_extra_shared_vars() {
        let base = config2(&[("A", (0.0, 0.0)), ("B", (1.0, 0.0)), ("C", (0.0, 1.0))]);
        // congruent on A,B but C disagrees after the motion
        let moving = config2(&[("A", (0.0, 0.0)), ("B", (1.0, 0.0)), ("C", (0.0, -1.0))]);
        assert!(
            align_onto(&base, &moving, &["A".into(), "B".into(), "C".into()], 2).is_none()
        );
    }

    #[test]
    fn test_align_3d() {
        let base = Configuration::from_pairs([
            ("A".to_string(), point3(0.0, 0.0, 5.0)),
            ("B".to_string(), point3(1.0, 0.0, 5.0)),
            ("C".to_string(), point3(0.0, 1.0, 5.0)),
        ]);
        let moving = Configuration::from_pairs([
            ("A".to_string(), point3(0.0, 0.0, 0.0)),
            ("B".to_string(), point3(1.0, 0.0, 0.0)),
            ("C".to_string(), point3(0.0, 1.0, 0.0)),
            ("D".to_string(), point3(0.0, 0.0, 1.0)),
        ]);
        let merged = align_onto(
            &base,
            &moving,
            &["A".into(), "B".into(), "C".into()],
            3,
        )
        .unwrap();
        let d = merged.position("D").unwrap();
        assert_relative_eq!(d[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(d[1], 0.0, epsilon = 1e-9);
        assert_relative_eq!(d[2], 6.0, epsilon = 1e-9);
    }

    #[test]
    fn test_congruent_on() {
        let base = config2(&[("A", (5.0, 5.0)), ("B", (5.0, 7.0)), ("C", (9.0, 9.0))]);
        let same_shape = config2(&[("A", (0.0, 0.0)), ("B", (2.0, 0.0))]);
        let other_shape = config2(&[("A", (0.0, 0.0)), ("B", (3.0, 0.0))]);
        let vars = ["A".to_string(), "B".to_string()];
        assert!(congruent_on(&base, &same_shape, &vars));
        assert!(!congruent_on(&base, &other_shape, &vars));
    }

    #[test]
    fn test_solve_triangle_two_chiralities() {
        let solutions = solve_triangle(1.0, 1.25f64.sqrt(), 1.25f64.sqrt(), 2);
        assert_eq!(solutions.len(), 2);
        for (a, b, c) in &solutions {
            assert_relative_eq!(distance(a, b), 1.0, epsilon = 1e-9);
            assert_relative_eq!(distance(b, c), 1.25f64.sqrt(), epsilon = 1e-9);
            assert_relative_eq!(distance(c, a), 1.25f64.sqrt(), epsilon = 1e-9);
        }
        assert_relative_eq!(solutions[0].2[1], -solutions[1].2[1], epsilon = 1e-12);
    }

    #[test]
    fn test_solve_triangle_degenerate_is_single() {
        // collinear: 1 + 1 = 2
        let solutions = solve_triangle(2.0, 1.0, 1.0, 2);
        assert_eq!(solutions.len(), 1);
        assert_relative_eq!(solutions[0].2[1], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_solve_triangle_impossible() {
        assert!(solve_triangle(3.0, 1.0, 1.0, 2).is_empty());
    }

    #[test]
    fn test_solve_triangle_3d_single() {
        let solutions = solve_triangle(1.0, 1.0, 1.0, 3);
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].0.len(), 3);
    }

    #[test]
    fn test_place_sas() {
        let (b, a, c) = place_sas(1.0, 2.0, std::f64::consts::FRAC_PI_2, 2);
        assert_relative_eq!(distance(&b, &a), 1.0, epsilon = 1e-12);
        assert_relative_eq!(distance(&b, &c), 2.0, epsilon = 1e-12);
        assert_relative_eq!(c[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(c[1], 2.0, epsilon = 1e-12);
    }

}
