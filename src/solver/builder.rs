//! Reference configuration synthesis
//!
//! Every primitive cluster pushed into the engine needs a small canonical
//! configuration the decomposition can propagate numerically. The builder
//! knows the problem dimension and pads 2D placements with a zero third
//! component when needed.

use crate::cluster::configuration::Configuration;
use crate::core::math::{point2, point3, Position, Var};

/// Builds canonical reference configurations for primitive clusters.
#[derive(Debug, Clone, Copy)]
pub struct ConfigurationBuilder {
    dimension: usize,
}

impl ConfigurationBuilder {
    /// A builder for the given problem dimension.
    pub fn new(dimension: usize) -> Self {
        ConfigurationBuilder { dimension }
    }

    fn at(&self, x: f64, y: f64) -> Position {
        if self.dimension == 2 {
            point2(x, y)
        } else {
            point3(x, y, 0.0)
        }
    }

    /// Configuration of a single point at its prototype position.
    pub fn point(&self, variable: &str, position: &Position) -> Configuration {
        Configuration::from_pairs([(variable.to_string(), position.clone())])
    }

    /// Canonical placement of a distance pair: `a` at the origin, `b` on
    /// the positive x axis at the required distance.
    pub fn distance_pair(&self, a: &str, b: &str, distance: f64) -> Configuration {
        Configuration::from_pairs([
            (a.to_string(), self.at(0.0, 0.0)),
            (b.to_string(), self.at(distance, 0.0)),
        ])
    }

    /// Canonical placement of an angle hedgehog: apex `b` at the origin,
    /// `a` at unit distance on the x axis, `c` at unit distance under the
    /// required angle. The magnitudes are arbitrary (a hedgehog constrains
    /// angles only); unit distance is canonical.
    pub fn angle_hedgehog(&self, a: &str, b: &str, c: &str, angle: f64) -> Configuration {
        Configuration::from_pairs([
            (a.to_string(), self.at(1.0, 0.0)),
            (b.to_string(), self.at(0.0, 0.0)),
            (c.to_string(), self.at(angle.cos(), angle.sin())),
        ])
    }

    /// Combined placement of all fixed variables at their fix parameters.
    pub fn fix_set<I>(&self, pairs: I) -> Configuration
    where
        I: IntoIterator<Item = (Var, Position)>,
    {
        Configuration::from_pairs(pairs)
    }
}
