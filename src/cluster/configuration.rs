//! Configurations - candidate realizations of point variables
//!
//! A configuration maps point variables to concrete positions. The cluster
//! engine treats configurations as immutable values: merge methods read
//! input configurations and produce fresh output configurations.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::math::{Position, Var};
use crate::core::precision::tol_eq;

/// An immutable mapping from point variables to positions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Configuration {
    map: BTreeMap<Var, Position>,
}

impl Configuration {
    /// Build a configuration from variable/position pairs.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Var, Position)>,
    {
        Configuration {
            map: pairs.into_iter().collect(),
        }
    }

    /// Position of a variable, if present.
    pub fn position(&self, var: &str) -> Option<&Position> {
        self.map.get(var)
    }

    /// Whether the configuration has a position for `var`.
    pub fn contains(&self, var: &str) -> bool {
        self.map.contains_key(var)
    }

    /// Variables covered by this configuration, in sorted order.
    pub fn vars(&self) -> impl Iterator<Item = &Var> {
        self.map.keys()
    }

    /// Variable/position pairs in sorted variable order.
    pub fn iter(&self) -> impl Iterator<Item = (&Var, &Position)> {
        self.map.iter()
    }

    /// Number of variables covered.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the configuration covers no variables.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// A new configuration extended with the pairs of `other`.
    ///
    /// Positions already present win over positions from `other`, so the
    /// receiver acts as the coordinate frame of record.
    pub fn union(&self, other: &Configuration) -> Configuration {
        let mut map = other.map.clone();
        for (var, pos) in &self.map {
            map.insert(var.clone(), pos.clone());
        }
        Configuration { map }
    }

    /// Componentwise tolerance comparison restricted to shared variables.
    pub fn agrees_with(&self, other: &Configuration) -> bool {
        self.map.iter().all(|(var, pos)| match other.position(var) {
            Some(q) => {
                pos.len() == q.len() && pos.iter().zip(q.iter()).all(|(a, b)| tol_eq(*a, *b))
            }
            None => true,
        })
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (var, pos)) in self.map.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let coords: Vec<String> = pos.iter().map(|x| format!("{:.4}", x)).collect();
            write!(f, "{}: ({})", var, coords.join(", "))?;
        }
        write!(f, "}}")
    }
}

/// A solution held by the cluster engine: a configuration plus a flag
/// recording whether some merge step left degrees of freedom undetermined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    /// The candidate realization.
    pub configuration: Configuration,
    /// True when the realization does not pin down all internal freedoms.
    pub underconstrained: bool,
}

impl Solution {
    /// A fully determined solution.
    pub fn determined(configuration: Configuration) -> Self {
        Solution {
            configuration,
            underconstrained: false,
        }
    }
}

/// An opaque acceptance predicate over configurations.
///
/// Selection constraints never become primitive clusters; the engine applies
/// them as filters on the configurations of derived clusters that cover all
/// of the rule's variables.
pub trait SelectionRule: fmt::Debug + Send + Sync {
    /// The variables the rule reads.
    fn variables(&self) -> &[Var];

    /// Whether the (partial) realization is acceptable.
    fn test(&self, configuration: &Configuration) -> bool;
}
