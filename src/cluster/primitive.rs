//! Primitive clusters - rigids and hedgehogs
//!
//! The cluster engine decomposes a constraint problem into clusters: a
//! `Rigid` fixes the internal shape of its variables, a `Hedgehog` fixes
//! only the angles between spokes meeting at a center. Clusters are handled
//! by value-independent ids so identity survives cloning and serialization.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::math::Var;

/// Unique identifier for a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(Uuid);

impl ClusterId {
    /// Create a new unique cluster ID
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

impl Default for ClusterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster-{}", &self.0.to_string()[..8])
    }
}

/// The geometric content of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterShape {
    /// An unordered set of ≥1 variables with a rigid internal shape.
    Rigid {
        /// The member variables.
        vars: BTreeSet<Var>,
    },
    /// A center plus ≥2 spokes; only the spoke angles are constrained.
    Hedgehog {
        /// The apex variable.
        center: Var,
        /// The spoke variables.
        spokes: BTreeSet<Var>,
    },
}

/// A primitive or derived cluster tracked by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Stable identity handle.
    pub id: ClusterId,
    /// Rigid or hedgehog content.
    pub shape: ClusterShape,
    /// Structural overconstrainedness, set by merges that add no variables.
    pub overconstrained: bool,
}

impl Cluster {
    /// Create a rigid cluster over the given variables.
    pub fn rigid<I, S>(vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Var>,
    {
        Cluster {
            id: ClusterId::new(),
            shape: ClusterShape::Rigid {
                vars: vars.into_iter().map(Into::into).collect(),
            },
            overconstrained: false,
        }
    }

    /// Create a hedgehog cluster with the given center and spokes.
    pub fn hedgehog<I, S>(center: impl Into<Var>, spokes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Var>,
    {
        Cluster {
            id: ClusterId::new(),
            shape: ClusterShape::Hedgehog {
                center: center.into(),
                spokes: spokes.into_iter().map(Into::into).collect(),
            },
            overconstrained: false,
        }
    }

    /// Whether this cluster is a rigid.
    pub fn is_rigid(&self) -> bool {
        matches!(self.shape, ClusterShape::Rigid { .. })
    }

    /// All variables of the cluster (center included for hedgehogs),
    /// in sorted order.
    pub fn vars(&self) -> BTreeSet<Var> {
        match &self.shape {
            ClusterShape::Rigid { vars } => vars.clone(),
            ClusterShape::Hedgehog { center, spokes } => {
                let mut vars = spokes.clone();
                vars.insert(center.clone());
                vars
            }
        }
    }

    /// Number of variables.
    pub fn var_count(&self) -> usize {
        match &self.shape {
            ClusterShape::Rigid { vars } => vars.len(),
            ClusterShape::Hedgehog { center, spokes } => {
                spokes.len() + usize::from(!spokes.contains(center))
            }
        }
    }

    /// Whether the cluster covers the variable.
    pub fn contains(&self, var: &str) -> bool {
        match &self.shape {
            ClusterShape::Rigid { vars } => vars.contains(var),
            ClusterShape::Hedgehog { center, spokes } => center == var || spokes.contains(var),
        }
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shape {
            ClusterShape::Rigid { vars } => {
                let names: Vec<&str> = vars.iter().map(String::as_str).collect();
                write!(f, "rigid({})", names.join(", "))
            }
            ClusterShape::Hedgehog { center, spokes } => {
                let names: Vec<&str> = spokes.iter().map(String::as_str).collect();
                write!(f, "hedgehog({}; {})", center, names.join(", "))
            }
        }
    }
}
