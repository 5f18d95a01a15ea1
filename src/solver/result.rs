//! Result clusters
//!
//! Solving a problem yields a tree of [`GeometricCluster`] nodes: each node
//! lists the variables it determines, the candidate solutions found for
//! them, the sub-clusters it was merged from, and a constrainedness flag.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cluster::configuration::Configuration;
use crate::core::math::Var;

/// Constrainedness classification of a result cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterFlag {
    /// Well constrained.
    Ok,
    /// Incidental over-constrained: structurally sound but no solutions.
    IncidentalOver,
    /// Incidental under-constrained: some solution leaves freedoms open.
    IncidentalUnder,
    /// Structural over-constrained: a merge added no new variables.
    StructuralOver,
    /// Structural under-constrained: several unmerged top-level clusters.
    StructuralUnder,
    /// Not solved.
    Unsolved,
}

impl Default for ClusterFlag {
    fn default() -> Self {
        ClusterFlag::Ok
    }
}

impl fmt::Display for ClusterFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ClusterFlag::Ok => "well constrained",
            ClusterFlag::IncidentalOver => "incidental over-constrained",
            ClusterFlag::IncidentalUnder => "incidental under-constrained",
            ClusterFlag::StructuralOver => "structural over-constrained",
            ClusterFlag::StructuralUnder => "structural under-constrained",
            ClusterFlag::Unsolved => "unsolved",
        };
        f.write_str(text)
    }
}

/// Whole-problem constrainedness classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constrainedness {
    /// One rigid top-level cluster with solutions.
    WellConstrained,
    /// Several top-level clusters, or a non-rigid one.
    UnderConstrained,
    /// One rigid top-level cluster without solutions.
    OverConstrained,
    /// One rigid top-level cluster that was never solved.
    Unsolved,
    /// No clusters at all.
    Error,
}

impl fmt::Display for Constrainedness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Constrainedness::WellConstrained => "well-constrained",
            Constrainedness::UnderConstrained => "under-constrained",
            Constrainedness::OverConstrained => "over-constrained",
            Constrainedness::Unsolved => "unsolved",
            Constrainedness::Error => "error",
        };
        f.write_str(text)
    }
}

/// A node of the result tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometricCluster {
    /// The point variables this cluster determines, sorted.
    pub variables: Vec<Var>,
    /// Candidate realizations of those variables.
    pub solutions: Vec<Configuration>,
    /// The clusters this one was merged from.
    pub subs: Vec<GeometricCluster>,
    /// Constrainedness classification.
    pub flag: ClusterFlag,
}

impl GeometricCluster {
    fn fmt_recursive(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        for _ in 0..depth {
            write!(f, "|")?;
        }
        let names: Vec<&str> = self.variables.iter().map(String::as_str).collect();
        writeln!(
            f,
            "cluster ({}) {} {} solutions",
            names.join(", "),
            self.flag,
            self.solutions.len()
        )?;
        for sub in &self.subs {
            sub.fmt_recursive(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for GeometricCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_recursive(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::point2;

    #[test]
    fn test_flag_display() {
        assert_eq!(ClusterFlag::Ok.to_string(), "well constrained");
        assert_eq!(
            ClusterFlag::StructuralUnder.to_string(),
            "structural under-constrained"
        );
    }

    #[test]
    fn test_constrainedness_display() {
        assert_eq!(Constrainedness::WellConstrained.to_string(), "well-constrained");
        assert_eq!(Constrainedness::Error.to_string(), "error");
    }

    #[test]
    fn test_tree_display() {
        let leaf = GeometricCluster {
            variables: vec!["A".to_string(), "B".to_string()],
            solutions: vec![Configuration::from_pairs([
                ("A".to_string(), point2(0.0, 0.0)),
                ("B".to_string(), point2(1.0, 0.0)),
            ])],
            subs: Vec::new(),
            flag: ClusterFlag::Ok,
        };
        let root = GeometricCluster {
            variables: vec!["A".to_string(), "B".to_string(), "C".to_string()],
            solutions: Vec::new(),
            subs: vec![leaf],
            flag: ClusterFlag::StructuralUnder,
        };
        let rendered = root.to_string();
        assert!(rendered.starts_with("cluster (A, B, C) structural under-constrained 0 solutions"));
        assert!(rendered.contains("|cluster (A, B) well constrained 1 solutions"));
    }

    #[test]
    fn test_serde_round_trip() {
        let cluster = GeometricCluster {
            variables: vec!["A".to_string()],
            solutions: vec![Configuration::from_pairs([(
                "A".to_string(),
                point2(1.0, 2.0),
            )])],
            subs: Vec::new(),
            flag: ClusterFlag::Ok,
        };
        let json = serde_json::to_string(&cluster).unwrap();
        let back: GeometricCluster = serde_json::from_str(&json).unwrap();
        assert_eq!(cluster, back);
    }
}
