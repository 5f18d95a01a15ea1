//! # clustersolve - decomposition-based geometric constraint solving
//!
//! Solves geometric constraint problems in 2D and 3D: given point
//! variables with prototype positions and a set of constraints (pairwise
//! distance, triangle angle, absolute fix), it computes the realizations
//! satisfying the constraints and classifies the problem as well-, under-
//! or over-constrained.
//!
//! ## Architecture
//!
//! - `core`: foundational math and precision handling
//! - `cluster`: primitive clusters, configurations and the incremental
//!   cluster-merging engine
//! - `problem`: the authoring surface - constraint graph, constraint types
//!   and validation
//! - `solver`: the reactive bridge mapping problem mutations onto engine
//!   mutations and assembling the result tree
//!
//! ## Example
//!
//! ```rust
//! use clustersolve::{point2, Constraint, GeometricProblem, GeometricSolver};
//!
//! let mut problem = GeometricProblem::new(2);
//! problem.add_point("A", point2(0.0, 0.0)).unwrap();
//! problem.add_point("B", point2(1.0, 0.0)).unwrap();
//! problem.add_constraint(Constraint::distance("A", "B", 2.0)).unwrap();
//!
//! let solver = GeometricSolver::new(&mut problem).unwrap();
//! let result = solver.result();
//! for solution in &result.solutions {
//!     assert!(problem.verify(solution));
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules - foundational math and precision
pub mod core;

// Cluster engine - primitives and incremental merging
pub mod cluster;

// Problem authoring - constraint graph and constraint types
pub mod problem;

// Geometric solver - the reactive bridge and result assembly
pub mod solver;

// Re-export commonly used types
pub use cluster::{Cluster, ClusterId, ClusterShape, Configuration, SelectionRule, Solution};
pub use crate::core::{angle_at, distance, point2, point3, tol_eq, ApproxEq, Position, Var};
pub use problem::{
    Constraint, ConstraintGraph, ConstraintId, ConstraintKind, Event, GeometricProblem,
    Parameter, ProblemError, ProblemResult,
};
pub use solver::{
    ClusterFlag, ConfigurationBuilder, Constrainedness, GeometricCluster, GeometricSolver,
    SolveError, SolveResult,
};

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
