//! Geometric solver - the reactive bridge between problem and engine
//!
//! The solver listens to a [`GeometricProblem`]'s event feed and mirrors
//! every mutation into the cluster engine: variables become single-point
//! rigids seeded with their prototypes, distance constraints become
//! two-point rigids, angle constraints become hedgehogs, and fix constraints
//! aggregate into a root cluster once enough of them exist. A bidirectional
//! identity map ties constraints and variables to their primitive clusters
//! so edits and removals find their counterpart.

pub mod builder;
pub mod result;

use std::collections::HashMap;

use log::debug;
use thiserror::Error;

pub use builder::ConfigurationBuilder;
pub use result::{ClusterFlag, Constrainedness, GeometricCluster};

use crate::cluster::configuration::Configuration;
use crate::cluster::engine::ClusterSolver;
use crate::cluster::primitive::{Cluster, ClusterId};
use crate::core::math::{Position, Var};
use crate::problem::constraint::{Constraint, ConstraintId, ConstraintKind};
use crate::problem::{Event, GeometricProblem};

/// Errors raised by the solver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SolveError {
    /// Only 2D and 3D problems can be solved.
    #[error("cannot solve problems of dimension {0}")]
    UnsupportedDimension(usize),
    /// A notification referenced state the solver has no mapping for.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// A freshly synthesized reference configuration failed its own
    /// constraint. Internal and fatal; there is no recovery path.
    #[error("reference configuration violates its constraint: {0}")]
    InvariantViolation(String),
}

/// Result alias for solver operations.
pub type SolveResult<T> = Result<T, SolveError>;

/// Maps problem mutations onto cluster engine mutations and assembles the
/// resulting cluster tree.
#[derive(Debug)]
pub struct GeometricSolver {
    dimension: usize,
    engine: ClusterSolver,
    builder: ConfigurationBuilder,
    var_to_cluster: HashMap<Var, ClusterId>,
    cluster_to_var: HashMap<ClusterId, Var>,
    constraint_to_cluster: HashMap<ConstraintId, ClusterId>,
    cluster_to_constraint: HashMap<ClusterId, ConstraintId>,
    /// Currently fixed variables, in fix insertion order.
    fixvars: Vec<Var>,
    /// The aggregated root rigid over `fixvars`, once enough fixes exist.
    fixcluster: Option<ClusterId>,
}

impl GeometricSolver {
    /// Create a solver for the problem and bootstrap it from the current
    /// problem state.
    ///
    /// Replay order is part of the contract: variables first, then distance
    /// constraints, then the remaining non-selection constraints. Adding
    /// rigids before hedgehogs tends to produce cleaner merge trees. Any
    /// notifications already pending on the problem are discarded - the
    /// replay subsumes them.
    pub fn new(problem: &mut GeometricProblem) -> SolveResult<Self> {
        let dimension = problem.dimension();
        if dimension != 2 && dimension != 3 {
            return Err(SolveError::UnsupportedDimension(dimension));
        }
        let mut solver = GeometricSolver {
            dimension,
            engine: ClusterSolver::new(dimension),
            builder: ConfigurationBuilder::new(dimension),
            var_to_cluster: HashMap::new(),
            cluster_to_var: HashMap::new(),
            constraint_to_cluster: HashMap::new(),
            cluster_to_constraint: HashMap::new(),
            fixvars: Vec::new(),
            fixcluster: None,
        };
        problem.take_events();

        let variables: Vec<Var> = problem.variables().to_vec();
        for var in &variables {
            solver.add_variable(var, problem)?;
        }
        let constraints: Vec<Constraint> = problem.constraints().to_vec();
        for constraint in constraints.iter().filter(|c| c.is_distance()) {
            solver.add_constraint(constraint, problem)?;
        }
        for constraint in constraints
            .iter()
            .filter(|c| !c.is_distance() && !c.is_selection())
        {
            solver.add_constraint(constraint, problem)?;
        }
        for constraint in constraints.iter().filter(|c| c.is_selection()) {
            solver.add_selection(constraint);
        }
        Ok(solver)
    }

    /// The problem dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The underlying cluster engine (read-only).
    pub fn cluster_solver(&self) -> &ClusterSolver {
        &self.engine
    }

    /// Drain the problem's pending notifications and mirror each of them
    /// into the cluster engine, in delivery order.
    ///
    /// An invariant violation aborts the drain; per the error policy it is
    /// fatal and the solver should be discarded.
    pub fn update(&mut self, problem: &mut GeometricProblem) -> SolveResult<()> {
        for event in problem.take_events() {
            self.handle(event, problem)?;
        }
        Ok(())
    }

    fn handle(&mut self, event: Event, problem: &GeometricProblem) -> SolveResult<()> {
        debug!("solver: {:?}", event);
        match event {
            Event::AddVariable(var) => self.add_variable(&var, problem),
            Event::RemVariable(var) => {
                self.rem_variable(&var);
                Ok(())
            }
            Event::AddConstraint(constraint) => self.add_constraint(&constraint, problem),
            Event::RemConstraint(constraint) => self.rem_constraint(&constraint, problem),
            Event::SetPoint(var, position) => self.update_variable(&var, &position),
            Event::SetParameter(constraint) => self.update_constraint(&constraint, problem),
            Event::AddSelectionConstraint(constraint) => {
                self.add_selection(&constraint);
                Ok(())
            }
            Event::RemSelectionConstraint(constraint) => {
                self.engine.rem_selection(&constraint.id().as_uuid());
                Ok(())
            }
        }
    }

    // ========================================================================
    // Variable mapping
    // ========================================================================

    fn add_variable(&mut self, var: &str, problem: &GeometricProblem) -> SolveResult<()> {
        if self.var_to_cluster.contains_key(var) {
            return Ok(());
        }
        let rigid = Cluster::rigid([var]);
        let id = rigid.id;
        self.var_to_cluster.insert(var.to_string(), id);
        self.cluster_to_var.insert(id, var.to_string());
        self.engine.add(rigid);
        match problem.get_point(var) {
            Ok(prototype) => {
                let prototype = prototype.clone();
                self.update_variable(var, &prototype)
            }
            // the variable was removed again later in this batch; the
            // pending removal event cleans up the unseeded rigid
            Err(_) => {
                debug!("solver: no prototype for {}, leaving rigid unseeded", var);
                Ok(())
            }
        }
    }

    fn rem_variable(&mut self, var: &str) {
        if let Some(id) = self.var_to_cluster.remove(var) {
            self.cluster_to_var.remove(&id);
            self.engine.remove(id);
        }
    }

    fn update_variable(&mut self, var: &str, position: &Position) -> SolveResult<()> {
        let id = *self.var_to_cluster.get(var).ok_or_else(|| {
            SolveError::ProtocolViolation(format!("set_point for unmapped variable {}", var))
        })?;
        self.engine.set(id, vec![self.builder.point(var, position)]);
        Ok(())
    }

    // ========================================================================
    // Constraint mapping
    // ========================================================================

    fn add_constraint(
        &mut self,
        constraint: &Constraint,
        problem: &GeometricProblem,
    ) -> SolveResult<()> {
        match constraint.kind() {
            ConstraintKind::Distance { a, b, .. } => {
                let rigid = Cluster::rigid([a.clone(), b.clone()]);
                self.map_constraint(constraint.id(), rigid.id);
                self.engine.add(rigid);
                self.update_constraint(constraint, problem)
            }
            ConstraintKind::Angle { a, b, c, .. } => {
                let hog = Cluster::hedgehog(b.clone(), [a.clone(), c.clone()]);
                self.map_constraint(constraint.id(), hog.id);
                self.engine.add(hog);
                self.update_constraint(constraint, problem)
            }
            ConstraintKind::Fix { variable, .. } => {
                self.fixvars.push(variable.clone());
                self.rebuild_fixcluster();
                self.update_fix(problem)
            }
            ConstraintKind::Selection(_) => Ok(()),
        }
    }

    fn rem_constraint(
        &mut self,
        constraint: &Constraint,
        problem: &GeometricProblem,
    ) -> SolveResult<()> {
        if let ConstraintKind::Fix { variable, .. } = constraint.kind() {
            self.fixvars.retain(|v| v != variable);
            self.rebuild_fixcluster();
            return self.update_fix(problem);
        }
        if let Some(id) = self.constraint_to_cluster.remove(&constraint.id()) {
            self.cluster_to_constraint.remove(&id);
            self.engine.remove(id);
        }
        Ok(())
    }

    fn update_constraint(
        &mut self,
        constraint: &Constraint,
        problem: &GeometricProblem,
    ) -> SolveResult<()> {
        match constraint.kind() {
            ConstraintKind::Distance { a, b, distance } => {
                let configuration = self.builder.distance_pair(a, b, *distance);
                self.push_reference(constraint, configuration)
            }
            ConstraintKind::Angle { a, b, c, angle } => {
                let configuration = self.builder.angle_hedgehog(a, b, c, *angle);
                self.push_reference(constraint, configuration)
            }
            ConstraintKind::Fix { .. } => self.update_fix(problem),
            ConstraintKind::Selection(_) => Err(SolveError::ProtocolViolation(
                "selection constraints have no parameter".to_string(),
            )),
        }
    }

    /// Push a freshly synthesized reference configuration, checking it
    /// against the constraint it realizes.
    fn push_reference(
        &mut self,
        constraint: &Constraint,
        configuration: Configuration,
    ) -> SolveResult<()> {
        if !constraint.satisfied(&configuration) {
            return Err(SolveError::InvariantViolation(constraint.to_string()));
        }
        let id = *self
            .constraint_to_cluster
            .get(&constraint.id())
            .ok_or_else(|| {
                SolveError::ProtocolViolation(format!("unmapped constraint {}", constraint))
            })?;
        self.engine.set(id, vec![configuration]);
        Ok(())
    }

    fn map_constraint(&mut self, constraint: ConstraintId, cluster: ClusterId) {
        self.constraint_to_cluster.insert(constraint, cluster);
        self.cluster_to_constraint.insert(cluster, constraint);
    }

    fn add_selection(&mut self, constraint: &Constraint) {
        if let ConstraintKind::Selection(rule) = constraint.kind() {
            self.engine
                .add_selection(constraint.id().as_uuid(), rule.clone());
        }
    }

    // ========================================================================
    // Fix aggregation
    // ========================================================================

    /// Tear down and, with at least `dimension` fixed variables, rebuild the
    /// aggregated fix cluster and designate it as the engine root. The
    /// remove-compute-add sequence is one unit; no caller observes a
    /// half-rebuilt state.
    fn rebuild_fixcluster(&mut self) {
        if let Some(id) = self.fixcluster.take() {
            self.engine.remove(id);
        }
        if self.fixvars.len() >= self.dimension {
            let cluster = Cluster::rigid(self.fixvars.clone());
            let id = cluster.id;
            self.engine.add(cluster);
            self.engine.set_root(id);
            self.fixcluster = Some(id);
        }
    }

    /// Refresh the fix cluster's configuration from the current fix
    /// parameters.
    fn update_fix(&mut self, problem: &GeometricProblem) -> SolveResult<()> {
        let id = match self.fixcluster {
            Some(id) => id,
            None => {
                log::warn!("no fixcluster to update");
                return Ok(());
            }
        };
        let mut pairs: Vec<(Var, Position)> = Vec::with_capacity(self.fixvars.len());
        for var in &self.fixvars {
            match problem.get_fix(var).map(Constraint::kind) {
                Some(ConstraintKind::Fix { position, .. }) => {
                    pairs.push((var.clone(), position.clone()));
                }
                // the fix was removed again later in this batch; the pending
                // removal event rebuilds the cluster
                _ => {
                    debug!("solver: fixed variable {} has no fix yet, skipping", var);
                    return Ok(());
                }
            }
        }
        let configuration = self.builder.fix_set(pairs);
        self.engine.set(id, vec![configuration]);
        Ok(())
    }

    // ========================================================================
    // Results
    // ========================================================================

    /// Classify the problem from the engine's top level.
    pub fn constrainedness(&self) -> Constrainedness {
        let top = self.engine.top_level();
        match top.len() {
            0 => Constrainedness::Error,
            1 => {
                let cluster = top[0];
                if !cluster.is_rigid() {
                    return Constrainedness::UnderConstrained;
                }
                match self.engine.get(cluster.id) {
                    None => Constrainedness::Unsolved,
                    Some(solutions) if solutions.is_empty() => Constrainedness::OverConstrained,
                    Some(_) => Constrainedness::WellConstrained,
                }
            }
            _ => Constrainedness::UnderConstrained,
        }
    }

    /// Assemble the result tree from the engine's rigids and merge methods.
    pub fn result(&self) -> GeometricCluster {
        let mut nodes: HashMap<ClusterId, GeometricCluster> = HashMap::new();
        for rigid in self.engine.rigids() {
            let solutions_raw = self.engine.get(rigid.id);
            let solutions: Vec<Configuration> = solutions_raw
                .map(|sols| sols.iter().map(|s| s.configuration.clone()).collect())
                .unwrap_or_default();
            let underconstrained = solutions_raw
                .map(|sols| sols.iter().any(|s| s.underconstrained))
                .unwrap_or(false);
            let flag = if rigid.overconstrained {
                ClusterFlag::StructuralOver
            } else if solutions.is_empty() {
                ClusterFlag::IncidentalOver
            } else if underconstrained {
                ClusterFlag::IncidentalUnder
            } else {
                ClusterFlag::Ok
            };
            nodes.insert(
                rigid.id,
                GeometricCluster {
                    variables: rigid.vars().into_iter().collect(),
                    solutions,
                    subs: Vec::new(),
                    flag,
                },
            );
        }

        // children per merge method; creation order is bottom-up, so every
        // input node is complete before a parent clones it
        for method in self.engine.methods() {
            let output = method.output();
            if !nodes.contains_key(&output) {
                continue;
            }
            if method.is_prototype() {
                // a prototype selection is the same rigid geometry, just
                // filtered; it inherits its input's children
                let inherited = nodes
                    .get(&method.inputs()[0])
                    .map(|n| n.subs.clone())
                    .unwrap_or_default();
                if let Some(node) = nodes.get_mut(&output) {
                    node.subs = inherited;
                }
            } else {
                let children: Vec<GeometricCluster> = method
                    .inputs()
                    .iter()
                    .filter_map(|input| nodes.get(input).cloned())
                    .collect();
                if let Some(node) = nodes.get_mut(&output) {
                    node.subs = children;
                }
            }
        }

        let top_rigids: Vec<ClusterId> = self
            .engine
            .top_level()
            .iter()
            .filter(|c| c.is_rigid())
            .map(|c| c.id)
            .collect();
        match top_rigids.len() {
            0 => GeometricCluster {
                variables: Vec::new(),
                solutions: Vec::new(),
                subs: Vec::new(),
                flag: ClusterFlag::Unsolved,
            },
            1 => nodes.remove(&top_rigids[0]).unwrap_or_default(),
            _ => {
                let subs: Vec<GeometricCluster> = top_rigids
                    .iter()
                    .filter_map(|id| nodes.get(id).cloned())
                    .collect();
                let mut variables: Vec<Var> = subs
                    .iter()
                    .flat_map(|s| s.variables.iter().cloned())
                    .collect();
                variables.sort();
                variables.dedup();
                GeometricCluster {
                    variables,
                    solutions: Vec::new(),
                    subs,
                    flag: ClusterFlag::StructuralUnder,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::point2;
    use crate::problem::Parameter;

    fn triangle_problem() -> GeometricProblem {
        let mut problem = GeometricProblem::new(2);
        problem.add_point("A", point2(0.0, 0.0)).unwrap();
        problem.add_point("B", point2(1.0, 0.0)).unwrap();
        problem.add_point("C", point2(0.5, 1.0)).unwrap();
        problem
            .add_constraint(Constraint::distance("A", "B", 1.0))
            .unwrap();
        problem
            .add_constraint(Constraint::distance("B", "C", 1.25f64.sqrt()))
            .unwrap();
        problem
            .add_constraint(Constraint::distance("C", "A", 1.25f64.sqrt()))
            .unwrap();
        problem
    }

    #[test]
    fn test_unsupported_dimension() {
        let mut problem = GeometricProblem::new(4);
        assert_eq!(
            GeometricSolver::new(&mut problem).err(),
            Some(SolveError::UnsupportedDimension(4))
        );
    }

    #[test]
    fn test_bootstrap_maps_existing_state() {
        let mut problem = triangle_problem();
        let solver = GeometricSolver::new(&mut problem).unwrap();
        assert_eq!(solver.constrainedness(), Constrainedness::WellConstrained);
        let result = solver.result();
        assert_eq!(result.variables, ["A", "B", "C"]);
        assert_eq!(result.flag, ClusterFlag::Ok);
        assert!(!result.solutions.is_empty());
        for solution in &result.solutions {
            assert!(problem.verify(solution));
        }
    }

    #[test]
    fn test_incremental_matches_bootstrap() {
        // build the same triangle incrementally through update()
        let mut problem = GeometricProblem::new(2);
        let mut solver = GeometricSolver::new(&mut problem).unwrap();
        problem.add_point("A", point2(0.0, 0.0)).unwrap();
        problem.add_point("B", point2(1.0, 0.0)).unwrap();
        problem.add_point("C", point2(0.5, 1.0)).unwrap();
        problem
            .add_constraint(Constraint::distance("A", "B", 1.0))
            .unwrap();
        problem
            .add_constraint(Constraint::distance("B", "C", 1.25f64.sqrt()))
            .unwrap();
        problem
            .add_constraint(Constraint::distance("C", "A", 1.25f64.sqrt()))
            .unwrap();
        solver.update(&mut problem).unwrap();
        assert_eq!(solver.constrainedness(), Constrainedness::WellConstrained);
        let result = solver.result();
        assert_eq!(result.flag, ClusterFlag::Ok);
        for solution in &result.solutions {
            assert!(problem.verify(solution));
        }
    }

    #[test]
    fn test_set_point_repushes_prototype() {
        let mut problem = GeometricProblem::new(2);
        problem.add_point("A", point2(0.0, 0.0)).unwrap();
        let mut solver = GeometricSolver::new(&mut problem).unwrap();
        problem.set_point("A", point2(7.0, 8.0)).unwrap();
        solver.update(&mut problem).unwrap();
        let result = solver.result();
        let position = result.solutions[0].position("A").unwrap();
        assert_eq!(position, &point2(7.0, 8.0));
    }

    #[test]
    fn test_set_parameter_resolves_again() {
        let mut problem = GeometricProblem::new(2);
        problem.add_point("A", point2(0.0, 0.0)).unwrap();
        problem.add_point("B", point2(1.0, 0.0)).unwrap();
        let id = problem
            .add_constraint(Constraint::distance("A", "B", 1.0))
            .unwrap();
        let mut solver = GeometricSolver::new(&mut problem).unwrap();
        problem.set_parameter(id, Parameter::Distance(3.0)).unwrap();
        solver.update(&mut problem).unwrap();
        let result = solver.result();
        assert_eq!(result.flag, ClusterFlag::Ok);
        for solution in &result.solutions {
            assert!(problem.verify(solution));
        }
    }

    #[test]
    fn test_identity_map_stays_bijective() {
        let mut problem = triangle_problem();
        let mut solver = GeometricSolver::new(&mut problem).unwrap();
        assert_eq!(solver.var_to_cluster.len(), solver.cluster_to_var.len());
        assert_eq!(
            solver.constraint_to_cluster.len(),
            solver.cluster_to_constraint.len()
        );
        assert_eq!(solver.constraint_to_cluster.len(), 3);
        let id = problem.get_distance("A", "B").unwrap().id();
        problem.rem_constraint(id).unwrap();
        problem.rem_point("C").unwrap();
        solver.update(&mut problem).unwrap();
        assert_eq!(solver.var_to_cluster.len(), 2);
        assert_eq!(solver.cluster_to_var.len(), 2);
        // the distance on the removed point went away with it
        assert_eq!(solver.constraint_to_cluster.len(), 0);
        for (var, cluster) in &solver.var_to_cluster {
            assert_eq!(solver.cluster_to_var.get(cluster), Some(var));
        }
    }

    #[test]
    fn test_fix_aggregation_sets_root() {
        let mut problem = triangle_problem();
        let mut solver = GeometricSolver::new(&mut problem).unwrap();
        problem
            .add_constraint(Constraint::fix("A", point2(10.0, 10.0)))
            .unwrap();
        solver.update(&mut problem).unwrap();
        // one fix in 2D is not enough for a fixcluster
        assert!(solver.fixcluster.is_none());
        assert!(solver.cluster_solver().root().is_none());
        problem
            .add_constraint(Constraint::fix("B", point2(11.0, 10.0)))
            .unwrap();
        solver.update(&mut problem).unwrap();
        assert!(solver.fixcluster.is_some());
        assert_eq!(solver.cluster_solver().root(), solver.fixcluster);
        // solutions are expressed in the absolute frame now
        let result = solver.result();
        for solution in &result.solutions {
            let a = solution.position("A").unwrap();
            assert!((a[0] - 10.0).abs() < 1e-6);
            assert!((a[1] - 10.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_fix_removal_clears_root() {
        let mut problem = triangle_problem();
        let mut solver = GeometricSolver::new(&mut problem).unwrap();
        let fix_a = problem
            .add_constraint(Constraint::fix("A", point2(10.0, 10.0)))
            .unwrap();
        problem
            .add_constraint(Constraint::fix("B", point2(11.0, 10.0)))
            .unwrap();
        solver.update(&mut problem).unwrap();
        assert!(solver.fixcluster.is_some());
        problem.rem_constraint(fix_a).unwrap();
        solver.update(&mut problem).unwrap();
        assert!(solver.fixcluster.is_none());
        assert_eq!(solver.fixvars, ["B"]);
    }
}
