//! Geometric constraint problems
//!
//! The authoring surface: a problem holds prototype positions for its point
//! variables and a [`ConstraintGraph`] of constraints over them. Mutations
//! are validated (unknown variables, duplicate constraints) and recorded on
//! an ordered event feed that solvers drain; within one mutation the problem
//! always completes its own state update before emitting notifications.

pub mod constraint;
pub mod graph;

use std::collections::{HashMap, VecDeque};
use std::fmt;

use log::debug;
use thiserror::Error;

pub use constraint::{Constraint, ConstraintId, ConstraintKind, Parameter};
pub use graph::{ConstraintGraph, GraphEvent};

use crate::cluster::configuration::Configuration;
use crate::core::math::{Position, Var};

/// Errors raised by problem authoring operations.
///
/// All of them are raised synchronously and leave the problem unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProblemError {
    /// The variable is already a point of the problem.
    #[error("point already in problem: {0}")]
    DuplicateVariable(Var),
    /// The variable is not a point of the problem.
    #[error("unknown point variable: {0}")]
    UnknownVariable(Var),
    /// An equivalent constraint already exists.
    #[error("constraint already in problem: {0}")]
    DuplicateConstraint(String),
    /// The constraint is not part of the problem.
    #[error("no such constraint in problem")]
    UnknownConstraint,
    /// The constraint or parameter cannot be used here.
    #[error("unsupported constraint: {0}")]
    UnsupportedConstraint(String),
    /// A position's length does not match the problem dimension.
    #[error("position has {got} components, problem dimension is {expected}")]
    DimensionMismatch {
        /// The problem dimension.
        expected: usize,
        /// The supplied vector length.
        got: usize,
    },
}

/// Result alias for problem authoring operations.
pub type ProblemResult<T> = Result<T, ProblemError>;

/// A change notification re-broadcast by a problem.
///
/// Graph mutations appear interleaved with problem-level events in mutation
/// order; selection constraints additionally travel on their own entries so
/// a listener can route them without consulting the identity map.
#[derive(Debug, Clone)]
pub enum Event {
    /// A point variable entered the constraint graph.
    AddVariable(Var),
    /// A point variable left the constraint graph.
    RemVariable(Var),
    /// A constraint entered the constraint graph.
    AddConstraint(Constraint),
    /// A constraint left the constraint graph.
    RemConstraint(Constraint),
    /// A prototype position changed.
    SetPoint(Var, Position),
    /// A parametric constraint changed; carries the updated constraint.
    SetParameter(Constraint),
    /// A selection constraint was added (side channel).
    AddSelectionConstraint(Constraint),
    /// A selection constraint was removed (side channel).
    RemSelectionConstraint(Constraint),
}

/// A geometric constraint problem with prototype positions.
#[derive(Debug)]
pub struct GeometricProblem {
    dimension: usize,
    prototype: HashMap<Var, Position>,
    graph: ConstraintGraph,
    events: VecDeque<Event>,
}

impl GeometricProblem {
    /// Create an empty problem of the given dimension.
    pub fn new(dimension: usize) -> Self {
        GeometricProblem {
            dimension,
            prototype: HashMap::new(),
            graph: ConstraintGraph::new(),
            events: VecDeque::new(),
        }
    }

    /// The problem dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The underlying constraint graph (read-only; mutations go through the
    /// problem so validation and notification stay consistent).
    pub fn graph(&self) -> &ConstraintGraph {
        &self.graph
    }

    /// The point variables, in insertion order.
    pub fn variables(&self) -> &[Var] {
        self.graph.variables()
    }

    /// The constraints, in insertion order.
    pub fn constraints(&self) -> &[Constraint] {
        self.graph.constraints()
    }

    /// Add a point variable with a prototype position.
    pub fn add_point(&mut self, variable: impl Into<Var>, position: Position) -> ProblemResult<()> {
        let variable = variable.into();
        if self.prototype.contains_key(&variable) {
            return Err(ProblemError::DuplicateVariable(variable));
        }
        self.check_dimension(&position)?;
        self.prototype.insert(variable.clone(), position);
        self.graph.add_variable(variable);
        self.pump();
        Ok(())
    }

    /// Update the prototype position of a point variable.
    pub fn set_point(&mut self, variable: &str, position: Position) -> ProblemResult<()> {
        if !self.prototype.contains_key(variable) {
            return Err(ProblemError::UnknownVariable(variable.to_string()));
        }
        self.check_dimension(&position)?;
        self.prototype.insert(variable.to_string(), position.clone());
        self.events
            .push_back(Event::SetPoint(variable.to_string(), position));
        Ok(())
    }

    /// Prototype position of a point variable.
    pub fn get_point(&self, variable: &str) -> ProblemResult<&Position> {
        self.prototype
            .get(variable)
            .ok_or_else(|| ProblemError::UnknownVariable(variable.to_string()))
    }

    /// Whether the variable is a point of the problem.
    pub fn has_point(&self, variable: &str) -> bool {
        self.prototype.contains_key(variable)
    }

    /// Remove a point variable; its incident constraints go with it.
    pub fn rem_point(&mut self, variable: &str) -> ProblemResult<()> {
        if !self.prototype.contains_key(variable) {
            return Err(ProblemError::UnknownVariable(variable.to_string()));
        }
        self.graph.rem_variable(variable);
        self.prototype.remove(variable);
        self.pump();
        Ok(())
    }

    /// Add a constraint, validating variables and per-kind uniqueness.
    pub fn add_constraint(&mut self, constraint: Constraint) -> ProblemResult<ConstraintId> {
        for var in constraint.variables() {
            if !self.prototype.contains_key(&var) {
                return Err(ProblemError::UnknownVariable(var));
            }
        }
        match constraint.kind() {
            ConstraintKind::Distance { a, b, .. } => {
                if self.get_distance(a, b).is_some() {
                    return Err(ProblemError::DuplicateConstraint(constraint.to_string()));
                }
            }
            ConstraintKind::Angle { a, b, c, .. } => {
                if self.get_angle(a, b, c).is_some() {
                    return Err(ProblemError::DuplicateConstraint(constraint.to_string()));
                }
            }
            ConstraintKind::Fix { variable, position } => {
                if self.get_fix(variable).is_some() {
                    return Err(ProblemError::DuplicateConstraint(constraint.to_string()));
                }
                self.check_dimension(position)?;
            }
            ConstraintKind::Selection(_) => {}
        }
        let id = constraint.id();
        self.graph.add_constraint(constraint);
        self.pump();
        Ok(id)
    }

    /// Remove a constraint by id.
    pub fn rem_constraint(&mut self, id: ConstraintId) -> ProblemResult<()> {
        if self.graph.rem_constraint(id).is_none() {
            return Err(ProblemError::UnknownConstraint);
        }
        self.pump();
        Ok(())
    }

    /// Edit the parameter of a parametric constraint and re-broadcast the
    /// change as a `SetParameter` event.
    pub fn set_parameter(&mut self, id: ConstraintId, value: Parameter) -> ProblemResult<()> {
        let constraint = self
            .graph
            .constraint_mut(id)
            .ok_or(ProblemError::UnknownConstraint)?;
        constraint.set_parameter(value)?;
        let updated = constraint.clone();
        self.events.push_back(Event::SetParameter(updated));
        Ok(())
    }

    /// The distance constraint on the unordered pair, if any.
    pub fn get_distance(&self, a: &str, b: &str) -> Option<&Constraint> {
        self.graph.constraints().iter().find(|c| match c.kind() {
            ConstraintKind::Distance { a: ca, b: cb, .. } => {
                (ca == a && cb == b) || (ca == b && cb == a)
            }
            _ => false,
        })
    }

    /// The angle constraint on the apex-ordered triple, if any.
    ///
    /// The triple matches with `b` as the apex, with `a` and `c` in either
    /// order.
    pub fn get_angle(&self, a: &str, b: &str, c: &str) -> Option<&Constraint> {
        self.graph.constraints().iter().find(|con| match con.kind() {
            ConstraintKind::Angle {
                a: ca, b: cb, c: cc, ..
            } => cb == b && ((ca == a && cc == c) || (ca == c && cc == a)),
            _ => false,
        })
    }

    /// The fix constraint on the variable, if any.
    pub fn get_fix(&self, variable: &str) -> Option<&Constraint> {
        self.graph.constraints().iter().find(|c| match c.kind() {
            ConstraintKind::Fix { variable: v, .. } => v == variable,
            _ => false,
        })
    }

    /// Whether every constraint is satisfied by the given solution.
    ///
    /// A solution missing any constrained variable fails verification.
    pub fn verify(&self, solution: &Configuration) -> bool {
        let mut satisfied = true;
        for constraint in self.graph.constraints() {
            let covered = constraint
                .variables()
                .iter()
                .all(|v| solution.contains(v));
            if !covered {
                debug!("verify: {} not covered by solution", constraint);
                satisfied = false;
            } else if !constraint.satisfied(solution) {
                debug!("verify: {} not satisfied", constraint);
                satisfied = false;
            }
        }
        satisfied
    }

    /// Drain pending change notifications, in mutation order.
    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    /// Translate pending graph events onto the unified feed, attaching the
    /// selection side channel.
    fn pump(&mut self) {
        for event in self.graph.take_events() {
            match event {
                GraphEvent::AddVariable(v) => self.events.push_back(Event::AddVariable(v)),
                GraphEvent::RemVariable(v) => self.events.push_back(Event::RemVariable(v)),
                GraphEvent::AddConstraint(c) => {
                    let selection = c.is_selection();
                    self.events.push_back(Event::AddConstraint(c.clone()));
                    if selection {
                        self.events.push_back(Event::AddSelectionConstraint(c));
                    }
                }
                GraphEvent::RemConstraint(c) => {
                    let selection = c.is_selection();
                    self.events.push_back(Event::RemConstraint(c.clone()));
                    if selection {
                        self.events.push_back(Event::RemSelectionConstraint(c));
                    }
                }
            }
        }
    }

    fn check_dimension(&self, position: &Position) -> ProblemResult<()> {
        if position.len() != self.dimension {
            return Err(ProblemError::DimensionMismatch {
                expected: self.dimension,
                got: position.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for GeometricProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for var in self.graph.variables() {
            if let Some(position) = self.prototype.get(var) {
                let coords: Vec<String> = position.iter().map(|x| format!("{:.4}", x)).collect();
                writeln!(f, "{} = ({})", var, coords.join(", "))?;
            }
        }
        for constraint in self.graph.constraints() {
            writeln!(f, "{}", constraint)?;
        }
        Ok(())
    }
}
