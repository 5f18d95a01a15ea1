//! Constraint graph
//!
//! Stores the variables and constraints of a problem in insertion order and
//! records every mutation as a [`GraphEvent`]. The owning problem drains the
//! event feed after each mutation and re-broadcasts it to its listeners, so
//! delivery order always matches mutation order.

use std::collections::VecDeque;

use super::constraint::{Constraint, ConstraintId};
use crate::core::math::Var;

/// A change notification emitted by the constraint graph.
///
/// Constraint events carry the constraint by value: a removal handler must
/// still be able to see the variables and kind of what was removed.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// A variable was added.
    AddVariable(Var),
    /// A variable was removed.
    RemVariable(Var),
    /// A constraint was added.
    AddConstraint(Constraint),
    /// A constraint was removed.
    RemConstraint(Constraint),
}

/// Variables, constraints and their incidence.
#[derive(Debug, Default)]
pub struct ConstraintGraph {
    variables: Vec<Var>,
    constraints: Vec<Constraint>,
    events: VecDeque<GraphEvent>,
}

impl ConstraintGraph {
    /// Create an empty constraint graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// The variables, in insertion order.
    pub fn variables(&self) -> &[Var] {
        &self.variables
    }

    /// The constraints, in insertion order.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Whether the variable is a vertex of the graph.
    pub fn has_variable(&self, var: &str) -> bool {
        self.variables.iter().any(|v| v == var)
    }

    /// Look up a constraint by id.
    pub fn constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.id() == id)
    }

    pub(crate) fn constraint_mut(&mut self, id: ConstraintId) -> Option<&mut Constraint> {
        self.constraints.iter_mut().find(|c| c.id() == id)
    }

    /// Constraints incident to the variable.
    pub fn constraints_on(&self, var: &str) -> Vec<&Constraint> {
        self.constraints
            .iter()
            .filter(|c| c.variables().iter().any(|v| v == var))
            .collect()
    }

    /// Add a variable vertex. Adding a present variable is a no-op.
    pub fn add_variable(&mut self, var: Var) {
        if self.has_variable(&var) {
            return;
        }
        self.variables.push(var.clone());
        self.events.push_back(GraphEvent::AddVariable(var));
    }

    /// Remove a variable, cascading removal of its incident constraints.
    pub fn rem_variable(&mut self, var: &str) {
        if !self.has_variable(var) {
            return;
        }
        let incident: Vec<ConstraintId> = self
            .constraints_on(var)
            .iter()
            .map(|c| c.id())
            .collect();
        for id in incident {
            self.rem_constraint(id);
        }
        self.variables.retain(|v| v != var);
        self.events.push_back(GraphEvent::RemVariable(var.to_string()));
    }

    /// Add a constraint edge. The caller validates that all of the
    /// constraint's variables are present.
    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.events
            .push_back(GraphEvent::AddConstraint(constraint.clone()));
        self.constraints.push(constraint);
    }

    /// Remove a constraint by id, returning it when present.
    pub fn rem_constraint(&mut self, id: ConstraintId) -> Option<Constraint> {
        let index = self.constraints.iter().position(|c| c.id() == id)?;
        let removed = self.constraints.remove(index);
        self.events
            .push_back(GraphEvent::RemConstraint(removed.clone()));
        Some(removed)
    }

    /// Drain pending change notifications, in mutation order.
    pub fn take_events(&mut self) -> Vec<GraphEvent> {
        self.events.drain(..).collect()
    }
}
