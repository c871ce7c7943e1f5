//! Problem definition: the external contract a run optimizes against.
//!
//! Supplies dimensionality, per-dimension bounds, objective count and sense,
//! the initial epsilon vector, and an optional free-text context string that
//! is forwarded verbatim to the intervention agents.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::EngineError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProblemDefinition {
    pub name: String,
    /// Inclusive (low, high) bound per parameter dimension.
    pub bounds: Vec<(f64, f64)>,
    pub objective_count: usize,
    /// One ε-dominance slack per objective.
    pub epsilon: Vec<f64>,
    /// Objectives flagged true are maximized; the engine negates them on the
    /// way in so everything downstream is a minimization.
    #[serde(default)]
    pub maximize: Vec<bool>,
    /// Problem-specific description handed to the agents, e.g. what each
    /// parameter and objective physically means.
    #[serde(default)]
    pub context: String,
}

impl ProblemDefinition {
    pub fn dimension(&self) -> usize {
        self.bounds.len()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)?;
        let problem: ProblemDefinition = serde_json::from_str(&raw)?;
        problem.validate()?;
        Ok(problem)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.bounds.is_empty() {
            return Err(EngineError::InvalidProblem(
                "at least one parameter dimension required".to_string(),
            ));
        }
        for (i, &(lo, hi)) in self.bounds.iter().enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                return Err(EngineError::InvalidProblem(format!(
                    "bad bounds for dimension {i}: [{lo}, {hi}]"
                )));
            }
        }
        if self.objective_count == 0 {
            return Err(EngineError::InvalidProblem(
                "at least one objective required".to_string(),
            ));
        }
        if self.epsilon.len() != self.objective_count {
            return Err(EngineError::InvalidProblem(format!(
                "epsilon arity {} does not match {} objectives",
                self.epsilon.len(),
                self.objective_count
            )));
        }
        if self.epsilon.iter().any(|&e| !e.is_finite() || e <= 0.0) {
            return Err(EngineError::InvalidProblem(
                "epsilon components must be positive and finite".to_string(),
            ));
        }
        if !self.maximize.is_empty() && self.maximize.len() != self.objective_count {
            return Err(EngineError::InvalidProblem(format!(
                "maximize arity {} does not match {} objectives",
                self.maximize.len(),
                self.objective_count
            )));
        }
        Ok(())
    }

    /// Flip maximized objectives into the minimization convention used by the
    /// sorter and archive.
    pub fn orient_objectives(&self, objectives: &mut [f64]) {
        for (i, flag) in self.maximize.iter().enumerate() {
            if *flag {
                objectives[i] = -objectives[i];
            }
        }
    }

    pub fn clip(&self, dim: usize, value: f64) -> f64 {
        let (lo, hi) = self.bounds[dim];
        value.clamp(lo, hi)
    }
}
