//! Crucible Core Library
//!
//! The optimization engine: ε-dominance sorting, NSGA-II selection and
//! variation, the Pareto archive, surrogate evaluation, and the generational
//! loop that wires in the intervention agents from `crucible-agents`.

pub mod archive;
pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod error;
pub mod individual;
pub mod population;
pub mod problem;
pub mod sorter;
pub mod stats;
pub mod surrogate;
pub mod variation;

// Re-export key types for convenience
pub use archive::Archive;
pub use checkpoint::Checkpoint;
pub use config::{AcceptancePolicy, RunConfig};
pub use controller::{OptimizationLoop, RunReport, StopReason};
pub use error::EngineError;
pub use individual::{Individual, Population};
pub use problem::ProblemDefinition;
pub use surrogate::{Evaluation, LowConfidencePolicy, RbfSurrogate, Surrogate, SurrogateError};
