//! Crucible Agents - LLM-backed interventions for the optimization loop
//!
//! Two variants of one capability:
//! - repair: fixes infeasible/stagnating candidates, may retune epsilon
//! - diversity: re-spreads an over-converged population
//!
//! Both speak the same [`protocol::InterventionAgent`] contract; the engine
//! treats them polymorphically and enforces acceptance itself.

pub mod client;
pub mod diversity;
mod prompt;
pub mod protocol;
pub mod repair;

pub use client::{ChatClient, LlmConfig};
pub use diversity::DiversityAgent;
pub use protocol::{
    parse_edit_response, AgentEdit, AgentError, EditSource, EditTarget, IndividualSummary,
    InterventionAgent, ScriptedAgent, StatsSnapshot,
};
pub use repair::RepairAgent;
