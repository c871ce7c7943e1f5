//! Intervention protocol shared by the engine and the agent implementations.
//!
//! Agents never touch the population directly. They receive a read-only
//! [`StatsSnapshot`] plus a problem-supplied context string and return a list of
//! proposed [`AgentEdit`]s; the optimization loop validates, stages, and
//! accepts or rejects every edit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("malformed agent response: {0}")]
    Malformed(String),
}

/// Which agent produced an edit. Carried through to logs and acceptance checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditSource {
    Repair,
    Diversity,
}

impl std::fmt::Display for EditSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditSource::Repair => write!(f, "repair"),
            EditSource::Diversity => write!(f, "diversity"),
        }
    }
}

/// What an edit points at: a single parameter of one individual, or one
/// component of the global epsilon vector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditTarget {
    Parameter { individual: Uuid, index: usize },
    Epsilon { index: usize },
}

/// A proposed mutation. Edits are data: nothing is applied until the loop
/// controller has re-evaluated the staged result and accepted it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentEdit {
    pub target: EditTarget,
    pub value: f64,
    pub source: EditSource,
    /// Free-text justification from the agent. Logged, never used for control.
    #[serde(default)]
    pub rationale: String,
}

/// Per-individual view included in the snapshot so agents can reference
/// candidates by id and read their current parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndividualSummary {
    pub id: Uuid,
    pub params: Vec<f64>,
    pub objectives: Vec<f64>,
    pub rank: usize,
    pub feasible: bool,
}

/// Read-only population summary handed to agents each time they are invoked.
///
/// The statistics mirror what the agents actually reason about: per-parameter
/// spread, parameter/objective correlation, how much of the population has
/// collapsed onto the centroid, and the current epsilon granularity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub generation: u64,
    pub parameter_count: usize,
    pub objective_count: usize,
    /// Per-dimension (low, high) bounds, for the bounds reminder in prompts
    /// and for validating proposed values.
    pub bounds: Vec<(f64, f64)>,
    pub epsilon: Vec<f64>,
    /// Count of individuals per Pareto rank, index = rank.
    pub rank_histogram: Vec<usize>,
    /// Fraction of the population with finite objectives and acceptable
    /// surrogate confidence.
    pub feasibility_ratio: f64,
    pub front0_size: usize,
    /// Consecutive generations with an unchanged front-0 size.
    pub front0_stagnant_for: u64,
    pub param_mean: Vec<f64>,
    pub param_std: Vec<f64>,
    pub objective_min: Vec<f64>,
    pub objective_max: Vec<f64>,
    /// Pearson correlation, `[param][objective]`.
    pub param_objective_corr: Vec<Vec<f64>>,
    /// Pearson correlation between parameter dimensions, `[param][param]`.
    pub param_param_corr: Vec<Vec<f64>>,
    /// Leading principal components of the population's parameter cloud,
    /// `[component][param]`, strongest first.
    pub pca_loadings: Vec<Vec<f64>>,
    /// Fraction of total parameter variance per component in `pca_loadings`.
    pub pca_explained_variance: Vec<f64>,
    /// Fraction of the population within the configured normalized radius of
    /// the population centroid.
    pub centroid_concentration: f64,
    /// Fraction of non-boundary front-0 members whose crowding distance is
    /// effectively zero.
    pub front0_crowding_zero_ratio: f64,
    /// Maximum number of edits the controller will consider this generation.
    pub edit_budget: usize,
    pub individuals: Vec<IndividualSummary>,
}

impl StatsSnapshot {
    pub fn contains_individual(&self, id: Uuid) -> bool {
        self.individuals.iter().any(|i| i.id == id)
    }
}

/// One capability, two variants (repair and diversity). The optimization loop
/// treats both polymorphically and enforces the same acceptance policy on
/// whatever they return.
#[async_trait]
pub trait InterventionAgent: Send + Sync {
    fn name(&self) -> &str;

    /// Propose edits for the current generation. Errors and timeouts are
    /// non-fatal to the caller: the generation simply proceeds unedited.
    async fn propose(
        &self,
        stats: &StatsSnapshot,
        context: &str,
    ) -> Result<Vec<AgentEdit>, AgentError>;
}

/// Wire format the LLM is instructed to emit: a JSON array of these objects.
/// `individual: null` addresses the epsilon vector instead of a candidate.
#[derive(Debug, Deserialize)]
struct WireEdit {
    individual: Option<Uuid>,
    index: usize,
    value: f64,
    #[serde(default)]
    rationale: String,
}

/// Parse and validate a raw model reply into edits.
///
/// The reply may carry prose around the array; the first `[` .. last `]` span
/// is taken as the payload. Any edit referencing an unknown individual or an
/// out-of-range index rejects the whole response.
pub fn parse_edit_response(
    raw: &str,
    stats: &StatsSnapshot,
    source: EditSource,
) -> Result<Vec<AgentEdit>, AgentError> {
    let json_str = match (raw.find('['), raw.rfind(']')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => {
            return Err(AgentError::Malformed(
                "no JSON array found in response".to_string(),
            ))
        }
    };

    let wire: Vec<WireEdit> = serde_json::from_str(json_str)
        .map_err(|e| AgentError::Malformed(format!("invalid edit array: {e}")))?;

    let mut edits = Vec::with_capacity(wire.len());
    for w in wire {
        if !w.value.is_finite() {
            return Err(AgentError::Malformed(format!(
                "non-finite value {} proposed",
                w.value
            )));
        }
        let target = match w.individual {
            Some(id) => {
                if !stats.contains_individual(id) {
                    return Err(AgentError::Malformed(format!(
                        "edit references unknown individual {id}"
                    )));
                }
                if w.index >= stats.parameter_count {
                    return Err(AgentError::Malformed(format!(
                        "parameter index {} out of range (dim {})",
                        w.index, stats.parameter_count
                    )));
                }
                let (lo, hi) = stats.bounds[w.index];
                if w.value < lo || w.value > hi {
                    return Err(AgentError::Malformed(format!(
                        "value {} outside bounds [{lo}, {hi}] for parameter {}",
                        w.value, w.index
                    )));
                }
                EditTarget::Parameter {
                    individual: id,
                    index: w.index,
                }
            }
            None => {
                if w.index >= stats.objective_count {
                    return Err(AgentError::Malformed(format!(
                        "epsilon index {} out of range ({} objectives)",
                        w.index, stats.objective_count
                    )));
                }
                if w.value <= 0.0 {
                    return Err(AgentError::Malformed(format!(
                        "epsilon must stay positive, got {}",
                        w.value
                    )));
                }
                EditTarget::Epsilon { index: w.index }
            }
        };
        edits.push(AgentEdit {
            target,
            value: w.value,
            source,
            rationale: w.rationale,
        });
    }
    Ok(edits)
}

/// Deterministic agent for tests and replayed runs: pops one pre-scripted
/// response per `propose` call, then answers with no edits.
pub struct ScriptedAgent {
    name: String,
    responses: Mutex<VecDeque<Vec<AgentEdit>>>,
}

impl ScriptedAgent {
    pub fn new(name: impl Into<String>, responses: Vec<Vec<AgentEdit>>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(responses.into()),
        }
    }

    /// An agent that never proposes anything.
    pub fn silent(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }
}

#[async_trait]
impl InterventionAgent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn propose(
        &self,
        _stats: &StatsSnapshot,
        _context: &str,
    ) -> Result<Vec<AgentEdit>, AgentError> {
        let mut responses = self
            .responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(responses.pop_front().unwrap_or_default())
    }
}
