//! Run configuration.
//!
//! Everything tunable about a run lives here; defaults are sensible for small
//! problems and every knob can be overridden from the environment (the
//! binary's loading path) or set programmatically.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::stats::AgentTriggers;
use crate::surrogate::LowConfidencePolicy;
use crate::variation::VariationParams;

/// How an agent edit is judged after staged re-evaluation. Either way, an
/// edit that increases the infeasible count is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcceptancePolicy {
    /// The edited individual's Pareto rank must not strictly worsen.
    RankNonWorsening,
    /// No objective of the edited individual may strictly worsen.
    ObjectiveNonWorsening,
}

#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Target population size N.
    pub population_size: usize,
    pub max_generations: u64,
    /// Surrogate-call budget across the whole run, if any.
    pub max_evaluations: Option<u64>,
    pub variation: VariationParams,
    /// Below this surrogate confidence an evaluation is unreliable.
    pub confidence_threshold: f64,
    pub low_confidence_policy: LowConfidencePolicy,
    pub acceptance: AcceptancePolicy,
    pub triggers: AgentTriggers,
    /// Per-call timeout for agent proposals.
    pub agent_timeout: Duration,
    /// Bounded retries (with doubling backoff) per agent per generation.
    pub agent_retries: usize,
    /// Maximum edits considered from one agent response.
    pub edit_budget: usize,
    pub archive_capacity: Option<usize>,
    /// Terminate when the archive's ε-box set is unchanged this many
    /// generations.
    pub archive_patience: u64,
    pub seed: u64,
    /// Bounded parallelism for surrogate fan-out.
    pub workers: usize,
    pub checkpoint_path: Option<PathBuf>,
    /// Checkpoint every this many generations (0 disables periodic saves;
    /// the final flush still happens).
    pub checkpoint_interval: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            population_size: 32,
            max_generations: 100,
            max_evaluations: None,
            variation: VariationParams::default(),
            confidence_threshold: 0.2,
            low_confidence_policy: LowConfidencePolicy::default(),
            acceptance: AcceptancePolicy::RankNonWorsening,
            triggers: AgentTriggers::default(),
            agent_timeout: Duration::from_secs(90),
            agent_retries: 2,
            edit_budget: 4,
            archive_capacity: Some(128),
            archive_patience: 20,
            seed: 0,
            workers: 4,
            checkpoint_path: None,
            checkpoint_interval: 10,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .ok()
            .with_context(|| format!("{key} must be a valid value, got '{raw}'")),
        Err(_) => Ok(default),
    }
}

impl RunConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let variation = VariationParams {
            crossover_prob: env_parse("CRUCIBLE_CROSSOVER_PROB", defaults.variation.crossover_prob)?,
            eta_c: env_parse("CRUCIBLE_SBX_ETA", defaults.variation.eta_c)?,
            mutation_prob: env_parse("CRUCIBLE_MUTATION_PROB", defaults.variation.mutation_prob)?,
            sigma: env_parse("CRUCIBLE_MUTATION_SIGMA", defaults.variation.sigma)?,
        };
        let triggers = AgentTriggers {
            repair_feasibility_threshold: env_parse(
                "CRUCIBLE_REPAIR_FEASIBILITY",
                defaults.triggers.repair_feasibility_threshold,
            )?,
            repair_stagnation_patience: env_parse(
                "CRUCIBLE_REPAIR_PATIENCE",
                defaults.triggers.repair_stagnation_patience,
            )?,
            collapse_threshold: env_parse(
                "CRUCIBLE_COLLAPSE_THRESHOLD",
                defaults.triggers.collapse_threshold,
            )?,
            centroid_radius: env_parse(
                "CRUCIBLE_CENTROID_RADIUS",
                defaults.triggers.centroid_radius,
            )?,
            flat_front_threshold: env_parse(
                "CRUCIBLE_FLAT_FRONT_THRESHOLD",
                defaults.triggers.flat_front_threshold,
            )?,
        };
        let low_confidence_policy = match std::env::var("CRUCIBLE_LOW_CONFIDENCE")
            .unwrap_or_else(|_| "penalize".to_string())
            .to_lowercase()
            .as_str()
        {
            "fallback" => LowConfidencePolicy::Fallback,
            _ => LowConfidencePolicy::Penalize {
                penalty: env_parse("CRUCIBLE_CONFIDENCE_PENALTY", 1e3)?,
            },
        };
        let acceptance = match std::env::var("CRUCIBLE_ACCEPTANCE")
            .unwrap_or_else(|_| "rank".to_string())
            .to_lowercase()
            .as_str()
        {
            "objective" => AcceptancePolicy::ObjectiveNonWorsening,
            _ => AcceptancePolicy::RankNonWorsening,
        };

        Ok(Self {
            population_size: env_parse("CRUCIBLE_POPULATION", defaults.population_size)?,
            max_generations: env_parse("CRUCIBLE_GENERATIONS", defaults.max_generations)?,
            max_evaluations: std::env::var("CRUCIBLE_MAX_EVALUATIONS")
                .ok()
                .and_then(|v| v.parse().ok()),
            variation,
            confidence_threshold: env_parse(
                "CRUCIBLE_CONFIDENCE_THRESHOLD",
                defaults.confidence_threshold,
            )?,
            low_confidence_policy,
            acceptance,
            triggers,
            agent_timeout: Duration::from_secs(env_parse("CRUCIBLE_AGENT_TIMEOUT_SECS", 90u64)?),
            agent_retries: env_parse("CRUCIBLE_AGENT_RETRIES", defaults.agent_retries)?,
            edit_budget: env_parse("CRUCIBLE_EDIT_BUDGET", defaults.edit_budget)?,
            archive_capacity: match std::env::var("CRUCIBLE_ARCHIVE_CAPACITY") {
                Ok(raw) if raw.eq_ignore_ascii_case("none") => None,
                Ok(raw) => Some(raw.parse().context("CRUCIBLE_ARCHIVE_CAPACITY must be a number or 'none'")?),
                Err(_) => defaults.archive_capacity,
            },
            archive_patience: env_parse("CRUCIBLE_ARCHIVE_PATIENCE", defaults.archive_patience)?,
            seed: env_parse("CRUCIBLE_SEED", defaults.seed)?,
            workers: env_parse("CRUCIBLE_WORKERS", defaults.workers)?,
            checkpoint_path: std::env::var("CRUCIBLE_CHECKPOINT").ok().map(PathBuf::from),
            checkpoint_interval: env_parse(
                "CRUCIBLE_CHECKPOINT_INTERVAL",
                defaults.checkpoint_interval,
            )?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.population_size >= 2, "population size must be at least 2");
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.confidence_threshold),
            "confidence threshold must be in [0, 1]"
        );
        anyhow::ensure!(self.workers >= 1, "at least one evaluation worker required");
        Ok(())
    }
}
