//! The optimization loop.
//!
//! One controller owns the population, the archive, the epsilon vector, and
//! the RNG for the duration of a run. Per generation it walks
//! INIT -> EVALUATE -> SORT -> SELECT -> VARY -> EVALUATE_OFFSPRING -> MERGE
//! -> AGENT_CHECK -> CHECKPOINT and loops until a budget is exhausted, the
//! archive stalls, a cancel is requested, or a structural failure occurs.
//! Evaluation fans out over a bounded worker pool; everything that mutates
//! shared state runs in the controller's own task.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crucible_agents::{AgentEdit, EditSource, EditTarget, InterventionAgent, StatsSnapshot};

use crate::archive::Archive;
use crate::checkpoint::Checkpoint;
use crate::config::{AcceptancePolicy, RunConfig};
use crate::error::EngineError;
use crate::individual::{Individual, Population};
use crate::population::{merge_and_truncate, select_parent_pairs};
use crate::problem::ProblemDefinition;
use crate::sorter::assign_ranks;
use crate::stats::{build_snapshot, diversity_triggered, repair_triggered};
use crate::surrogate::{Evaluation, LowConfidencePolicy, Surrogate, SurrogateError};
use crate::variation::{produce_offspring, sample_uniform};

/// Why a run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    GenerationBudget,
    EvaluationBudget,
    ArchiveStalled { generations: u64 },
    Cancelled,
    Failure(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::GenerationBudget => write!(f, "generation budget exhausted"),
            StopReason::EvaluationBudget => write!(f, "evaluation budget exhausted"),
            StopReason::ArchiveStalled { generations } => {
                write!(f, "archive unchanged for {generations} generations")
            }
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// Final state handed back to the caller. The archive is the durable result;
/// the population is included for inspection and resume.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub reason: StopReason,
    pub generations: u64,
    pub evaluations: u64,
    pub archive: Archive,
    pub population: Population,
}

pub struct OptimizationLoop {
    problem: ProblemDefinition,
    config: RunConfig,
    surrogate: Arc<dyn Surrogate>,
    /// External real evaluator used by the fallback confidence policy.
    fallback: Option<Arc<dyn Surrogate>>,
    repair_agent: Option<Arc<dyn InterventionAgent>>,
    diversity_agent: Option<Arc<dyn InterventionAgent>>,
    cancel: Arc<AtomicBool>,

    population: Population,
    archive: Archive,
    epsilon: Vec<f64>,
    rng: ChaCha8Rng,
    evaluations: u64,
    front0_stagnant_for: u64,
    archive_stagnant_for: u64,
    last_front0_size: Option<usize>,
    last_archive_signature: BTreeSet<Vec<i64>>,
}

impl OptimizationLoop {
    pub fn new(
        problem: ProblemDefinition,
        config: RunConfig,
        surrogate: Arc<dyn Surrogate>,
    ) -> Result<Self, EngineError> {
        problem.validate()?;
        config
            .validate()
            .map_err(|e| EngineError::InvalidProblem(e.to_string()))?;
        if surrogate.objective_count() != problem.objective_count {
            return Err(EngineError::InvalidProblem(format!(
                "surrogate produces {} objectives, problem declares {}",
                surrogate.objective_count(),
                problem.objective_count
            )));
        }

        let epsilon = problem.epsilon.clone();
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        let population = Population::new(config.population_size);
        let archive = Archive::new(config.archive_capacity);

        Ok(Self {
            problem,
            config,
            surrogate,
            fallback: None,
            repair_agent: None,
            diversity_agent: None,
            cancel: Arc::new(AtomicBool::new(false)),
            population,
            archive,
            epsilon,
            rng,
            evaluations: 0,
            front0_stagnant_for: 0,
            archive_stagnant_for: 0,
            last_front0_size: None,
            last_archive_signature: BTreeSet::new(),
        })
    }

    /// Restore a controller from a checkpoint. The problem, config, and
    /// surrogate are supplied fresh; everything stochastic comes from the
    /// snapshot, so the continuation replays exactly.
    pub fn resume(
        problem: ProblemDefinition,
        config: RunConfig,
        surrogate: Arc<dyn Surrogate>,
        checkpoint: Checkpoint,
    ) -> Result<Self, EngineError> {
        let mut controller = Self::new(problem, config, surrogate)?;
        if checkpoint.epsilon.len() != controller.problem.objective_count {
            return Err(EngineError::Checkpoint(format!(
                "checkpoint epsilon arity {} does not match problem",
                checkpoint.epsilon.len()
            )));
        }
        controller.epsilon = checkpoint.epsilon;
        controller.rng = checkpoint.rng;
        controller.population = checkpoint.population;
        controller.archive = checkpoint.archive;
        controller.evaluations = checkpoint.evaluations_used;
        controller.front0_stagnant_for = checkpoint.front0_stagnant_for;
        controller.archive_stagnant_for = checkpoint.archive_stagnant_for;
        controller.last_archive_signature =
            controller.archive.box_signature(&controller.epsilon);
        info!(
            generation = checkpoint.generation,
            "resumed from checkpoint"
        );
        Ok(controller)
    }

    pub fn with_repair_agent(mut self, agent: Arc<dyn InterventionAgent>) -> Self {
        self.repair_agent = Some(agent);
        self
    }

    pub fn with_diversity_agent(mut self, agent: Arc<dyn InterventionAgent>) -> Self {
        self.diversity_agent = Some(agent);
        self
    }

    pub fn with_fallback_evaluator(mut self, evaluator: Arc<dyn Surrogate>) -> Self {
        self.fallback = Some(evaluator);
        self
    }

    /// Flag checked at generation boundaries; setting it flushes the archive
    /// checkpoint and stops the run.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Run to termination. Structural failures end the run with
    /// `StopReason::Failure`, preserving the last valid archive.
    pub async fn run(&mut self) -> RunReport {
        if self.population.is_empty() {
            self.init_population();
        }

        let reason = loop {
            if self.cancel.load(Ordering::Relaxed) {
                break StopReason::Cancelled;
            }
            if self.population.generation >= self.config.max_generations {
                break StopReason::GenerationBudget;
            }
            if let Some(budget) = self.config.max_evaluations {
                if self.evaluations >= budget {
                    break StopReason::EvaluationBudget;
                }
            }
            if self.archive_stagnant_for >= self.config.archive_patience
                && !self.archive.is_empty()
            {
                break StopReason::ArchiveStalled {
                    generations: self.archive_stagnant_for,
                };
            }

            match self.step_generation().await {
                Ok(()) => {}
                Err(e) => {
                    warn!(error = %e, "structural failure, terminating");
                    break StopReason::Failure(e.to_string());
                }
            }
        };

        // Always flush the best-found archive before exiting.
        if let Err(e) = self.save_checkpoint() {
            warn!(error = %e, "final checkpoint flush failed");
        }
        info!(
            reason = %reason,
            generations = self.population.generation,
            evaluations = self.evaluations,
            archive = self.archive.len(),
            "run terminated"
        );

        RunReport {
            reason,
            generations: self.population.generation,
            evaluations: self.evaluations,
            archive: self.archive.clone(),
            population: self.population.clone(),
        }
    }

    /// INIT: validate happened in the constructor; sample the initial
    /// population uniformly within bounds from the seeded source.
    fn init_population(&mut self) {
        debug!(phase = "INIT", n = self.config.population_size, "sampling initial population");
        for _ in 0..self.config.population_size {
            let params = sample_uniform(&self.problem.bounds, &mut self.rng);
            self.population
                .members
                .push(Individual::new(params, 0, &mut self.rng));
        }
    }

    async fn step_generation(&mut self) -> Result<(), EngineError> {
        let generation = self.population.generation;

        debug!(phase = "EVALUATE", generation);
        let pending: Vec<usize> = (0..self.population.len())
            .filter(|&i| !self.population.members[i].is_evaluated())
            .collect();
        self.evaluate_members(pending).await?;

        debug!(phase = "SORT", generation);
        assign_ranks(&mut self.population.members, &self.epsilon);

        debug!(phase = "SELECT", generation);
        let pairs = (self.config.population_size + 1) / 2;
        let parent_pairs = select_parent_pairs(&self.population, pairs, &mut self.rng);

        debug!(phase = "VARY", generation);
        let mut offspring = Vec::with_capacity(self.config.population_size);
        for (a, b) in parent_pairs {
            let (c1, c2) = produce_offspring(
                &self.population.members[a].params,
                &self.population.members[b].params,
                &self.problem.bounds,
                &self.config.variation,
                &mut self.rng,
            );
            for child in [c1, c2] {
                if offspring.len() < self.config.population_size {
                    offspring.push(Individual::new(child, generation + 1, &mut self.rng));
                }
            }
        }

        debug!(phase = "EVALUATE_OFFSPRING", generation, count = offspring.len());
        self.evaluate_detached(&mut offspring).await?;

        debug!(phase = "MERGE", generation);
        merge_and_truncate(&mut self.population, offspring, &self.epsilon);

        self.update_archive_and_stagnation();

        debug!(phase = "AGENT_CHECK", generation);
        self.agent_check().await?;

        debug!(phase = "CHECKPOINT", generation);
        if self.config.checkpoint_interval > 0
            && (generation + 1) % self.config.checkpoint_interval == 0
        {
            self.save_checkpoint()?;
        }

        self.population.generation += 1;
        Ok(())
    }

    /// Promote front-0 feasible members, then track whether the archive's
    /// ε-box set and the population's front-0 size moved this generation.
    fn update_archive_and_stagnation(&mut self) {
        let candidates: Vec<Individual> = self
            .population
            .members
            .iter()
            .filter(|i| i.rank == Some(0) && i.feasible)
            .cloned()
            .collect();
        self.archive.update(&candidates, &self.epsilon);

        let signature = self.archive.box_signature(&self.epsilon);
        if signature == self.last_archive_signature {
            self.archive_stagnant_for += 1;
        } else {
            self.archive_stagnant_for = 0;
            self.last_archive_signature = signature;
        }

        let front0 = self.population.front0_size();
        if self.last_front0_size == Some(front0) {
            self.front0_stagnant_for += 1;
        } else {
            self.front0_stagnant_for = 0;
            self.last_front0_size = Some(front0);
        }
    }

    // ----- evaluation ------------------------------------------------------

    /// Evaluate population members by index over the worker pool, merging
    /// results back by index in this task.
    async fn evaluate_members(&mut self, indices: Vec<usize>) -> Result<(), EngineError> {
        let results = self
            .fan_out(
                indices
                    .iter()
                    .map(|&i| (i, self.population.members[i].params.clone()))
                    .collect(),
            )
            .await?;
        for (idx, evaluation) in results {
            self.ingest(idx, evaluation)?;
        }
        Ok(())
    }

    /// Same as `evaluate_members` for individuals not yet in the population.
    async fn evaluate_detached(&mut self, members: &mut [Individual]) -> Result<(), EngineError> {
        let results = self
            .fan_out(
                members
                    .iter()
                    .enumerate()
                    .map(|(i, m)| (i, m.params.clone()))
                    .collect(),
            )
            .await?;
        for (idx, evaluation) in results {
            let threshold = self.config.confidence_threshold;
            let resolved = self.resolve_confidence(&members[idx].params, evaluation)?;
            let mut objectives = resolved.objectives;
            self.problem.orient_objectives(&mut objectives);
            members[idx].set_evaluation(objectives, resolved.confidence, threshold);
        }
        Ok(())
    }

    /// Dispatch surrogate calls across the bounded pool; results come back
    /// tagged with their index so association never depends on completion
    /// order.
    async fn fan_out(
        &mut self,
        work: Vec<(usize, Vec<f64>)>,
    ) -> Result<Vec<(usize, Evaluation)>, EngineError> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut join_set: JoinSet<(usize, Result<Evaluation, SurrogateError>)> = JoinSet::new();

        let count = work.len() as u64;
        for (idx, params) in work {
            let surrogate = Arc::clone(&self.surrogate);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (idx, surrogate.evaluate(&params))
            });
        }

        let mut results = Vec::with_capacity(count as usize);
        while let Some(joined) = join_set.join_next().await {
            let (idx, outcome) =
                joined.map_err(|e| EngineError::Worker(format!("evaluation task failed: {e}")))?;
            results.push((idx, outcome?));
        }
        self.evaluations += count;

        // Stable per-individual association for downstream tie-breaking.
        results.sort_by_key(|(idx, _)| *idx);
        Ok(results)
    }

    /// Merge one evaluation into a population member, applying the
    /// low-confidence policy first.
    fn ingest(&mut self, idx: usize, evaluation: Evaluation) -> Result<(), EngineError> {
        let params = self.population.members[idx].params.clone();
        let resolved = self.resolve_confidence(&params, evaluation)?;
        let mut objectives = resolved.objectives;
        self.problem.orient_objectives(&mut objectives);
        self.population.members[idx].set_evaluation(
            objectives,
            resolved.confidence,
            self.config.confidence_threshold,
        );
        Ok(())
    }

    /// Apply the configured policy to an unreliable evaluation. Never fatal.
    fn resolve_confidence(
        &mut self,
        params: &[f64],
        evaluation: Evaluation,
    ) -> Result<Evaluation, EngineError> {
        if evaluation.confidence >= self.config.confidence_threshold {
            return Ok(evaluation);
        }
        match self.config.low_confidence_policy {
            LowConfidencePolicy::Penalize { penalty } => {
                debug!(
                    generation = self.population.generation,
                    confidence = evaluation.confidence,
                    "low-confidence evaluation penalized"
                );
                Ok(Evaluation {
                    objectives: evaluation.objectives.iter().map(|o| o + penalty).collect(),
                    confidence: evaluation.confidence,
                })
            }
            LowConfidencePolicy::Fallback => match &self.fallback {
                Some(real) => {
                    debug!(
                        generation = self.population.generation,
                        "routing low-confidence individual to fallback evaluator"
                    );
                    self.evaluations += 1;
                    Ok(real.evaluate(params)?)
                }
                None => {
                    warn!("fallback policy configured but no fallback evaluator installed; penalizing");
                    Ok(Evaluation {
                        objectives: evaluation.objectives.iter().map(|o| o + 1e3).collect(),
                        confidence: evaluation.confidence,
                    })
                }
            },
        }
    }

    // ----- agents ----------------------------------------------------------

    async fn agent_check(&mut self) -> Result<(), EngineError> {
        if self.repair_agent.is_none() && self.diversity_agent.is_none() {
            return Ok(());
        }

        let stats = build_snapshot(
            &self.population,
            &self.problem,
            self.front0_stagnant_for,
            &self.epsilon,
            self.config.triggers.centroid_radius,
            self.config.edit_budget,
        );

        if let Some(agent) = self.repair_agent.clone() {
            if repair_triggered(&stats, &self.config.triggers) {
                info!(
                    generation = stats.generation,
                    feasibility = stats.feasibility_ratio,
                    stagnant = stats.front0_stagnant_for,
                    "repair agent triggered"
                );
                let edits = self.invoke_agent(agent.as_ref(), &stats).await;
                self.apply_edit_set(edits, EditSource::Repair)?;
            }
        }

        if let Some(agent) = self.diversity_agent.clone() {
            // Rebuild the snapshot if repair already changed the population.
            let stats = build_snapshot(
                &self.population,
                &self.problem,
                self.front0_stagnant_for,
                &self.epsilon,
                self.config.triggers.centroid_radius,
                self.config.edit_budget,
            );
            if diversity_triggered(&stats, &self.config.triggers) {
                info!(
                    generation = stats.generation,
                    concentration = stats.centroid_concentration,
                    flat_ratio = stats.front0_crowding_zero_ratio,
                    "diversity agent triggered"
                );
                let edits = self.invoke_agent(agent.as_ref(), &stats).await;
                self.apply_edit_set(edits, EditSource::Diversity)?;
            }
        }
        Ok(())
    }

    /// One agent call with timeout and bounded doubling backoff. Any failure
    /// degrades to "no edits this generation".
    async fn invoke_agent(
        &self,
        agent: &dyn InterventionAgent,
        stats: &StatsSnapshot,
    ) -> Vec<AgentEdit> {
        let mut backoff = Duration::from_millis(500);
        for attempt in 0..=self.config.agent_retries {
            match tokio::time::timeout(
                self.config.agent_timeout,
                agent.propose(stats, &self.problem.context),
            )
            .await
            {
                Ok(Ok(mut edits)) => {
                    if edits.len() > self.config.edit_budget {
                        warn!(
                            agent = agent.name(),
                            proposed = edits.len(),
                            budget = self.config.edit_budget,
                            "edit budget exceeded, truncating"
                        );
                        edits.truncate(self.config.edit_budget);
                    }
                    return edits;
                }
                Ok(Err(e)) => {
                    warn!(agent = agent.name(), attempt, error = %e, "agent proposal failed");
                }
                Err(_) => {
                    warn!(agent = agent.name(), attempt, "agent proposal timed out");
                }
            }
            if attempt < self.config.agent_retries {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(30));
            }
        }
        warn!(agent = agent.name(), "giving up on agent for this generation");
        Vec::new()
    }

    /// Stage, re-evaluate, and accept or reject each edit; then enforce the
    /// diversity post-condition on the set as a whole.
    fn apply_edit_set(&mut self, edits: Vec<AgentEdit>, source: EditSource) -> Result<(), EngineError> {
        if edits.is_empty() {
            return Ok(());
        }
        // The LLM wire parser validates its own output, but the controller
        // cannot trust an arbitrary agent implementation: a single edit with
        // an out-of-range index or bad value discards the whole set.
        for edit in &edits {
            let valid = edit.value.is_finite()
                && match edit.target {
                    EditTarget::Epsilon { index } => {
                        index < self.epsilon.len() && edit.value > 0.0
                    }
                    EditTarget::Parameter { index, .. } => index < self.problem.dimension(),
                };
            if !valid {
                warn!(
                    %source,
                    edit_target = ?edit.target,
                    value = edit.value,
                    "invalid edit target or value, discarding the whole set"
                );
                return Ok(());
            }
        }

        let pre_set_population = self.population.clone();
        let pre_set_front0 = self.population.front0_size();
        let mut accepted = 0usize;

        for edit in edits {
            match edit.target {
                EditTarget::Epsilon { index } => {
                    if source != EditSource::Repair {
                        warn!(%source, "epsilon edit from non-repair agent rejected");
                        continue;
                    }
                    self.apply_epsilon_edit(index, edit.value, &edit.rationale);
                    accepted += 1;
                }
                EditTarget::Parameter { individual, index } => {
                    if self.try_parameter_edit(individual, index, edit.value, source)? {
                        accepted += 1;
                        debug!(
                            %source,
                            individual = %individual,
                            index,
                            value = edit.value,
                            rationale = %edit.rationale,
                            "edit accepted"
                        );
                    }
                }
            }
        }

        // Diversity interventions must not shrink the first front.
        if source == EditSource::Diversity && accepted > 0 {
            let post_front0 = self.population.front0_size();
            if post_front0 < pre_set_front0 {
                warn!(
                    pre = pre_set_front0,
                    post = post_front0,
                    "diversity edits shrank front 0, reverting the whole set"
                );
                self.population = pre_set_population;
            }
        }
        Ok(())
    }

    /// Epsilon edits re-rank the population and rebuild the archive so the
    /// pairwise invariant holds under the new slack.
    fn apply_epsilon_edit(&mut self, index: usize, value: f64, rationale: &str) {
        let old = self.epsilon[index];
        self.epsilon[index] = value;
        assign_ranks(&mut self.population.members, &self.epsilon);
        self.archive.rebuild(&self.epsilon);
        self.last_archive_signature = self.archive.box_signature(&self.epsilon);
        info!(index, old, new = value, rationale, "epsilon adjusted by repair agent");
    }

    /// One staged parameter edit: clone, apply, re-evaluate, re-rank, then
    /// check the acceptance policy. Rejection leaves the population exactly
    /// as it was.
    fn try_parameter_edit(
        &mut self,
        id: uuid::Uuid,
        index: usize,
        value: f64,
        source: EditSource,
    ) -> Result<bool, EngineError> {
        let Some(pre) = self.population.find(id) else {
            warn!(individual = %id, "edit target no longer in population, skipping");
            return Ok(false);
        };
        let pre_rank = pre.rank.unwrap_or(usize::MAX);
        let pre_objectives = pre.objectives.clone();
        let pre_infeasible = self.population.infeasible_count();

        let mut staged = self.population.clone();
        let clipped = self.problem.clip(index, value);
        {
            // find() above guarantees presence; the staged clone has the
            // same members.
            let target = match staged.find_mut(id) {
                Some(t) => t,
                None => return Ok(false),
            };
            target.edit_param(index, clipped);
        }

        // Re-evaluate the edited individual only.
        let evaluation = {
            let target = match staged.find(id) {
                Some(t) => t,
                None => return Ok(false),
            };
            self.evaluations += 1;
            self.surrogate.evaluate(&target.params)?
        };
        let resolved = self.resolve_confidence(
            &staged
                .find(id)
                .map(|t| t.params.clone())
                .unwrap_or_default(),
            evaluation,
        )?;
        let mut objectives = resolved.objectives;
        self.problem.orient_objectives(&mut objectives);
        if let Some(target) = staged.find_mut(id) {
            target.set_evaluation(objectives, resolved.confidence, self.config.confidence_threshold);
        }
        assign_ranks(&mut staged.members, &self.epsilon);

        let post_infeasible = staged.infeasible_count();
        if post_infeasible > pre_infeasible {
            warn!(%source, individual = %id, "edit rejected: infeasible count increased");
            return Ok(false);
        }

        let accepted = match self.config.acceptance {
            AcceptancePolicy::RankNonWorsening => {
                let post_rank = staged
                    .find(id)
                    .and_then(|t| t.rank)
                    .unwrap_or(usize::MAX);
                if post_rank > pre_rank {
                    warn!(
                        %source,
                        individual = %id,
                        pre_rank,
                        post_rank,
                        "edit rejected: rank worsened"
                    );
                    false
                } else {
                    true
                }
            }
            AcceptancePolicy::ObjectiveNonWorsening => {
                let post_objectives = staged.find(id).and_then(|t| t.objectives.clone());
                match (pre_objectives, post_objectives) {
                    (Some(pre_obj), Some(post_obj)) => {
                        let worsened = pre_obj
                            .iter()
                            .zip(post_obj.iter())
                            .any(|(p, q)| q > p);
                        if worsened {
                            warn!(%source, individual = %id, "edit rejected: an objective worsened");
                        }
                        !worsened
                    }
                    // No baseline to compare against: accept on feasibility
                    // grounds alone.
                    _ => true,
                }
            }
        };

        if accepted {
            self.population = staged;
        }
        Ok(accepted)
    }

    // ----- persistence -----------------------------------------------------

    fn save_checkpoint(&self) -> Result<(), EngineError> {
        let Some(path) = &self.config.checkpoint_path else {
            return Ok(());
        };
        Checkpoint {
            generation: self.population.generation,
            population: self.population.clone(),
            archive: self.archive.clone(),
            epsilon: self.epsilon.clone(),
            rng: self.rng.clone(),
            evaluations_used: self.evaluations,
            front0_stagnant_for: self.front0_stagnant_for,
            archive_stagnant_for: self.archive_stagnant_for,
            saved_at: chrono::Utc::now(),
        }
        .save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_agents::ScriptedAgent;

    /// Two smooth bowls with different minima: a genuine trade-off.
    struct SphereSurrogate;

    impl Surrogate for SphereSurrogate {
        fn evaluate(&self, params: &[f64]) -> Result<Evaluation, SurrogateError> {
            let f1: f64 = params.iter().map(|x| (x - 0.25) * (x - 0.25)).sum();
            let f2: f64 = params.iter().map(|x| (x - 0.75) * (x - 0.75)).sum();
            Ok(Evaluation {
                objectives: vec![f1, f2],
                confidence: 1.0,
            })
        }

        fn objective_count(&self) -> usize {
            2
        }
    }

    /// Objectives are the parameters themselves; handy for hand-built fronts.
    struct IdentitySurrogate;

    impl Surrogate for IdentitySurrogate {
        fn evaluate(&self, params: &[f64]) -> Result<Evaluation, SurrogateError> {
            Ok(Evaluation {
                objectives: params.to_vec(),
                confidence: 1.0,
            })
        }

        fn objective_count(&self) -> usize {
            2
        }
    }

    struct NeverConfident;

    impl Surrogate for NeverConfident {
        fn evaluate(&self, params: &[f64]) -> Result<Evaluation, SurrogateError> {
            let f1: f64 = params.iter().sum();
            Ok(Evaluation {
                objectives: vec![f1, -f1],
                confidence: 0.0,
            })
        }

        fn objective_count(&self) -> usize {
            2
        }
    }

    struct BrokenSurrogate;

    impl Surrogate for BrokenSurrogate {
        fn evaluate(&self, params: &[f64]) -> Result<Evaluation, SurrogateError> {
            Err(SurrogateError::InputShape {
                got: params.len(),
                expected: 99,
            })
        }

        fn objective_count(&self) -> usize {
            2
        }
    }

    fn problem() -> ProblemDefinition {
        ProblemDefinition {
            name: "test".to_string(),
            bounds: vec![(0.0, 1.0), (0.0, 1.0)],
            objective_count: 2,
            epsilon: vec![0.01, 0.01],
            maximize: vec![],
            context: "unit test".to_string(),
        }
    }

    fn config() -> RunConfig {
        RunConfig {
            population_size: 8,
            max_generations: 5,
            seed: 7,
            workers: 2,
            checkpoint_path: None,
            archive_patience: 1_000,
            ..Default::default()
        }
    }

    /// Hand-plant a ranked population so edit tests are fully controlled.
    fn plant(controller: &mut OptimizationLoop, points: &[Vec<f64>]) {
        controller.population.members.clear();
        controller.population.target_size = points.len();
        for p in points {
            let mut ind = Individual::new(p.clone(), 0, &mut controller.rng);
            let eval = controller.surrogate.evaluate(p).unwrap();
            ind.set_evaluation(eval.objectives, eval.confidence, 0.0);
            controller.population.members.push(ind);
        }
        assign_ranks(&mut controller.population.members, &controller.epsilon);
    }

    #[tokio::test]
    async fn full_run_terminates_on_generation_budget() {
        let mut controller =
            OptimizationLoop::new(problem(), config(), Arc::new(SphereSurrogate)).unwrap();
        let report = controller.run().await;
        assert_eq!(report.reason, StopReason::GenerationBudget);
        assert_eq!(report.generations, 5);
        assert_eq!(report.population.len(), 8);
        assert!(!report.archive.is_empty());
        for ind in &report.population.members {
            assert!(ind.params.iter().all(|p| (0.0..=1.0).contains(p)));
            assert!(ind.rank.is_some());
        }
    }

    #[tokio::test]
    async fn all_low_confidence_is_not_fatal() {
        let cfg = RunConfig {
            max_generations: 3,
            low_confidence_policy: LowConfidencePolicy::Penalize { penalty: 100.0 },
            ..config()
        };
        let mut controller =
            OptimizationLoop::new(problem(), cfg, Arc::new(NeverConfident)).unwrap();
        let report = controller.run().await;
        assert_eq!(report.reason, StopReason::GenerationBudget);
        // Everything is unreliable, so everything carries the penalty and is
        // marked infeasible, but the loop keeps going.
        assert!(report.population.members.iter().all(|i| !i.feasible));
        assert!(report
            .population
            .members
            .iter()
            .all(|i| i.objectives.is_some()));
    }

    #[tokio::test]
    async fn structural_surrogate_failure_terminates_with_reason() {
        let mut controller =
            OptimizationLoop::new(problem(), config(), Arc::new(BrokenSurrogate)).unwrap();
        let report = controller.run().await;
        assert!(matches!(report.reason, StopReason::Failure(_)));
    }

    #[tokio::test]
    async fn evaluation_budget_stops_the_run() {
        let cfg = RunConfig {
            max_evaluations: Some(10),
            max_generations: 100,
            ..config()
        };
        let mut controller =
            OptimizationLoop::new(problem(), cfg, Arc::new(SphereSurrogate)).unwrap();
        let report = controller.run().await;
        assert_eq!(report.reason, StopReason::EvaluationBudget);
        assert!(report.evaluations >= 10);
    }

    #[tokio::test]
    async fn rejected_edit_leaves_population_untouched() {
        let mut controller =
            OptimizationLoop::new(problem(), config(), Arc::new(IdentitySurrogate)).unwrap();
        // Shared second coordinate makes this a strict chain on the first:
        // pushing the leader's first parameter past the others demotes it.
        plant(
            &mut controller,
            &[vec![0.1, 0.5], vec![0.5, 0.5], vec![0.9, 0.5]],
        );
        let best = controller.population.members[0].id;
        assert_eq!(controller.population.members[0].rank, Some(0));

        let before = serde_json::to_string(&controller.population).unwrap();
        let edits = vec![AgentEdit {
            target: EditTarget::Parameter {
                individual: best,
                index: 0,
            },
            value: 1.0,
            source: EditSource::Repair,
            rationale: "worsen on purpose".to_string(),
        }];
        controller.apply_edit_set(edits, EditSource::Repair).unwrap();

        let after = serde_json::to_string(&controller.population).unwrap();
        assert_eq!(before, after, "rejected edit must not change anything");
    }

    #[tokio::test]
    async fn improving_edit_is_accepted_and_reevaluated() {
        let mut controller =
            OptimizationLoop::new(problem(), config(), Arc::new(IdentitySurrogate)).unwrap();
        plant(
            &mut controller,
            &[vec![0.1, 0.1], vec![0.5, 0.5], vec![0.9, 0.9]],
        );
        let worst = controller.population.members[2].id;
        let edits = vec![AgentEdit {
            target: EditTarget::Parameter {
                individual: worst,
                index: 0,
            },
            value: 0.05,
            source: EditSource::Repair,
            rationale: String::new(),
        }];
        controller.apply_edit_set(edits, EditSource::Repair).unwrap();

        let edited = controller.population.find(worst).unwrap();
        assert_eq!(edited.params[0], 0.05);
        // Re-evaluated under the identity surrogate.
        assert_eq!(edited.objectives.as_ref().unwrap()[0], 0.05);
    }

    #[tokio::test]
    async fn diversity_set_that_shrinks_front0_reverts() {
        let mut controller =
            OptimizationLoop::new(problem(), config(), Arc::new(IdentitySurrogate)).unwrap();
        // Three mutually non-dominating points: front 0 has all of them.
        plant(
            &mut controller,
            &[vec![0.5, 0.5], vec![0.4, 0.6], vec![0.6, 0.4]],
        );
        assert_eq!(controller.population.front0_size(), 3);

        // Moving (0.5, 0.5) to (0.3, 0.5) keeps its own rank at 0 but now
        // dominates (0.4, 0.6): front 0 shrinks, so the set must revert.
        let target = controller.population.members[0].id;
        let before = serde_json::to_string(&controller.population).unwrap();
        let edits = vec![AgentEdit {
            target: EditTarget::Parameter {
                individual: target,
                index: 0,
            },
            value: 0.3,
            source: EditSource::Diversity,
            rationale: "collapse the front".to_string(),
        }];
        controller
            .apply_edit_set(edits, EditSource::Diversity)
            .unwrap();

        assert_eq!(controller.population.front0_size(), 3);
        let after = serde_json::to_string(&controller.population).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn out_of_range_edit_targets_are_discarded_not_fatal() {
        let mut controller =
            OptimizationLoop::new(problem(), config(), Arc::new(IdentitySurrogate)).unwrap();
        plant(&mut controller, &[vec![0.2, 0.8], vec![0.8, 0.2]]);
        let target = controller.population.members[0].id;
        let before = serde_json::to_string(&controller.population).unwrap();

        // Epsilon index beyond the objective count.
        let edits = vec![AgentEdit {
            target: EditTarget::Epsilon { index: 5 },
            value: 0.2,
            source: EditSource::Repair,
            rationale: String::new(),
        }];
        controller.apply_edit_set(edits, EditSource::Repair).unwrap();
        assert_eq!(controller.epsilon, vec![0.01, 0.01]);

        // Parameter index beyond the problem's dimensionality.
        let edits = vec![AgentEdit {
            target: EditTarget::Parameter {
                individual: target,
                index: 9,
            },
            value: 0.5,
            source: EditSource::Repair,
            rationale: String::new(),
        }];
        controller.apply_edit_set(edits, EditSource::Repair).unwrap();

        // Non-positive epsilon value.
        let edits = vec![AgentEdit {
            target: EditTarget::Epsilon { index: 0 },
            value: -0.1,
            source: EditSource::Repair,
            rationale: String::new(),
        }];
        controller.apply_edit_set(edits, EditSource::Repair).unwrap();
        assert_eq!(controller.epsilon, vec![0.01, 0.01]);

        let after = serde_json::to_string(&controller.population).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn one_bad_edit_discards_its_whole_set() {
        let mut controller =
            OptimizationLoop::new(problem(), config(), Arc::new(IdentitySurrogate)).unwrap();
        plant(
            &mut controller,
            &[vec![0.1, 0.1], vec![0.5, 0.5], vec![0.9, 0.9]],
        );
        let worst = controller.population.members[2].id;
        let before = serde_json::to_string(&controller.population).unwrap();

        // The first edit would be accepted on its own; the second is invalid.
        let edits = vec![
            AgentEdit {
                target: EditTarget::Parameter {
                    individual: worst,
                    index: 0,
                },
                value: 0.05,
                source: EditSource::Repair,
                rationale: String::new(),
            },
            AgentEdit {
                target: EditTarget::Parameter {
                    individual: worst,
                    index: 9,
                },
                value: 0.5,
                source: EditSource::Repair,
                rationale: String::new(),
            },
        ];
        controller.apply_edit_set(edits, EditSource::Repair).unwrap();

        let after = serde_json::to_string(&controller.population).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn repair_epsilon_edit_rebuilds_archive() {
        let mut controller =
            OptimizationLoop::new(problem(), config(), Arc::new(IdentitySurrogate)).unwrap();
        plant(
            &mut controller,
            &[vec![0.40, 0.60], vec![0.42, 0.58], vec![0.9, 0.1]],
        );
        controller.update_archive_and_stagnation();
        assert_eq!(controller.archive.len(), 3);

        let edits = vec![AgentEdit {
            target: EditTarget::Epsilon { index: 0 },
            value: 0.2,
            source: EditSource::Repair,
            rationale: "coarsen".to_string(),
        }];
        controller.apply_edit_set(edits, EditSource::Repair).unwrap();

        assert_eq!(controller.epsilon, vec![0.2, 0.01]);
        // (0.40, .) and (0.42, .) now share a box along objective 0 and one
        // representative must have been evicted.
        assert_eq!(controller.archive.len(), 2);
    }

    #[tokio::test]
    async fn scripted_agents_flow_through_a_full_run() {
        let cfg = RunConfig {
            max_generations: 3,
            triggers: crate::stats::AgentTriggers {
                // Fire every generation.
                repair_feasibility_threshold: 2.0,
                repair_stagnation_patience: 0,
                collapse_threshold: 0.0,
                centroid_radius: 10.0,
                flat_front_threshold: 0.0,
            },
            ..config()
        };
        let mut controller =
            OptimizationLoop::new(problem(), cfg, Arc::new(SphereSurrogate)).unwrap()
                .with_repair_agent(Arc::new(ScriptedAgent::silent("repair")))
                .with_diversity_agent(Arc::new(ScriptedAgent::silent("diversity")));
        let report = controller.run().await;
        assert_eq!(report.reason, StopReason::GenerationBudget);
    }

    #[tokio::test]
    async fn agent_timeout_degrades_to_no_edits() {
        struct SlowAgent;

        #[async_trait::async_trait]
        impl InterventionAgent for SlowAgent {
            fn name(&self) -> &str {
                "slow"
            }

            async fn propose(
                &self,
                _stats: &StatsSnapshot,
                _context: &str,
            ) -> Result<Vec<AgentEdit>, crucible_agents::AgentError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(vec![])
            }
        }

        let cfg = RunConfig {
            agent_timeout: Duration::from_millis(20),
            agent_retries: 0,
            ..config()
        };
        let mut controller =
            OptimizationLoop::new(problem(), cfg, Arc::new(SphereSurrogate)).unwrap();
        plant(&mut controller, &[vec![0.2, 0.8], vec![0.8, 0.2]]);
        let stats = build_snapshot(
            &controller.population,
            &controller.problem,
            0,
            &controller.epsilon,
            0.05,
            4,
        );
        let edits = controller.invoke_agent(&SlowAgent, &stats).await;
        assert!(edits.is_empty());
    }

    #[tokio::test]
    async fn resume_replays_identical_generations() {
        let dir = std::env::temp_dir().join(format!("crucible-resume-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let full_path = dir.join("full.json");
        let half_path = dir.join("half.json");

        // Uninterrupted reference run.
        let cfg_full = RunConfig {
            max_generations: 6,
            checkpoint_path: Some(full_path),
            checkpoint_interval: 0,
            ..config()
        };
        let mut reference =
            OptimizationLoop::new(problem(), cfg_full, Arc::new(SphereSurrogate)).unwrap();
        let full_report = reference.run().await;

        // Same seed, stopped halfway, checkpointed, resumed.
        let cfg_half = RunConfig {
            max_generations: 3,
            checkpoint_path: Some(half_path.clone()),
            checkpoint_interval: 0,
            ..config()
        };
        let mut first_half =
            OptimizationLoop::new(problem(), cfg_half.clone(), Arc::new(SphereSurrogate)).unwrap();
        first_half.run().await;

        let checkpoint = Checkpoint::load(&half_path).unwrap();
        let cfg_rest = RunConfig {
            max_generations: 6,
            checkpoint_path: None,
            ..cfg_half
        };
        let mut resumed = OptimizationLoop::resume(
            problem(),
            cfg_rest,
            Arc::new(SphereSurrogate),
            checkpoint,
        )
        .unwrap();
        let resumed_report = resumed.run().await;

        assert_eq!(
            serde_json::to_string(&full_report.population).unwrap(),
            serde_json::to_string(&resumed_report.population).unwrap()
        );
        assert_eq!(
            full_report.archive.box_signature(&[0.01, 0.01]),
            resumed_report.archive.box_signature(&[0.01, 0.01])
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
