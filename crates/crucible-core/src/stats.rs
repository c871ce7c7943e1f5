//! Per-generation population statistics.
//!
//! Builds the read-only [`StatsSnapshot`] the intervention agents consume and
//! decides when each agent fires. The snapshot mirrors what the agents are
//! asked to reason about: per-parameter spread, parameter-objective
//! correlation, and how concentrated the population is around its centroid.

use crucible_agents::{IndividualSummary, StatsSnapshot};

use crate::individual::Population;
use crate::problem::ProblemDefinition;

/// Crowding below this is treated as zero when measuring front flatness.
const CROWDING_EPS: f64 = 1e-9;

/// Thresholds governing when the agents are consulted.
#[derive(Clone, Copy, Debug)]
pub struct AgentTriggers {
    /// Repair fires when the feasible fraction drops below this.
    pub repair_feasibility_threshold: f64,
    /// Repair fires when front-0 size is unchanged this many generations.
    pub repair_stagnation_patience: u64,
    /// Diversity fires when this fraction of the population sits within
    /// `centroid_radius` of the centroid (normalized coordinates).
    pub collapse_threshold: f64,
    pub centroid_radius: f64,
    /// Diversity fires when this fraction of interior front-0 members has
    /// effectively zero crowding distance.
    pub flat_front_threshold: f64,
}

impl Default for AgentTriggers {
    fn default() -> Self {
        Self {
            repair_feasibility_threshold: 0.5,
            repair_stagnation_patience: 5,
            collapse_threshold: 0.7,
            centroid_radius: 0.05,
            flat_front_threshold: 0.8,
        }
    }
}

fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        cov += (x - mx) * (y - my);
        vx += (x - mx) * (x - mx);
        vy += (y - my) * (y - my);
    }
    if vx <= 0.0 || vy <= 0.0 {
        return 0.0;
    }
    cov / (vx.sqrt() * vy.sqrt())
}

/// Leading principal components of a parameter cloud via power iteration with
/// deflation on the covariance matrix. Returns `(loadings, explained_variance)`
/// with loadings `[component][dimension]`, strongest component first, and the
/// explained variance as a fraction of total variance. Deterministic: the
/// iteration starts from a fixed vector.
fn principal_components(rows: &[Vec<f64>], components: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
    let n = rows.len();
    if n < 2 || rows[0].is_empty() {
        return (Vec::new(), Vec::new());
    }
    let dim = rows[0].len();

    let mut mean = vec![0.0; dim];
    for row in rows {
        for (d, v) in row.iter().enumerate() {
            mean[d] += v;
        }
    }
    for v in mean.iter_mut() {
        *v /= n as f64;
    }

    let mut cov = vec![vec![0.0; dim]; dim];
    for row in rows {
        for i in 0..dim {
            for j in 0..dim {
                cov[i][j] += (row[i] - mean[i]) * (row[j] - mean[j]);
            }
        }
    }
    for r in cov.iter_mut() {
        for v in r.iter_mut() {
            *v /= (n - 1) as f64;
        }
    }

    let total_variance: f64 = (0..dim).map(|i| cov[i][i]).sum();
    if total_variance <= 0.0 {
        return (Vec::new(), Vec::new());
    }

    let mut loadings = Vec::new();
    let mut explained = Vec::new();
    for _ in 0..components.min(dim) {
        // Fixed, mildly asymmetric start so no eigenvector is orthogonal to it
        // by construction.
        let mut v: Vec<f64> = (0..dim).map(|d| 1.0 + 0.1 * d as f64).collect();
        let mut eigenvalue = 0.0;
        for _ in 0..100 {
            let mut next = vec![0.0; dim];
            for i in 0..dim {
                for j in 0..dim {
                    next[i] += cov[i][j] * v[j];
                }
            }
            let norm = next.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm <= f64::EPSILON {
                eigenvalue = 0.0;
                break;
            }
            for x in next.iter_mut() {
                *x /= norm;
            }
            eigenvalue = norm;
            v = next;
        }
        if eigenvalue <= f64::EPSILON * total_variance {
            break;
        }
        // Deflate before the next component.
        for i in 0..dim {
            for j in 0..dim {
                cov[i][j] -= eigenvalue * v[i] * v[j];
            }
        }
        loadings.push(v);
        explained.push(eigenvalue / total_variance);
    }
    (loadings, explained)
}

/// Build the snapshot for the current, fully evaluated and sorted population.
pub fn build_snapshot(
    population: &Population,
    problem: &ProblemDefinition,
    front0_stagnant_for: u64,
    epsilon: &[f64],
    centroid_radius: f64,
    edit_budget: usize,
) -> StatsSnapshot {
    let members = &population.members;
    let n = members.len().max(1) as f64;
    let dim = problem.dimension();
    let m = problem.objective_count;

    // Rank histogram.
    let max_rank = members.iter().filter_map(|i| i.rank).max().unwrap_or(0);
    let mut rank_histogram = vec![0usize; max_rank + 1];
    for ind in members {
        if let Some(r) = ind.rank {
            rank_histogram[r] += 1;
        }
    }

    let feasible = members.iter().filter(|i| i.feasible).count();
    let feasibility_ratio = feasible as f64 / n;

    // Per-parameter mean / std.
    let mut param_mean = vec![0.0; dim];
    let mut param_std = vec![0.0; dim];
    for ind in members {
        for (d, v) in ind.params.iter().enumerate() {
            param_mean[d] += v;
        }
    }
    for v in param_mean.iter_mut() {
        *v /= n;
    }
    for ind in members {
        for (d, v) in ind.params.iter().enumerate() {
            param_std[d] += (v - param_mean[d]) * (v - param_mean[d]);
        }
    }
    for v in param_std.iter_mut() {
        *v = (*v / n).sqrt();
    }

    // Objective spread over evaluated members.
    let mut objective_min = vec![f64::INFINITY; m];
    let mut objective_max = vec![f64::NEG_INFINITY; m];
    for ind in members {
        if let Some(obj) = &ind.objectives {
            for (j, o) in obj.iter().enumerate() {
                if o.is_finite() {
                    objective_min[j] = objective_min[j].min(*o);
                    objective_max[j] = objective_max[j].max(*o);
                }
            }
        }
    }
    for j in 0..m {
        if !objective_min[j].is_finite() {
            objective_min[j] = 0.0;
            objective_max[j] = 0.0;
        }
    }

    // Parameter-objective Pearson correlation over evaluated members.
    let evaluated: Vec<_> = members.iter().filter(|i| i.objectives.is_some()).collect();
    let mut param_objective_corr = vec![vec![0.0; m]; dim];
    for d in 0..dim {
        let xs: Vec<f64> = evaluated.iter().map(|i| i.params[d]).collect();
        for j in 0..m {
            let ys: Vec<f64> = evaluated
                .iter()
                .map(|i| i.objectives.as_ref().map(|o| o[j]).unwrap_or(0.0))
                .collect();
            param_objective_corr[d][j] = pearson(&xs, &ys);
        }
    }

    // Parameter-parameter Pearson correlation and the leading principal
    // components of the parameter cloud.
    let mut param_param_corr = vec![vec![0.0; dim]; dim];
    for a in 0..dim {
        param_param_corr[a][a] = 1.0;
        let xs: Vec<f64> = members.iter().map(|i| i.params[a]).collect();
        for b in (a + 1)..dim {
            let ys: Vec<f64> = members.iter().map(|i| i.params[b]).collect();
            let r = pearson(&xs, &ys);
            param_param_corr[a][b] = r;
            param_param_corr[b][a] = r;
        }
    }
    let param_rows: Vec<Vec<f64>> = members.iter().map(|i| i.params.clone()).collect();
    let (pca_loadings, pca_explained_variance) = principal_components(&param_rows, 3);

    // Centroid concentration in bounds-normalized coordinates.
    let normalize = |ind_params: &[f64]| -> Vec<f64> {
        ind_params
            .iter()
            .zip(problem.bounds.iter())
            .map(|(v, &(lo, hi))| (v - lo) / (hi - lo))
            .collect()
    };
    let mut centroid = vec![0.0; dim];
    for ind in members {
        for (d, v) in normalize(&ind.params).into_iter().enumerate() {
            centroid[d] += v;
        }
    }
    for v in centroid.iter_mut() {
        *v /= n;
    }
    let within = members
        .iter()
        .filter(|ind| {
            let p = normalize(&ind.params);
            let sq: f64 = p
                .iter()
                .zip(centroid.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            (sq / dim as f64).sqrt() <= centroid_radius
        })
        .count();
    let centroid_concentration = within as f64 / n;

    // Flatness of the first front's interior.
    let front0: Vec<_> = members.iter().filter(|i| i.rank == Some(0)).collect();
    let interior: Vec<_> = front0.iter().filter(|i| i.crowding.is_finite()).collect();
    let front0_crowding_zero_ratio = if interior.is_empty() {
        0.0
    } else {
        interior.iter().filter(|i| i.crowding < CROWDING_EPS).count() as f64
            / interior.len() as f64
    };

    let individuals = members
        .iter()
        .map(|i| IndividualSummary {
            id: i.id,
            params: i.params.clone(),
            objectives: i.objectives.clone().unwrap_or_default(),
            rank: i.rank.unwrap_or(usize::MAX),
            feasible: i.feasible,
        })
        .collect();

    StatsSnapshot {
        generation: population.generation,
        parameter_count: dim,
        objective_count: m,
        bounds: problem.bounds.clone(),
        epsilon: epsilon.to_vec(),
        rank_histogram,
        feasibility_ratio,
        front0_size: front0.len(),
        front0_stagnant_for,
        param_mean,
        param_std,
        objective_min,
        objective_max,
        param_objective_corr,
        param_param_corr,
        pca_loadings,
        pca_explained_variance,
        centroid_concentration,
        front0_crowding_zero_ratio,
        edit_budget,
        individuals,
    }
}

pub fn repair_triggered(stats: &StatsSnapshot, triggers: &AgentTriggers) -> bool {
    stats.feasibility_ratio < triggers.repair_feasibility_threshold
        || stats.front0_stagnant_for >= triggers.repair_stagnation_patience
}

pub fn diversity_triggered(stats: &StatsSnapshot, triggers: &AgentTriggers) -> bool {
    stats.centroid_concentration >= triggers.collapse_threshold
        || stats.front0_crowding_zero_ratio >= triggers.flat_front_threshold
}
