//! Shared prompt-assembly helpers for both agent variants.
//!
//! The model sees the same statistics tables regardless of variant; only the
//! system message and guidance differ.

use crate::protocol::StatsSnapshot;
use std::fmt::Write;

pub(crate) fn fmt_vec(values: &[f64]) -> String {
    let cells: Vec<String> = values.iter().map(|v| format!("{v:.4}")).collect();
    format!("[{}]", cells.join(", "))
}

pub(crate) fn fmt_matrix(rows: &[Vec<f64>]) -> String {
    rows.iter()
        .map(|r| fmt_vec(r))
        .collect::<Vec<_>>()
        .join("\n")
}

fn fmt_bounds(bounds: &[(f64, f64)]) -> String {
    let cells: Vec<String> = bounds
        .iter()
        .map(|(lo, hi)| format!("[{lo:.4}, {hi:.4}]"))
        .collect();
    cells.join(", ")
}

/// The statistics block common to both agents: current pool, spreads,
/// correlations, epsilon, bounds.
pub(crate) fn stats_block(stats: &StatsSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "==== Indexing & Semantics ====");
    let _ = writeln!(
        out,
        "- Parameters: 0..{} per candidate. Objectives: 0..{} (minimized).",
        stats.parameter_count - 1,
        stats.objective_count - 1
    );
    let _ = writeln!(out, "\n==== Current Pool (id | rank | params | objectives) ====");
    for ind in &stats.individuals {
        let _ = writeln!(
            out,
            "{} | r{}{} | {} | {}",
            ind.id,
            ind.rank,
            if ind.feasible { "" } else { " INFEASIBLE" },
            fmt_vec(&ind.params),
            fmt_vec(&ind.objectives),
        );
    }
    let _ = writeln!(out, "\n==== Per-Parameter Mean ====\n{}", fmt_vec(&stats.param_mean));
    let _ = writeln!(out, "\n==== Per-Parameter Std (diversity score) ====\n{}", fmt_vec(&stats.param_std));
    let _ = writeln!(
        out,
        "\n==== Objective Spread (min / max) ====\n{}\n{}",
        fmt_vec(&stats.objective_min),
        fmt_vec(&stats.objective_max)
    );
    let _ = writeln!(
        out,
        "\n==== Parameter-Parameter Correlation ====\n{}",
        fmt_matrix(&stats.param_param_corr)
    );
    let _ = writeln!(
        out,
        "\n==== Parameter-Objective Correlation (rows = params) ====\n{}",
        fmt_matrix(&stats.param_objective_corr)
    );
    let _ = writeln!(
        out,
        "\n==== PCA Loadings (rows = components) + Explained Variance ====\n{}\n{}",
        fmt_matrix(&stats.pca_loadings),
        fmt_vec(&stats.pca_explained_variance)
    );
    let _ = writeln!(out, "\n==== Epsilon Vector ====\n{}", fmt_vec(&stats.epsilon));
    let _ = writeln!(out, "\n==== Bounds per Parameter ====\n{}", fmt_bounds(&stats.bounds));
    let _ = writeln!(
        out,
        "\nFeasibility ratio: {:.3}. Front-0 size: {} (stagnant for {} generations).",
        stats.feasibility_ratio, stats.front0_size, stats.front0_stagnant_for
    );
    let _ = writeln!(
        out,
        "Centroid concentration: {:.3}. Front-0 zero-crowding ratio: {:.3}.",
        stats.centroid_concentration, stats.front0_crowding_zero_ratio
    );
    out
}

/// Output contract appended to every system message. The parser takes the
/// first JSON array in the reply, so the first line must be the array itself.
pub(crate) fn output_contract(stats: &StatsSnapshot) -> String {
    format!(
        "Output format (STRICT):\n\
         - Reply with ONLY a JSON array on the first line, no prose before it.\n\
         - Each element: {{\"individual\": \"<uuid from the pool>\" or null, \
         \"index\": <int>, \"value\": <float>, \"rationale\": \"<short text>\"}}.\n\
         - \"individual\": null targets the epsilon vector at \"index\" instead of a candidate.\n\
         - At most {} edits. All values must respect the stated bounds.",
        stats.edit_budget
    )
}
