use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crucible_agents::{ChatClient, DiversityAgent, LlmConfig, RepairAgent};
use crucible_core::{
    Checkpoint, OptimizationLoop, ProblemDefinition, RbfSurrogate, RunConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "crucible=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Crucible starting up...");

    // Load configuration
    dotenvy::dotenv().ok();
    let config = RunConfig::from_env()?;

    let problem_path = std::env::var("CRUCIBLE_PROBLEM")
        .context("CRUCIBLE_PROBLEM must point at a problem definition file")?;
    let problem = ProblemDefinition::load(&problem_path)
        .with_context(|| format!("loading problem from {problem_path}"))?;
    info!("Problem loaded: {}", problem.name);
    info!("  Parameters: {}", problem.bounds.len());
    info!("  Objectives: {}", problem.objective_count);

    let surrogate_path = std::env::var("CRUCIBLE_SURROGATE")
        .context("CRUCIBLE_SURROGATE must point at a surrogate artifact")?;
    let surrogate = RbfSurrogate::load(&surrogate_path)
        .with_context(|| format!("loading surrogate from {surrogate_path}"))?;
    info!("Surrogate loaded from {surrogate_path}");

    // Pick up an existing checkpoint if one is present.
    let checkpoint = match &config.checkpoint_path {
        Some(path) if path.exists() => {
            info!("Found checkpoint at {}", path.display());
            Some(Checkpoint::load(path)?)
        }
        _ => None,
    };

    let mut optimizer = match checkpoint {
        Some(checkpoint) => OptimizationLoop::resume(
            problem,
            config.clone(),
            Arc::new(surrogate),
            checkpoint,
        )?,
        None => OptimizationLoop::new(problem, config.clone(), Arc::new(surrogate))?,
    };

    // Agents are optional: no endpoint means a pure evolutionary run.
    if std::env::var("CRUCIBLE_LLM_URL").is_ok() {
        let llm = LlmConfig::from_env()?;
        info!("LLM endpoint: {} ({})", llm.api_url, llm.model);
        optimizer = optimizer
            .with_repair_agent(Arc::new(RepairAgent::new(ChatClient::new(llm.clone())?)))
            .with_diversity_agent(Arc::new(DiversityAgent::new(ChatClient::new(llm)?)));
    } else {
        info!("No CRUCIBLE_LLM_URL set, running without intervention agents");
    }

    let cancel = optimizer.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, finishing the current generation...");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let report = optimizer.run().await;

    info!("Run finished: {}", report.reason);
    info!("  Generations: {}", report.generations);
    info!("  Evaluations: {}", report.evaluations);
    info!("  Archive size: {}", report.archive.len());
    for member in &report.archive.members {
        if let Some(objectives) = &member.objectives {
            info!(
                "  {} -> {:?}",
                member
                    .params
                    .iter()
                    .map(|p| format!("{p:.4}"))
                    .collect::<Vec<_>>()
                    .join(", "),
                objectives
            );
        }
    }
    Ok(())
}
