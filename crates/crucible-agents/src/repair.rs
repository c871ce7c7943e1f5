//! Repair agent: invoked when feasibility degrades or the first front stops
//! moving. May nudge individual parameters or loosen/tighten the epsilon
//! vector; everything it proposes still has to pass the loop's acceptance
//! check after re-evaluation.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::client::ChatClient;
use crate::prompt::{output_contract, stats_block};
use crate::protocol::{
    parse_edit_response, AgentEdit, AgentError, EditSource, InterventionAgent, StatsSnapshot,
};

const SYSTEM_PREAMBLE: &str = "You are a repair agent for a multi-objective evolutionary \
optimizer running on a surrogate of an expensive physical model.\n\n\
Your task:\n\
- Fix infeasible or stagnating candidates by editing individual parameters.\n\
- If the epsilon granularity itself looks wrong for the observed objective spread \
(front frozen, boxes too coarse or too fine), propose an epsilon adjustment instead.\n\
- Prefer small, targeted moves over wholesale rewrites.\n\
- Use the parameter-objective correlations to pick which parameter to move and in \
which direction.";

pub struct RepairAgent {
    client: ChatClient,
    max_retries: usize,
}

impl RepairAgent {
    pub fn new(client: ChatClient) -> Self {
        Self {
            client,
            max_retries: 3,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    fn system_message(&self, stats: &StatsSnapshot) -> String {
        format!("{SYSTEM_PREAMBLE}\n\n{}", output_contract(stats))
    }

    fn user_message(&self, stats: &StatsSnapshot, context: &str) -> String {
        let mut msg = String::new();
        if !context.is_empty() {
            msg.push_str("==== Problem Context ====\n");
            msg.push_str(context);
            msg.push_str("\n\n");
        }
        msg.push_str(&stats_block(stats));
        msg.push_str(
            "\nInstructions:\n\
             - Target infeasible candidates and rank-0 stagnation first.\n\
             - Keep every value inside its parameter bounds.\n\
             - Epsilon edits must stay positive and should move by modest factors.\n",
        );
        msg
    }
}

#[async_trait]
impl InterventionAgent for RepairAgent {
    fn name(&self) -> &str {
        "repair"
    }

    async fn propose(
        &self,
        stats: &StatsSnapshot,
        context: &str,
    ) -> Result<Vec<AgentEdit>, AgentError> {
        let system = self.system_message(stats);
        let user = self.user_message(stats, context);

        // Parse failures are retried against a fresh completion; transport
        // errors bubble up so the caller's backoff handles them.
        let mut last_err = None;
        for attempt in 1..=self.max_retries {
            let raw = self.client.chat(&system, &user).await?;
            match parse_edit_response(&raw, stats, EditSource::Repair) {
                Ok(edits) => {
                    debug!(attempt, count = edits.len(), "repair agent proposed edits");
                    return Ok(edits);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "repair agent reply unparseable");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| AgentError::Malformed("no reply attempts made".to_string())))
    }
}
