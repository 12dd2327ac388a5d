use crate::router::AgentRouter;
use std::collections::HashSet;
use std::future::Future;
use taskfabric_core::{AgentKind, FabricError, FabricResult, RoutingDecision};
use tracing::{info, warn};
use uuid::Uuid;

impl AgentRouter {
    /// Routes and dispatches with automatic retry on transient failures.
    ///
    /// `attempt` performs the actual dispatch for a selected agent. On a
    /// transient failure the selection is re-scored and re-attempted up to
    /// `max_retries` additional times, with `retried = true` on every
    /// subsequent audit row. Permanent errors (validation, capability) fail
    /// fast: a capability failure on the first selection makes exactly one
    /// attempt.
    ///
    /// Agents that already failed within this retry sequence are excluded
    /// from re-selection; if the exclusion empties the candidate pool the
    /// exclusion set is dropped so a busy pool can still be retried.
    pub async fn route_with_retry<F, Fut>(
        &self,
        task_id: Uuid,
        work_type: &str,
        agent_type: AgentKind,
        max_retries: u32,
        mut attempt: F,
    ) -> FabricResult<RoutingDecision>
    where
        F: FnMut(RoutingDecision) -> Fut,
        Fut: Future<Output = FabricResult<()>>,
    {
        let mut excluded: HashSet<String> = HashSet::new();

        for try_index in 0..=max_retries {
            let retried = try_index > 0;
            let selection = match self
                .route_filtered(task_id, work_type, agent_type, &excluded, retried)
                .await
            {
                Ok(decision) => Ok(decision),
                Err(FabricError::Capability(_)) if !excluded.is_empty() => {
                    // Every remaining candidate already failed once; allow
                    // reselection rather than reporting a dead pool.
                    excluded.clear();
                    self.route_filtered(task_id, work_type, agent_type, &excluded, retried)
                        .await
                }
                Err(e) => Err(e),
            };
            let decision = selection?;

            match attempt(decision.clone()).await {
                Ok(()) => {
                    if retried {
                        info!(
                            task_id = %task_id,
                            agent_id = %decision.selected_agent,
                            try_index,
                            "dispatch succeeded after retry"
                        );
                    }
                    return Ok(decision);
                }
                Err(e) if e.is_permanent() => return Err(e),
                Err(e) => {
                    warn!(
                        task_id = %task_id,
                        agent_id = %decision.selected_agent,
                        try_index,
                        error = %e,
                        "transient dispatch failure"
                    );
                    excluded.insert(decision.selected_agent);
                }
            }
        }

        Err(FabricError::TransientDispatch(format!(
            "dispatch of task {task_id} failed after {} attempts",
            max_retries + 1
        )))
    }
}
