//! The dispatch orchestrator: submit path, result ingestion, and the
//! notification seam.

use crate::capacity::{CapacityGate, PausedWork};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use taskfabric_bus::{MessageBus, REPLY_QUEUE, WORK_QUEUE};
use taskfabric_core::{
    AgentKind, DispatchConfig, Envelope, FabricError, FabricResult, IdempotencyCache, MessageType,
    PauseQueueEntry, PauseReason, RoutingDecision, TaskRecord, TaskState, WorkOutcome, WorkRequest,
    WorkResult, PRIORITY_MAX, PRIORITY_MIN,
};
use taskfabric_router::AgentRouter;
use taskfabric_store::DispatchStore;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where a submitted task ended up.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Routed and published to the work queue.
    Dispatched(RoutingDecision),
    /// Parked on the pause queue until capacity recovers.
    Paused {
        /// Id of the persisted pause entry.
        entry_id: Uuid,
    },
}

/// What one result poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOutcome {
    /// The reply queue was empty.
    Idle,
    /// The message failed validation and was dead-lettered.
    Rejected,
    /// A redelivered result was discarded.
    Duplicate,
    /// The result was applied to the task and performance records.
    Applied,
}

/// Receives terminal task notifications after a result is applied.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Called once per applied result.
    async fn work_finished(&self, task_id: Uuid, state: &TaskState, result: &WorkResult);
}

/// Notification sink that logs through `tracing`.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn work_finished(&self, task_id: Uuid, state: &TaskState, result: &WorkResult) {
        info!(
            task_id = %task_id,
            state = ?state,
            duration_ms = result.duration_ms,
            "work finished"
        );
    }
}

/// Coordinates the full dispatch path: capacity gate, routing with retry,
/// publication, pause/resume, and result ingestion.
///
/// One instance per orchestrator process; all shared state lives in the
/// store and on the bus, so multiple instances coordinate without any
/// in-process sharing.
pub struct Dispatcher {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn DispatchStore>,
    router: AgentRouter,
    gate: CapacityGate,
    results_cache: IdempotencyCache<()>,
    notifier: Arc<dyn NotificationSink>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Creates a dispatcher wired to the given bus, store, and sink.
    pub fn new(
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn DispatchStore>,
        notifier: Arc<dyn NotificationSink>,
        config: DispatchConfig,
    ) -> Self {
        let router = AgentRouter::new(store.clone(), config.context_lookback());
        let gate = CapacityGate::new(store.clone(), &config);
        let results_cache = IdempotencyCache::new(config.cache_max_entries, config.cache_ttl());
        Self {
            bus,
            store,
            router,
            gate,
            results_cache,
            notifier,
            config,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Accepts one task: records it, consults the capacity gate, and either
    /// parks it on the pause queue or routes and publishes it.
    ///
    /// Routing failures leave a distinguishable task state behind:
    /// `pool_unavailable` on a capability failure, `retries_exhausted` once
    /// the retry limit is hit.
    pub async fn submit(
        &self,
        work_type: &str,
        agent_type: AgentKind,
        parameters: serde_json::Value,
        priority: u8,
    ) -> FabricResult<SubmitOutcome> {
        let task_id = Uuid::new_v4();
        self.store
            .upsert_task(TaskRecord::pending(task_id, work_type))
            .await?;

        if self.gate.should_pause(agent_type).await {
            let plan = PausedWork {
                work_type: work_type.to_string(),
                agent_type,
                parameters,
            };
            let mut entry = PauseQueueEntry::new(
                task_id,
                serde_json::to_value(&plan)?,
                PauseReason::InsufficientCapacity,
            );
            entry.priority = priority.clamp(PRIORITY_MIN, PRIORITY_MAX);
            let entry_id = entry.id;
            if self.gate.pause_work(vec![entry]).await == 0 {
                return Err(FabricError::Persistence(
                    "failed to persist pause entry".to_string(),
                ));
            }
            info!(task_id = %task_id, work_type, "task deferred until capacity recovers");
            return Ok(SubmitOutcome::Paused { entry_id });
        }

        match self
            .dispatch_task(task_id, work_type, agent_type, parameters, priority)
            .await
        {
            Ok(decision) => Ok(SubmitOutcome::Dispatched(decision)),
            Err(e) => {
                let state = match &e {
                    FabricError::Capability(_) => TaskState::PoolUnavailable,
                    FabricError::TransientDispatch(_) => TaskState::RetriesExhausted,
                    other => TaskState::Failed {
                        reason: other.to_string(),
                    },
                };
                if let Err(persist) = self.store.set_task_state(task_id, state).await {
                    warn!(task_id = %task_id, error = %persist, "failed to record terminal task state");
                }
                Err(e)
            }
        }
    }

    /// Routes with retry and publishes the work request. The envelope gets
    /// fresh correlation ids; the selected agent rides in the extensions so
    /// pool members can filter deliveries.
    async fn dispatch_task(
        &self,
        task_id: Uuid,
        work_type: &str,
        agent_type: AgentKind,
        parameters: serde_json::Value,
        priority: u8,
    ) -> FabricResult<RoutingDecision> {
        let bus = self.bus.clone();
        let work_type_owned = work_type.to_string();
        let decision = self
            .router
            .route_with_retry(
                task_id,
                work_type,
                agent_type,
                self.config.max_retries,
                move |selected| {
                    let bus = bus.clone();
                    let work_type = work_type_owned.clone();
                    let parameters = parameters.clone();
                    async move {
                        let request = WorkRequest::new(task_id, work_type, parameters);
                        let mut envelope = Envelope::new(
                            AgentKind::Orchestrator,
                            agent_type,
                            MessageType::WorkRequest,
                            priority,
                            serde_json::to_value(&request)?,
                        );
                        envelope.extensions.insert(
                            "selected_agent".to_string(),
                            serde_json::Value::String(selected.selected_agent.clone()),
                        );
                        bus.publish(WORK_QUEUE, envelope).await
                    }
                },
            )
            .await?;
        self.store
            .set_task_state(task_id, TaskState::Dispatched)
            .await?;
        info!(
            task_id = %task_id,
            agent_id = %decision.selected_agent,
            total_score = decision.total_score,
            "work dispatched"
        );
        Ok(decision)
    }

    /// One resume cycle: re-dispatches every pending pause entry whose pool
    /// recovered, marking each entry resumed. Per-entry failures are logged
    /// and retried on the next cycle.
    pub async fn run_resume_cycle(&self) -> FabricResult<usize> {
        let entries = self.store.pending_pause_entries().await?;
        let mut resumed = 0;
        for entry in entries {
            match self.resume_entry(&entry).await {
                Ok(true) => resumed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        entry_id = %entry.id,
                        task_id = %entry.task_id,
                        error = %e,
                        "skipping pause entry this cycle"
                    );
                }
            }
        }
        Ok(resumed)
    }

    async fn resume_entry(&self, entry: &PauseQueueEntry) -> FabricResult<bool> {
        let plan: PausedWork = serde_json::from_value(entry.work_plan.clone())?;
        if self.gate.should_pause(plan.agent_type).await {
            return Ok(false);
        }
        self.dispatch_task(
            entry.task_id,
            &plan.work_type,
            plan.agent_type,
            plan.parameters.clone(),
            entry.priority,
        )
        .await?;
        self.store.mark_entry_resumed(entry.id, Utc::now()).await?;
        info!(task_id = %entry.task_id, entry_id = %entry.id, "paused work resumed");
        Ok(true)
    }

    /// Processes at most one message from the reply queue: validate (nack
    /// without requeue on failure), ack, dedupe by `request_id`, then apply
    /// the result to the task row and performance history and notify the
    /// sink.
    pub async fn poll_results_once(&self) -> FabricResult<ResultOutcome> {
        let Some(delivery) = self.bus.consume(REPLY_QUEUE).await? else {
            return Ok(ResultOutcome::Idle);
        };
        let envelope = delivery.envelope;

        let decoded = envelope
            .validate(MessageType::WorkResult)
            .and_then(|()| envelope.decode_payload::<WorkResult>())
            .and_then(|result| result.validate().map(|()| result));
        let result = match decoded {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    message_id = %envelope.message_id,
                    error = %e,
                    "rejecting invalid work result"
                );
                self.bus.nack(delivery.tag, false).await?;
                return Ok(ResultOutcome::Rejected);
            }
        };

        // Acked before the state update is applied; a crash between the two
        // drops this result and leaves the task dispatched.
        self.bus.ack(delivery.tag).await?;

        if self.results_cache.get(envelope.request_id).is_some() {
            debug!(request_id = %envelope.request_id, "duplicate work result discarded");
            return Ok(ResultOutcome::Duplicate);
        }

        let state = match result.status {
            WorkOutcome::Completed => TaskState::Completed,
            WorkOutcome::Failed => TaskState::Failed {
                reason: result.error.clone().unwrap_or_default(),
            },
            WorkOutcome::Cancelled => TaskState::Failed {
                reason: "cancelled before completion".to_string(),
            },
        };

        match self.store.get_task(result.task_id).await? {
            Some(mut task) => {
                task.state = state.clone();
                task.resources_used = Some(result.resources_used.clone());
                task.updated_at = Utc::now();
                self.store.upsert_task(task).await?;
            }
            None => warn!(task_id = %result.task_id, "result for unknown task"),
        }

        match self.latest_decision(result.task_id).await? {
            Some(decision) => {
                self.store
                    .record_outcome(
                        &decision.selected_agent,
                        &decision.work_type,
                        result.is_success(),
                        result.duration_ms,
                    )
                    .await?;
            }
            None => {
                warn!(task_id = %result.task_id, "no routing decision for result, skipping history");
            }
        }

        self.results_cache.set(envelope.request_id, ());
        self.notifier
            .work_finished(result.task_id, &state, &result)
            .await;
        Ok(ResultOutcome::Applied)
    }

    /// The most recent routing decision for a task. Audit rows older than a
    /// day cannot belong to an in-flight result.
    async fn latest_decision(&self, task_id: Uuid) -> FabricResult<Option<RoutingDecision>> {
        let since = Utc::now() - chrono::Duration::hours(24);
        let decisions = self.store.routing_decisions_since(since).await?;
        Ok(decisions.into_iter().rev().find(|d| d.task_id == task_id))
    }
}
