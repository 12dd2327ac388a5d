use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskfabric_core::{
    AgentRecord, AgentStatus, FabricResult, PauseQueueEntry, PerformanceRecord, RoutingDecision,
    TaskRecord, TaskState,
};
use uuid::Uuid;

/// Repository contract for the six entities coordinated between service
/// instances.
///
/// All methods return owned snapshots, never live references; cross-instance
/// coordination happens only through this store and the message broker.
/// Writes within one method call are atomic with respect to other callers.
#[async_trait]
pub trait DispatchStore: Send + Sync {
    // --- Agents ---

    /// Inserts or replaces an agent record (called on every heartbeat).
    async fn upsert_agent(&self, agent: AgentRecord) -> FabricResult<()>;

    /// Fetches one agent by id.
    async fn get_agent(&self, agent_id: &str) -> FabricResult<Option<AgentRecord>>;

    /// Lists agents whose status is in `statuses`, ordered by agent id.
    async fn list_agents_by_status(
        &self,
        statuses: &[AgentStatus],
    ) -> FabricResult<Vec<AgentRecord>>;

    /// Flips agents whose last heartbeat is older than `timeout` to
    /// offline; returns how many were transitioned.
    async fn mark_stale_agents_offline(
        &self,
        now: DateTime<Utc>,
        timeout: chrono::Duration,
    ) -> FabricResult<usize>;

    // --- Performance history ---

    /// Records one execution outcome for an (agent, work-type) pair.
    async fn record_outcome(
        &self,
        agent_id: &str,
        work_type: &str,
        success: bool,
        duration_ms: u64,
    ) -> FabricResult<()>;

    /// Fetches the history row for an (agent, work-type) pair.
    async fn get_performance(
        &self,
        agent_id: &str,
        work_type: &str,
    ) -> FabricResult<Option<PerformanceRecord>>;

    // --- Routing audit trail ---

    /// Appends one immutable routing decision.
    async fn append_routing_decision(&self, decision: RoutingDecision) -> FabricResult<()>;

    /// Returns decisions made at or after `since`, oldest first.
    async fn routing_decisions_since(
        &self,
        since: DateTime<Utc>,
    ) -> FabricResult<Vec<RoutingDecision>>;

    // --- Pause queue ---

    /// Inserts a batch of pause entries as a single transaction; on commit
    /// failure nothing is persisted and the count is 0.
    async fn insert_pause_entries(&self, entries: Vec<PauseQueueEntry>) -> FabricResult<usize>;

    /// Lists entries still awaiting resume (`resume_after` unset).
    async fn pending_pause_entries(&self) -> FabricResult<Vec<PauseQueueEntry>>;

    /// Stamps an entry as resumed at `resumed_at`.
    async fn mark_entry_resumed(
        &self,
        entry_id: Uuid,
        resumed_at: DateTime<Utc>,
    ) -> FabricResult<()>;

    // --- Task status ---

    /// Inserts or replaces a task status row.
    async fn upsert_task(&self, task: TaskRecord) -> FabricResult<()>;

    /// Fetches one task status row.
    async fn get_task(&self, task_id: Uuid) -> FabricResult<Option<TaskRecord>>;

    /// Updates a task's lifecycle state and `updated_at`.
    async fn set_task_state(&self, task_id: Uuid, state: TaskState) -> FabricResult<()>;
}
