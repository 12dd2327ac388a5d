use crate::repository::DispatchStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use taskfabric_core::{
    AgentRecord, AgentStatus, FabricError, FabricResult, PauseQueueEntry, PerformanceRecord,
    RoutingDecision, TaskRecord, TaskState,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct StoreState {
    agents: HashMap<String, AgentRecord>,
    performance: HashMap<(String, String), PerformanceRecord>,
    decisions: Vec<RoutingDecision>,
    pause_entries: HashMap<Uuid, PauseQueueEntry>,
    tasks: HashMap<Uuid, TaskRecord>,
}

/// In-memory store suitable for tests and single-process deployments.
///
/// A single `RwLock` over all tables gives every write method the
/// single-writer discipline: a heartbeat upsert and a resume-cycle update
/// touching the same agent row serialize rather than losing updates.
pub struct MemoryStore {
    inner: RwLock<StoreState>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreState::default()),
        }
    }

    /// Total number of routing decisions recorded (test/introspection aid).
    pub async fn routing_decision_count(&self) -> usize {
        self.inner.read().await.decisions.len()
    }

    /// Lifecycle states of every known task (test/introspection aid).
    pub async fn task_states(&self) -> Vec<TaskState> {
        self.inner
            .read()
            .await
            .tasks
            .values()
            .map(|t| t.state.clone())
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchStore for MemoryStore {
    async fn upsert_agent(&self, agent: AgentRecord) -> FabricResult<()> {
        let mut state = self.inner.write().await;
        state.agents.insert(agent.agent_id.clone(), agent);
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> FabricResult<Option<AgentRecord>> {
        let state = self.inner.read().await;
        Ok(state.agents.get(agent_id).cloned())
    }

    async fn list_agents_by_status(
        &self,
        statuses: &[AgentStatus],
    ) -> FabricResult<Vec<AgentRecord>> {
        let state = self.inner.read().await;
        let mut agents: Vec<AgentRecord> = state
            .agents
            .values()
            .filter(|a| statuses.contains(&a.status))
            .cloned()
            .collect();
        // Stable order so callers never depend on map iteration order.
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(agents)
    }

    async fn mark_stale_agents_offline(
        &self,
        now: DateTime<Utc>,
        timeout: chrono::Duration,
    ) -> FabricResult<usize> {
        let mut state = self.inner.write().await;
        let mut transitioned = 0;
        for agent in state.agents.values_mut() {
            if agent.status != AgentStatus::Offline && agent.is_stale(now, timeout) {
                agent.status = AgentStatus::Offline;
                transitioned += 1;
            }
        }
        Ok(transitioned)
    }

    async fn record_outcome(
        &self,
        agent_id: &str,
        work_type: &str,
        success: bool,
        duration_ms: u64,
    ) -> FabricResult<()> {
        let mut state = self.inner.write().await;
        let key = (agent_id.to_string(), work_type.to_string());
        let record = state
            .performance
            .entry(key)
            .or_insert_with(|| PerformanceRecord::new(agent_id, work_type));
        if success {
            record.success_count += 1;
        } else {
            record.failure_count += 1;
        }
        record.total_duration_ms += duration_ms;
        record.last_execution_at = Utc::now();
        Ok(())
    }

    async fn get_performance(
        &self,
        agent_id: &str,
        work_type: &str,
    ) -> FabricResult<Option<PerformanceRecord>> {
        let state = self.inner.read().await;
        Ok(state
            .performance
            .get(&(agent_id.to_string(), work_type.to_string()))
            .cloned())
    }

    async fn append_routing_decision(&self, decision: RoutingDecision) -> FabricResult<()> {
        let mut state = self.inner.write().await;
        state.decisions.push(decision);
        Ok(())
    }

    async fn routing_decisions_since(
        &self,
        since: DateTime<Utc>,
    ) -> FabricResult<Vec<RoutingDecision>> {
        let state = self.inner.read().await;
        Ok(state
            .decisions
            .iter()
            .filter(|d| d.decided_at >= since)
            .cloned()
            .collect())
    }

    async fn insert_pause_entries(&self, entries: Vec<PauseQueueEntry>) -> FabricResult<usize> {
        let mut state = self.inner.write().await;
        // All-or-nothing: validate the whole batch before touching the table.
        for entry in &entries {
            if state.pause_entries.contains_key(&entry.id) {
                return Err(FabricError::Persistence(format!(
                    "duplicate pause entry id {}",
                    entry.id
                )));
            }
        }
        let count = entries.len();
        for entry in entries {
            state.pause_entries.insert(entry.id, entry);
        }
        Ok(count)
    }

    async fn pending_pause_entries(&self) -> FabricResult<Vec<PauseQueueEntry>> {
        let state = self.inner.read().await;
        let mut entries: Vec<PauseQueueEntry> = state
            .pause_entries
            .values()
            .filter(|e| e.is_pending())
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.paused_at);
        Ok(entries)
    }

    async fn mark_entry_resumed(
        &self,
        entry_id: Uuid,
        resumed_at: DateTime<Utc>,
    ) -> FabricResult<()> {
        let mut state = self.inner.write().await;
        let entry = state.pause_entries.get_mut(&entry_id).ok_or_else(|| {
            FabricError::Persistence(format!("unknown pause entry {entry_id}"))
        })?;
        entry.resume_after = Some(resumed_at);
        Ok(())
    }

    async fn upsert_task(&self, task: TaskRecord) -> FabricResult<()> {
        let mut state = self.inner.write().await;
        state.tasks.insert(task.task_id, task);
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> FabricResult<Option<TaskRecord>> {
        let state = self.inner.read().await;
        Ok(state.tasks.get(&task_id).cloned())
    }

    async fn set_task_state(&self, task_id: Uuid, new_state: TaskState) -> FabricResult<()> {
        let mut state = self.inner.write().await;
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| FabricError::Persistence(format!("unknown task {task_id}")))?;
        task.state = new_state;
        task.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use taskfabric_core::{AgentKind, PauseReason};

    fn agent(id: &str) -> AgentRecord {
        AgentRecord::new(
            id,
            AgentKind::Infra,
            "infra-pool",
            HashSet::from(["deploy_service".to_string()]),
        )
    }

    #[tokio::test]
    async fn test_upsert_and_get_agent() {
        let store = MemoryStore::new();
        store.upsert_agent(agent("infra-01")).await.unwrap();

        let fetched = store.get_agent("infra-01").await.unwrap().unwrap();
        assert_eq!(fetched.agent_id, "infra-01");
        assert!(store.get_agent("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_status_is_sorted() {
        let store = MemoryStore::new();
        store.upsert_agent(agent("infra-02")).await.unwrap();
        store.upsert_agent(agent("infra-01")).await.unwrap();
        let mut offline = agent("infra-03");
        offline.status = AgentStatus::Offline;
        store.upsert_agent(offline).await.unwrap();

        let online = store
            .list_agents_by_status(&[AgentStatus::Online, AgentStatus::Busy])
            .await
            .unwrap();
        let ids: Vec<&str> = online.iter().map(|a| a.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["infra-01", "infra-02"]);
    }

    #[tokio::test]
    async fn test_stale_agents_marked_offline() {
        let store = MemoryStore::new();
        let mut stale = agent("infra-01");
        stale.last_heartbeat_at = Utc::now() - chrono::Duration::seconds(120);
        store.upsert_agent(stale).await.unwrap();
        store.upsert_agent(agent("infra-02")).await.unwrap();

        let n = store
            .mark_stale_agents_offline(Utc::now(), chrono::Duration::seconds(90))
            .await
            .unwrap();
        assert_eq!(n, 1);
        let fetched = store.get_agent("infra-01").await.unwrap().unwrap();
        assert_eq!(fetched.status, AgentStatus::Offline);

        // Idempotent: already-offline agents are not counted again.
        let n = store
            .mark_stale_agents_offline(Utc::now(), chrono::Duration::seconds(90))
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_record_outcome_accumulates() {
        let store = MemoryStore::new();
        store
            .record_outcome("infra-01", "deploy_service", true, 100)
            .await
            .unwrap();
        store
            .record_outcome("infra-01", "deploy_service", false, 50)
            .await
            .unwrap();

        let perf = store
            .get_performance("infra-01", "deploy_service")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(perf.success_count, 1);
        assert_eq!(perf.failure_count, 1);
        assert_eq!(perf.total_duration_ms, 150);
    }

    #[tokio::test]
    async fn test_routing_decisions_window() {
        let store = MemoryStore::new();
        let mut old = decision("infra-01");
        old.decided_at = Utc::now() - chrono::Duration::hours(5);
        store.append_routing_decision(old).await.unwrap();
        store
            .append_routing_decision(decision("infra-02"))
            .await
            .unwrap();

        let recent = store
            .routing_decisions_since(Utc::now() - chrono::Duration::hours(4))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].selected_agent, "infra-02");
    }

    fn decision(selected: &str) -> RoutingDecision {
        RoutingDecision {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            work_type: "deploy_service".to_string(),
            pool_name: "infra-pool".to_string(),
            selected_agent: selected.to_string(),
            success_score: 20.0,
            context_score: 0.0,
            specialization_score: 0.0,
            load_score: 10.0,
            total_score: 30.0,
            retried: false,
            reason: "test".to_string(),
            decided_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_pause_entry_batch_is_atomic() {
        let store = MemoryStore::new();
        let a = PauseQueueEntry::new(
            Uuid::new_v4(),
            serde_json::json!({}),
            PauseReason::InsufficientCapacity,
        );
        let duplicate_of_a = a.clone();
        let b = PauseQueueEntry::new(
            Uuid::new_v4(),
            serde_json::json!({}),
            PauseReason::InsufficientCapacity,
        );

        assert_eq!(store.insert_pause_entries(vec![a]).await.unwrap(), 1);
        // Second batch contains a duplicate id: nothing from it is persisted.
        assert!(store
            .insert_pause_entries(vec![b, duplicate_of_a])
            .await
            .is_err());
        assert_eq!(store.pending_pause_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_resumed_removes_from_pending() {
        let store = MemoryStore::new();
        let entry = PauseQueueEntry::new(
            Uuid::new_v4(),
            serde_json::json!({}),
            PauseReason::InsufficientCapacity,
        );
        let id = entry.id;
        store.insert_pause_entries(vec![entry]).await.unwrap();

        store.mark_entry_resumed(id, Utc::now()).await.unwrap();
        assert!(store.pending_pause_entries().await.unwrap().is_empty());
        assert!(store
            .mark_entry_resumed(Uuid::new_v4(), Utc::now())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_task_state_transitions() {
        let store = MemoryStore::new();
        let task_id = Uuid::new_v4();
        store
            .upsert_task(TaskRecord::pending(task_id, "deploy_service"))
            .await
            .unwrap();

        store
            .set_task_state(task_id, TaskState::Dispatched)
            .await
            .unwrap();
        let task = store.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Dispatched);

        assert!(store
            .set_task_state(Uuid::new_v4(), TaskState::Completed)
            .await
            .is_err());
    }
}
