use crate::memory::MemoryStore;
use crate::repository::DispatchStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use taskfabric_core::{
    AgentRecord, AgentStatus, FabricError, FabricResult, PauseQueueEntry, PerformanceRecord,
    RoutingDecision, TaskRecord, TaskState,
};
use uuid::Uuid;

/// Store that persists the pause queue as JSONL on disk so deferred work
/// survives a restart; all other tables delegate to an in-memory store.
///
/// Loads all entries on creation; appends on insert; rewrites on resume.
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Opens (or creates) a file-backed store at `path`, reloading any
    /// previously persisted pause entries.
    pub async fn new(path: PathBuf) -> FabricResult<Self> {
        let inner = MemoryStore::new();

        if path.exists() {
            let data = tokio::fs::read_to_string(&path).await.map_err(|e| {
                FabricError::Persistence(format!("failed to read pause queue: {e}"))
            })?;
            let mut entries = Vec::new();
            for line in data.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let entry: PauseQueueEntry = serde_json::from_str(line).map_err(|e| {
                    FabricError::Persistence(format!("invalid pause queue entry: {e}"))
                })?;
                entries.push(entry);
            }
            if !entries.is_empty() {
                inner.insert_pause_entries(entries).await?;
            }
        } else if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FabricError::Persistence(format!("failed to create dir: {e}")))?;
        }

        Ok(Self { path, inner })
    }

    async fn append_entries(&self, entries: &[PauseQueueEntry]) -> FabricResult<()> {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| FabricError::Persistence(format!("failed to open pause queue: {e}")))?;
        let mut data = String::new();
        for entry in entries {
            data.push_str(&serde_json::to_string(entry)?);
            data.push('\n');
        }
        file.write_all(data.as_bytes())
            .await
            .map_err(|e| FabricError::Persistence(format!("failed to write pause queue: {e}")))?;
        Ok(())
    }

    async fn rewrite_file(&self) -> FabricResult<()> {
        // Pending entries only: resumed entries have left the durable backlog.
        let entries = self.inner.pending_pause_entries().await?;
        let mut data = String::new();
        for entry in &entries {
            data.push_str(&serde_json::to_string(entry)?);
            data.push('\n');
        }
        tokio::fs::write(&self.path, data.as_bytes())
            .await
            .map_err(|e| FabricError::Persistence(format!("failed to rewrite pause queue: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl DispatchStore for FileStore {
    async fn upsert_agent(&self, agent: AgentRecord) -> FabricResult<()> {
        self.inner.upsert_agent(agent).await
    }

    async fn get_agent(&self, agent_id: &str) -> FabricResult<Option<AgentRecord>> {
        self.inner.get_agent(agent_id).await
    }

    async fn list_agents_by_status(
        &self,
        statuses: &[AgentStatus],
    ) -> FabricResult<Vec<AgentRecord>> {
        self.inner.list_agents_by_status(statuses).await
    }

    async fn mark_stale_agents_offline(
        &self,
        now: DateTime<Utc>,
        timeout: chrono::Duration,
    ) -> FabricResult<usize> {
        self.inner.mark_stale_agents_offline(now, timeout).await
    }

    async fn record_outcome(
        &self,
        agent_id: &str,
        work_type: &str,
        success: bool,
        duration_ms: u64,
    ) -> FabricResult<()> {
        self.inner
            .record_outcome(agent_id, work_type, success, duration_ms)
            .await
    }

    async fn get_performance(
        &self,
        agent_id: &str,
        work_type: &str,
    ) -> FabricResult<Option<PerformanceRecord>> {
        self.inner.get_performance(agent_id, work_type).await
    }

    async fn append_routing_decision(&self, decision: RoutingDecision) -> FabricResult<()> {
        self.inner.append_routing_decision(decision).await
    }

    async fn routing_decisions_since(
        &self,
        since: DateTime<Utc>,
    ) -> FabricResult<Vec<RoutingDecision>> {
        self.inner.routing_decisions_since(since).await
    }

    async fn insert_pause_entries(&self, entries: Vec<PauseQueueEntry>) -> FabricResult<usize> {
        let count = self.inner.insert_pause_entries(entries.clone()).await?;
        self.append_entries(&entries).await?;
        Ok(count)
    }

    async fn pending_pause_entries(&self) -> FabricResult<Vec<PauseQueueEntry>> {
        self.inner.pending_pause_entries().await
    }

    async fn mark_entry_resumed(
        &self,
        entry_id: Uuid,
        resumed_at: DateTime<Utc>,
    ) -> FabricResult<()> {
        self.inner.mark_entry_resumed(entry_id, resumed_at).await?;
        self.rewrite_file().await
    }

    async fn upsert_task(&self, task: TaskRecord) -> FabricResult<()> {
        self.inner.upsert_task(task).await
    }

    async fn get_task(&self, task_id: Uuid) -> FabricResult<Option<TaskRecord>> {
        self.inner.get_task(task_id).await
    }

    async fn set_task_state(&self, task_id: Uuid, state: TaskState) -> FabricResult<()> {
        self.inner.set_task_state(task_id, state).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use taskfabric_core::PauseReason;

    fn entry() -> PauseQueueEntry {
        PauseQueueEntry::new(
            Uuid::new_v4(),
            serde_json::json!({"work_type": "deploy_service"}),
            PauseReason::InsufficientCapacity,
        )
    }

    #[tokio::test]
    async fn test_pause_entries_survive_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pause_queue.jsonl");

        {
            let store = FileStore::new(path.clone()).await.unwrap();
            store
                .insert_pause_entries(vec![entry(), entry()])
                .await
                .unwrap();
            assert_eq!(store.pending_pause_entries().await.unwrap().len(), 2);
        }

        let reloaded = FileStore::new(path).await.unwrap();
        assert_eq!(reloaded.pending_pause_entries().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resume_rewrites_backlog() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pause_queue.jsonl");

        let store = FileStore::new(path.clone()).await.unwrap();
        let keep = entry();
        let release = entry();
        let release_id = release.id;
        store
            .insert_pause_entries(vec![keep.clone(), release])
            .await
            .unwrap();

        store
            .mark_entry_resumed(release_id, Utc::now())
            .await
            .unwrap();

        let reloaded = FileStore::new(path).await.unwrap();
        let pending = reloaded.pending_pause_entries().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, keep.id);
    }

    #[tokio::test]
    async fn test_empty_file_is_valid() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path().join("pause_queue.jsonl"))
            .await
            .unwrap();
        assert!(store.pending_pause_entries().await.unwrap().is_empty());
    }
}
