//! Capacity gating and the pause/resume worker.
//!
//! Before dispatch the orchestrator asks the [`CapacityGate`] whether any
//! agent in the target pool has headroom; if none does, the work is parked
//! on the durable pause queue instead of being published. The
//! [`ResumeWorker`] polls that queue and re-dispatches entries once the
//! pool recovers.

use crate::orchestrator::Dispatcher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use taskfabric_core::{
    AgentKind, AgentStatus, DispatchConfig, FabricResult, PauseQueueEntry, ResourceMetrics,
    TaskState,
};
use taskfabric_store::DispatchStore;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Serialized work plan carried by a pause-queue entry, re-dispatched as-is
/// once capacity recovers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PausedWork {
    /// Work-type token of the deferred task.
    pub work_type: String,
    /// Target agent pool.
    pub agent_type: AgentKind,
    /// Work-type-specific parameters.
    pub parameters: serde_json::Value,
}

/// Decides whether a pool currently has capacity headroom for new work.
pub struct CapacityGate {
    store: Arc<dyn DispatchStore>,
    threshold: f64,
    gpu_reserve_mb: u64,
}

impl CapacityGate {
    /// Creates a gate with the configured pause threshold and GPU reserve.
    pub fn new(store: Arc<dyn DispatchStore>, config: &DispatchConfig) -> Self {
        Self {
            store,
            threshold: config.pause_threshold,
            gpu_reserve_mb: config.gpu_reserve_mb,
        }
    }

    /// Capacity fraction of one resource snapshot, in `[0, 1]`.
    ///
    /// GPU hosts report VRAM headroom against the available amount plus a
    /// fixed reserve; CPU-only hosts fall back to the memory ratio so a
    /// GPU-less pool is never treated as permanently saturated. `None` means
    /// the snapshot is unusable and the agent is skipped.
    pub fn capacity_fraction(&self, resources: &ResourceMetrics) -> Option<f64> {
        if resources.gpu_vram_total_mb > 0 {
            let denominator = resources.gpu_vram_available_mb + self.gpu_reserve_mb;
            if denominator == 0 {
                return Some(0.0);
            }
            Some(resources.gpu_vram_available_mb as f64 / denominator as f64)
        } else if resources.memory_total_mb > 0 {
            Some(resources.memory_available_mb as f64 / resources.memory_total_mb as f64)
        } else {
            None
        }
    }

    /// Whether new work for `agent_type` should be paused.
    ///
    /// True when the pool is empty, when no agent reports a usable snapshot,
    /// when every usable fraction is below the threshold, or when the check
    /// itself fails.
    pub async fn should_pause(&self, agent_type: AgentKind) -> bool {
        match self.pool_has_headroom(agent_type).await {
            Ok(has_headroom) => !has_headroom,
            Err(e) => {
                warn!(pool = %agent_type, error = %e, "capacity check failed, treating pool as saturated");
                true
            }
        }
    }

    async fn pool_has_headroom(&self, agent_type: AgentKind) -> FabricResult<bool> {
        let pool: Vec<_> = self
            .store
            .list_agents_by_status(&[AgentStatus::Online, AgentStatus::Busy])
            .await?
            .into_iter()
            .filter(|a| a.agent_type == agent_type)
            .collect();
        if pool.is_empty() {
            return Ok(false);
        }
        for agent in &pool {
            match self.capacity_fraction(&agent.resources) {
                Some(fraction) if fraction >= self.threshold => {
                    debug!(
                        agent_id = %agent.agent_id,
                        fraction,
                        "agent has capacity headroom"
                    );
                    return Ok(true);
                }
                Some(fraction) => {
                    debug!(agent_id = %agent.agent_id, fraction, "agent below pause threshold");
                }
                None => {
                    debug!(agent_id = %agent.agent_id, "no usable resource snapshot");
                }
            }
        }
        Ok(false)
    }

    /// Parks a batch of work on the pause queue and flips the affected tasks
    /// to `awaiting_capacity`. The insert is all-or-nothing; returns how many
    /// entries were committed (0 when the commit failed).
    pub async fn pause_work(&self, entries: Vec<PauseQueueEntry>) -> usize {
        let task_ids: Vec<Uuid> = entries.iter().map(|e| e.task_id).collect();
        let committed = match self.store.insert_pause_entries(entries).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "failed to persist pause entries");
                return 0;
            }
        };
        for task_id in task_ids {
            if let Err(e) = self
                .store
                .set_task_state(task_id, TaskState::AwaitingCapacity)
                .await
            {
                warn!(task_id = %task_id, error = %e, "failed to flag task as awaiting capacity");
            }
        }
        info!(count = committed, "paused work until capacity recovers");
        committed
    }
}

/// Handle to a spawned background loop.
pub(crate) struct LoopHandle {
    pub(crate) stop: watch::Sender<bool>,
    pub(crate) handle: JoinHandle<()>,
}

/// Background loop that re-dispatches paused work once capacity recovers.
///
/// One cycle loads the pending pause entries and re-evaluates the gate per
/// entry; entries whose pool recovered are re-dispatched and marked
/// resumed. Per-entry errors are logged and skipped; a cycle-level error
/// (the pending-entry load itself) triggers the error backoff before the
/// next poll.
pub struct ResumeWorker {
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
    error_backoff: Duration,
    running: Mutex<Option<LoopHandle>>,
}

impl ResumeWorker {
    /// Creates a stopped worker polling at `poll_interval`.
    pub fn new(dispatcher: Arc<Dispatcher>, poll_interval: Duration, error_backoff: Duration) -> Self {
        Self {
            dispatcher,
            poll_interval,
            error_backoff,
            running: Mutex::new(None),
        }
    }

    /// Spawns the loop. A no-op while already running.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }
        let (stop, mut stopped) = watch::channel(false);
        let dispatcher = self.dispatcher.clone();
        let poll_interval = self.poll_interval;
        let error_backoff = self.error_backoff;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
                match dispatcher.run_resume_cycle().await {
                    Ok(0) => {}
                    Ok(resumed) => info!(resumed, "resumed paused work"),
                    Err(e) => {
                        warn!(error = %e, "resume cycle failed, backing off");
                        tokio::select! {
                            _ = stopped.changed() => break,
                            _ = tokio::time::sleep(error_backoff) => {}
                        }
                    }
                }
            }
        });
        *running = Some(LoopHandle { stop, handle });
    }

    /// Stops the loop and waits for it to exit. Safe while stopped.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let _ = running.stop.send(true);
        if let Err(e) = running.handle.await {
            warn!(error = %e, "resume worker task aborted");
        }
    }
}
