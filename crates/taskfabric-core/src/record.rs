//! Entity records shared through the dispatch store.
//!
//! These are the durable rows coordinated between service instances: agent
//! registrations, per-(agent, work-type) performance history, the routing
//! audit trail, the pause queue, and task status. Stores hand out owned
//! snapshots of these types, never live references.

use crate::envelope::AgentKind;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Liveness status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Heartbeating and accepting work.
    Online,
    /// Heartbeats have lapsed beyond the configured timeout.
    Offline,
    /// Heartbeating but currently executing work (prefetch = 1).
    Busy,
}

/// Resource snapshot reported with each heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMetrics {
    /// 1-minute CPU load average.
    pub cpu_load: f64,
    /// Number of logical CPU cores.
    pub cpu_cores: u32,
    /// Total system memory in MiB.
    pub memory_total_mb: u64,
    /// Currently available memory in MiB.
    pub memory_available_mb: u64,
    /// Total GPU VRAM in MiB; zero on GPU-less hosts.
    pub gpu_vram_total_mb: u64,
    /// Currently available GPU VRAM in MiB.
    pub gpu_vram_available_mb: u64,
    /// GPU vendor string, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_vendor: Option<String>,
}

/// A registered worker agent, upserted on every heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Stable unique agent identifier.
    pub agent_id: String,
    /// Which pool family the agent belongs to.
    pub agent_type: AgentKind,
    /// Human-readable pool name (for audit rows and operator messages).
    pub pool_name: String,
    /// Work-type tokens this agent can execute.
    pub capabilities: HashSet<String>,
    /// Optional expertise tags used as a routing bonus.
    #[serde(default)]
    pub specializations: HashSet<String>,
    /// Current liveness status.
    pub status: AgentStatus,
    /// Time of the last received heartbeat.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Latest resource snapshot.
    pub resources: ResourceMetrics,
}

impl AgentRecord {
    /// Creates an online agent record with a fresh heartbeat timestamp.
    pub fn new(
        agent_id: impl Into<String>,
        agent_type: AgentKind,
        pool_name: impl Into<String>,
        capabilities: HashSet<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type,
            pool_name: pool_name.into(),
            capabilities,
            specializations: HashSet::new(),
            status: AgentStatus::Online,
            last_heartbeat_at: Utc::now(),
            resources: ResourceMetrics::default(),
        }
    }

    /// Builder-style setter for specializations.
    pub fn with_specializations(mut self, specializations: HashSet<String>) -> Self {
        self.specializations = specializations;
        self
    }

    /// Builder-style setter for the resource snapshot.
    pub fn with_resources(mut self, resources: ResourceMetrics) -> Self {
        self.resources = resources;
        self
    }

    /// Whether the last heartbeat is older than `timeout` as of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_heartbeat_at > timeout
    }

    /// Whether the agent is a routing candidate (online or busy).
    pub fn is_routable(&self) -> bool {
        matches!(self.status, AgentStatus::Online | AgentStatus::Busy)
    }
}

/// Execution history for one (agent, work-type) pair. Mutated after each
/// completed dispatch; read-only input to scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// The agent this history belongs to.
    pub agent_id: String,
    /// The work type this history covers.
    pub work_type: String,
    /// Number of successful executions.
    pub success_count: u64,
    /// Number of failed executions.
    pub failure_count: u64,
    /// Cumulative execution time in milliseconds.
    pub total_duration_ms: u64,
    /// Time of the most recent execution.
    pub last_execution_at: DateTime<Utc>,
}

impl PerformanceRecord {
    /// Creates an empty history row.
    pub fn new(agent_id: impl Into<String>, work_type: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            work_type: work_type.into(),
            success_count: 0,
            failure_count: 0,
            total_duration_ms: 0,
            last_execution_at: Utc::now(),
        }
    }

    /// Total recorded executions.
    pub fn total(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Success ratio in `[0, 1]`; zero when no executions are recorded.
    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.success_count as f64 / total as f64
        }
    }
}

/// Append-only audit row written for every routing attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Unique id of this audit row.
    pub id: Uuid,
    /// The task being routed.
    pub task_id: Uuid,
    /// The requested work type.
    pub work_type: String,
    /// The candidate pool considered.
    pub pool_name: String,
    /// The selected agent.
    pub selected_agent: String,
    /// Success-rate scoring contribution.
    pub success_score: f64,
    /// Recent-context scoring contribution.
    pub context_score: f64,
    /// Specialization scoring contribution.
    pub specialization_score: f64,
    /// Load scoring contribution.
    pub load_score: f64,
    /// Total score, capped at 100.
    pub total_score: f64,
    /// Whether this decision was made during a retry sequence.
    pub retried: bool,
    /// Human-readable selection reason.
    pub reason: String,
    /// Decision timestamp.
    pub decided_at: DateTime<Utc>,
}

/// Why a task was placed on the pause queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// No agent currently has sufficient capacity headroom.
    InsufficientCapacity,
    /// An operator paused the work explicitly.
    ManualPause,
}

/// A unit of deferred work, persisted until capacity recovers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseQueueEntry {
    /// Unique id of this entry.
    pub id: Uuid,
    /// The deferred task.
    pub task_id: Uuid,
    /// Serialized work plan to re-dispatch on resume.
    pub work_plan: serde_json::Value,
    /// Why the task was paused.
    pub reason: PauseReason,
    /// When the task was paused.
    pub paused_at: DateTime<Utc>,
    /// Unset while waiting; set to the resume timestamp once released.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_after: Option<DateTime<Utc>>,
    /// Dispatch priority to use on resume.
    pub priority: u8,
}

impl PauseQueueEntry {
    /// Creates a pending entry with the default priority.
    pub fn new(task_id: Uuid, work_plan: serde_json::Value, reason: PauseReason) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            work_plan,
            reason,
            paused_at: Utc::now(),
            resume_after: None,
            priority: 3,
        }
    }

    /// Whether this entry is eligible for a resume attempt at `now`.
    /// Entries with `resume_after` set have already been released.
    pub fn is_pending(&self) -> bool {
        self.resume_after.is_none()
    }
}

/// Dispatch-visible lifecycle state of a task.
///
/// `PoolUnavailable`, `RetriesExhausted` and `AwaitingCapacity` are kept
/// distinct so operators can act differently on each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted and ready for dispatch.
    Pending,
    /// Published to the work queue; awaiting a result.
    Dispatched,
    /// Deferred on the pause queue until capacity recovers.
    AwaitingCapacity,
    /// Completed successfully.
    Completed,
    /// Execution failed terminally.
    Failed {
        /// The agent-reported error message.
        reason: String,
    },
    /// No online agent in the target pool (capability failure).
    PoolUnavailable,
    /// All dispatch retries were consumed without success.
    RetriesExhausted,
}

/// Status row for one task, updated along the dispatch path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// The task id.
    pub task_id: Uuid,
    /// The requested work type.
    pub work_type: String,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Resources reported by the executing agent, once a result arrives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_used: Option<std::collections::HashMap<String, f64>>,
    /// Last state-change timestamp.
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Creates a pending task record.
    pub fn pending(task_id: Uuid, work_type: impl Into<String>) -> Self {
        Self {
            task_id,
            work_type: work_type.into(),
            state: TaskState::Pending,
            resources_used: None,
            updated_at: Utc::now(),
        }
    }
}
