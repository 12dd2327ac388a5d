use crate::error::{FabricError, FabricResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A request to execute one unit of infrastructure-automation work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkRequest {
    /// The task this work belongs to.
    pub task_id: Uuid,
    /// Work-type token, matched against agent capabilities.
    pub work_type: String,
    /// Work-type-specific parameters.
    pub parameters: serde_json::Value,
}

impl WorkRequest {
    /// Creates a new work request.
    pub fn new(task_id: Uuid, work_type: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            task_id,
            work_type: work_type.into(),
            parameters,
        }
    }
}

/// Terminal outcome of a work request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkOutcome {
    /// The work finished successfully.
    Completed,
    /// The work failed; the result must carry a non-empty error message.
    Failed,
    /// The work was cancelled before completion.
    Cancelled,
}

/// The result of executing a [`WorkRequest`], published back on the reply
/// queue with the correlating `trace_id`/`request_id` of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkResult {
    /// The task this result belongs to.
    pub task_id: Uuid,
    /// Terminal outcome.
    pub status: WorkOutcome,
    /// Error message; required and non-empty when `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Process-style exit code (0 on success).
    pub exit_code: i32,
    /// Wall-clock execution duration in milliseconds.
    pub duration_ms: u64,
    /// Resource usage snapshot recorded by the executing agent.
    #[serde(default)]
    pub resources_used: HashMap<String, f64>,
    /// Correlating trace id copied from the request envelope.
    pub trace_id: Uuid,
    /// Correlating idempotency key copied from the request envelope.
    pub request_id: Uuid,
}

impl WorkResult {
    /// Creates a successful result for the given request correlation ids.
    pub fn completed(task_id: Uuid, trace_id: Uuid, request_id: Uuid, duration_ms: u64) -> Self {
        Self {
            task_id,
            status: WorkOutcome::Completed,
            error: None,
            exit_code: 0,
            duration_ms,
            resources_used: HashMap::new(),
            trace_id,
            request_id,
        }
    }

    /// Creates a failed result with the given error message.
    pub fn failed(
        task_id: Uuid,
        trace_id: Uuid,
        request_id: Uuid,
        duration_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            status: WorkOutcome::Failed,
            error: Some(error.into()),
            exit_code: 1,
            duration_ms,
            resources_used: HashMap::new(),
            trace_id,
            request_id,
        }
    }

    /// Validates the invariant that a failed result carries a non-empty
    /// error message.
    pub fn validate(&self) -> FabricResult<()> {
        if self.status == WorkOutcome::Failed
            && self.error.as_deref().map_or(true, str::is_empty)
        {
            return Err(FabricError::Validation(
                "failed work result must carry a non-empty error message".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the work completed successfully.
    pub fn is_success(&self) -> bool {
        self.status == WorkOutcome::Completed
    }
}
