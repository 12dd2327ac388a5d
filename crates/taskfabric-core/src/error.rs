use thiserror::Error;

/// A convenience `Result` alias using [`FabricError`].
pub type FabricResult<T> = Result<T, FabricError>;

/// Top-level error type for the Taskfabric dispatch core.
///
/// Each variant corresponds to a failure class with its own handling rule:
/// validation and capability errors are permanent and never retried,
/// transient dispatch errors are retried with re-scoring, persistence
/// errors are logged without blocking the primary dispatch path.
#[derive(Debug, Error)]
pub enum FabricError {
    /// A message failed protocol validation (bad version or unexpected type).
    /// The message is rejected without requeue and flows to the DLX.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No online agent in the target pool can execute the requested work type.
    /// Permanent; surfaced synchronously to the caller, never retried.
    #[error("Capability error: {0}")]
    Capability(String),

    /// A selected agent failed to accept or execute a dispatch.
    /// Retried with re-scoring up to the configured limit.
    #[error("Transient dispatch error: {0}")]
    TransientDispatch(String),

    /// A repository read or write failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A broker publish/consume/ack operation failed.
    #[error("Bus error: {0}")]
    Bus(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FabricError {
    /// Whether this error is permanent and must not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Capability(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_is_permanent() {
        assert!(FabricError::Capability("pool offline".into()).is_permanent());
        assert!(FabricError::Validation("bad version".into()).is_permanent());
    }

    #[test]
    fn test_transient_is_not_permanent() {
        assert!(!FabricError::TransientDispatch("agent refused".into()).is_permanent());
        assert!(!FabricError::Persistence("write failed".into()).is_permanent());
    }

    #[test]
    fn test_display_includes_context() {
        let err = FabricError::Capability("no agent has capability 'deploy'".into());
        assert!(err.to_string().contains("deploy"));
    }
}
