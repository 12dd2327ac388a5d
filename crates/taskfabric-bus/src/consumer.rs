use crate::broker::MessageBus;
use crate::topology::{REPLY_QUEUE, WORK_QUEUE};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use taskfabric_core::{
    Envelope, FabricResult, IdempotencyCache, MessageType, WorkRequest, WorkResult,
};
use tracing::{info, warn};

/// Executes one unit of work. Implemented by each agent type; the execution
/// internals (playbooks, scaffolding, research) live outside this core.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    /// Runs the request to completion and returns its result.
    async fn execute(&self, request: WorkRequest) -> FabricResult<WorkResult>;
}

/// Reports the work-type tokens an agent can execute, advertised through
/// heartbeats and matched by the router.
pub trait CapabilityReporter: Send + Sync {
    /// The set of supported work-type tokens.
    fn capabilities(&self) -> HashSet<String>;
}

/// What one consumer poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The work queue was empty.
    Idle,
    /// The message failed validation and was dead-lettered.
    Rejected,
    /// A redelivered request was answered from the idempotency cache.
    Duplicate,
    /// The handler executed and the result was published.
    Executed,
}

/// Agent-side work consumer implementing the message lifecycle:
/// receive → validate → ack → idempotency lookup → execute → publish result.
///
/// The ack happens *before* execution so a crash mid-execution does not
/// redeliver an already-accepted message; the trade-off is that a crash
/// between ack and result-publish silently drops the result, leaving the
/// task pending until external reconciliation.
pub struct AgentConsumer {
    bus: Arc<dyn MessageBus>,
    handler: Arc<dyn WorkHandler>,
    cache: IdempotencyCache<WorkResult>,
}

impl AgentConsumer {
    /// Creates a consumer with its own request-deduplication cache.
    pub fn new(
        bus: Arc<dyn MessageBus>,
        handler: Arc<dyn WorkHandler>,
        cache_max_entries: usize,
        cache_ttl: std::time::Duration,
    ) -> Self {
        Self {
            bus,
            handler,
            cache: IdempotencyCache::new(cache_max_entries, cache_ttl),
        }
    }

    /// Processes at most one message from the work queue (prefetch = 1).
    pub async fn poll_once(&self) -> FabricResult<ConsumeOutcome> {
        let Some(delivery) = self.bus.consume(WORK_QUEUE).await? else {
            return Ok(ConsumeOutcome::Idle);
        };
        let envelope = delivery.envelope;

        let decoded = envelope
            .validate(MessageType::WorkRequest)
            .and_then(|()| envelope.decode_payload::<WorkRequest>());
        let request = match decoded {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    message_id = %envelope.message_id,
                    error = %e,
                    "rejecting invalid work request"
                );
                self.bus.nack(delivery.tag, false).await?;
                return Ok(ConsumeOutcome::Rejected);
            }
        };

        // Accept before executing; see the type-level note on the trade-off.
        self.bus.ack(delivery.tag).await?;

        if let Some(cached) = self.cache.get(envelope.request_id) {
            info!(
                request_id = %envelope.request_id,
                task_id = %cached.task_id,
                "duplicate work request, replaying cached result"
            );
            let reply = envelope.reply(MessageType::WorkResult, serde_json::to_value(&cached)?);
            self.bus.publish(REPLY_QUEUE, reply).await?;
            return Ok(ConsumeOutcome::Duplicate);
        }

        let task_id = request.task_id;
        let started = Instant::now();
        let mut result = match self.handler.execute(request).await {
            Ok(result) => result,
            Err(e) => WorkResult::failed(
                task_id,
                envelope.trace_id,
                envelope.request_id,
                started.elapsed().as_millis() as u64,
                e.to_string(),
            ),
        };
        // The executing agent copies the correlation ids onto the result.
        result.trace_id = envelope.trace_id;
        result.request_id = envelope.request_id;
        result.validate()?;

        self.cache.set(envelope.request_id, result.clone());
        let reply = envelope.reply(MessageType::WorkResult, serde_json::to_value(&result)?);
        self.bus.publish(REPLY_QUEUE, reply).await?;

        info!(
            task_id = %task_id,
            request_id = %envelope.request_id,
            status = ?result.status,
            duration_ms = result.duration_ms,
            "work executed"
        );
        Ok(ConsumeOutcome::Executed)
    }
}
