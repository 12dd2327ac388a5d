//! Core types for the Taskfabric dispatch system.
//!
//! This crate provides the foundational pieces shared across all Taskfabric
//! crates: the wire protocol envelope, work request/result types, the entity
//! records coordinated through the shared store, the configuration surface,
//! and the bounded idempotency cache that makes at-least-once delivery safe.
//!
//! # Main types
//!
//! - [`FabricError`] / [`FabricResult`] — Unified error enum and alias.
//! - [`Envelope`] — Protocol wrapper with correlation metadata.
//! - [`WorkRequest`] / [`WorkResult`] — The unit of dispatched work.
//! - [`AgentRecord`] / [`PerformanceRecord`] / [`RoutingDecision`] — Store rows.
//! - [`PauseQueueEntry`] / [`TaskRecord`] — Deferred work and task status.
//! - [`IdempotencyCache`] — Bounded LRU + TTL deduplication map.
//! - [`DispatchConfig`] — Documented-default configuration values.

/// Configuration values with documented defaults and env overrides.
pub mod config;
/// Protocol envelope and participant identities.
pub mod envelope;
/// Unified error types.
pub mod error;
/// Bounded LRU + TTL deduplication cache.
pub mod idempotency;
/// Entity records shared through the dispatch store.
pub mod record;
/// Tracing subscriber initialization.
pub mod telemetry;
/// Work request and result types.
pub mod work;

pub use config::DispatchConfig;
pub use envelope::{
    AgentKind, Envelope, MessageType, PRIORITY_DURABLE, PRIORITY_MAX, PRIORITY_MIN,
    PROTOCOL_VERSION,
};
pub use error::{FabricError, FabricResult};
pub use idempotency::IdempotencyCache;
pub use record::{
    AgentRecord, AgentStatus, PauseQueueEntry, PauseReason, PerformanceRecord, ResourceMetrics,
    RoutingDecision, TaskRecord, TaskState,
};
pub use work::{WorkOutcome, WorkRequest, WorkResult};
