//! Message bus layer: queue topology, broker abstraction, and the
//! agent-side consumer lifecycle.
//!
//! Delivery is at-least-once with best-effort priority ordering. Agent
//! consumers run with prefetch = 1, so each agent processes exactly one
//! in-flight work item at a time; idempotency caches make redelivery safe.
//!
//! # Main types
//!
//! - [`MessageBus`] — Broker-agnostic publish/consume/ack abstraction.
//! - [`InMemoryBroker`] — In-process broker with full topology semantics.
//! - [`Topology`] — The declared queue/exchange/dead-letter graph.
//! - [`AgentConsumer`] — Validate → ack → dedupe → execute → reply lifecycle.
//! - [`WorkHandler`] / [`CapabilityReporter`] — Seams implemented per agent type.

/// Broker abstraction and the in-memory implementation.
pub mod broker;
/// Agent-side message lifecycle.
pub mod consumer;
/// Queue and exchange declarations.
pub mod topology;

pub use broker::{Delivery, InMemoryBroker, MessageBus};
pub use consumer::{AgentConsumer, CapabilityReporter, ConsumeOutcome, WorkHandler};
pub use topology::{
    Binding, ExchangeKind, ExchangeSpec, QueueSpec, Topology, BROADCAST_EXCHANGE, DLX_EXCHANGE,
    DLX_QUEUE, DLX_QUEUE_MAX_LENGTH, REPLY_QUEUE, WORK_QUEUE,
};
