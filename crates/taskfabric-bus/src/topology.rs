//! The durable queue/exchange graph used for all dispatch traffic.
//!
//! Names and attributes are fixed by the wire contract: consumers on any
//! broker implementation must see the same dead-letter wiring, priority
//! range, and length limits.

use serde::{Deserialize, Serialize};

/// Queue carrying work requests to agents (durable, priority-aware).
pub const WORK_QUEUE: &str = "work_queue";
/// Queue carrying work results back to the orchestrator (durable).
pub const REPLY_QUEUE: &str = "reply_queue";
/// Fanout exchange for system-wide announcements (non-durable).
pub const BROADCAST_EXCHANGE: &str = "broadcast_exchange";
/// Direct dead-letter exchange; terminal sink for rejected messages.
pub const DLX_EXCHANGE: &str = "dlx_exchange";
/// Catch-all dead-letter queue bound to [`DLX_EXCHANGE`].
pub const DLX_QUEUE: &str = "dlx_queue";
/// Maximum number of messages retained on the dead-letter queue.
pub const DLX_QUEUE_MAX_LENGTH: usize = 10_000;

/// Exchange routing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Routes to queues bound with a matching routing key.
    Direct,
    /// Copies every message to all bound queues.
    Fanout,
}

/// Declaration attributes for one exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSpec {
    /// Exchange name.
    pub name: String,
    /// Routing behavior.
    pub kind: ExchangeKind,
    /// Whether the exchange survives a broker restart.
    pub durable: bool,
}

/// Declaration attributes for one queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSpec {
    /// Queue name.
    pub name: String,
    /// Whether the queue survives a broker restart.
    pub durable: bool,
    /// Maximum supported message priority, if priority-aware.
    pub max_priority: Option<u8>,
    /// Length cap; the oldest message is dropped on overflow.
    pub max_length: Option<usize>,
    /// Exchange rejected messages are dead-lettered to.
    pub dead_letter_exchange: Option<String>,
}

/// A (exchange, routing key) → queue binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    /// Source exchange.
    pub exchange: String,
    /// Destination queue.
    pub queue: String,
    /// Routing key; empty string acts as catch-all on direct exchanges.
    pub routing_key: String,
}

/// The complete declared topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    /// Exchanges to declare.
    pub exchanges: Vec<ExchangeSpec>,
    /// Queues to declare.
    pub queues: Vec<QueueSpec>,
    /// Bindings to declare.
    pub bindings: Vec<Binding>,
}

impl Topology {
    /// The standard dispatch topology: `work_queue` and `reply_queue`
    /// dead-lettering into `dlx_exchange`, the bounded `dlx_queue` bound as
    /// catch-all, and the fanout `broadcast_exchange`.
    pub fn standard() -> Self {
        Self {
            exchanges: vec![
                ExchangeSpec {
                    name: DLX_EXCHANGE.to_string(),
                    kind: ExchangeKind::Direct,
                    durable: true,
                },
                ExchangeSpec {
                    name: BROADCAST_EXCHANGE.to_string(),
                    kind: ExchangeKind::Fanout,
                    durable: false,
                },
            ],
            queues: vec![
                QueueSpec {
                    name: WORK_QUEUE.to_string(),
                    durable: true,
                    max_priority: Some(taskfabric_core::PRIORITY_MAX),
                    max_length: None,
                    dead_letter_exchange: Some(DLX_EXCHANGE.to_string()),
                },
                QueueSpec {
                    name: REPLY_QUEUE.to_string(),
                    durable: true,
                    max_priority: None,
                    max_length: None,
                    dead_letter_exchange: Some(DLX_EXCHANGE.to_string()),
                },
                QueueSpec {
                    name: DLX_QUEUE.to_string(),
                    durable: true,
                    max_priority: None,
                    max_length: Some(DLX_QUEUE_MAX_LENGTH),
                    dead_letter_exchange: None,
                },
            ],
            bindings: vec![Binding {
                exchange: DLX_EXCHANGE.to_string(),
                queue: DLX_QUEUE.to_string(),
                routing_key: String::new(),
            }],
        }
    }
}
