use crate::error::{FabricError, FabricResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The protocol version every envelope must carry.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Lowest allowed message priority.
pub const PRIORITY_MIN: u8 = 1;
/// Highest allowed message priority (critical).
pub const PRIORITY_MAX: u8 = 5;
/// Messages at or above this priority are published as durable.
pub const PRIORITY_DURABLE: u8 = 4;

/// Identity of a service participating in the dispatch mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// The dispatch orchestrator itself.
    Orchestrator,
    /// Infrastructure automation agents (playbook execution).
    Infra,
    /// Desktop automation agents.
    Desktop,
    /// Code generation/analysis agents.
    Code,
    /// Research/lookup agents.
    Research,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentKind::Orchestrator => write!(f, "orchestrator"),
            AgentKind::Infra => write!(f, "infra"),
            AgentKind::Desktop => write!(f, "desktop"),
            AgentKind::Code => write!(f, "code"),
            AgentKind::Research => write!(f, "research"),
        }
    }
}

/// The kind of payload an [`Envelope`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A request to execute one unit of work.
    WorkRequest,
    /// A progress update for in-flight work.
    WorkStatus,
    /// The terminal result of a work request.
    WorkResult,
    /// A protocol-level error report.
    Error,
}

/// Protocol wrapper carrying routing and correlation metadata plus a typed
/// payload between agents and the orchestrator.
///
/// `trace_id` and `request_id` are stable across a request/result pair; the
/// executing agent copies them onto the result via [`Envelope::reply`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Wire protocol version; must equal [`PROTOCOL_VERSION`].
    pub protocol_version: String,
    /// Unique identifier of this message.
    pub message_id: Uuid,
    /// Sender identity.
    pub from_agent: AgentKind,
    /// Intended recipient identity.
    pub to_agent: AgentKind,
    /// UTC timestamp at creation.
    pub timestamp: DateTime<Utc>,
    /// Debug correlation id, stable across a request/result pair.
    pub trace_id: Uuid,
    /// Idempotency key, stable across a request/result pair.
    pub request_id: Uuid,
    /// Payload discriminator.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Priority in `[1, 5]`; 5 is critical. Best-effort ordering hint only.
    pub priority: u8,
    /// Type-specific payload map.
    pub payload: serde_json::Value,
    /// Optional extension fields, ignored by the core protocol.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extensions: HashMap<String, serde_json::Value>,
}

impl Envelope {
    /// Creates a new envelope with fresh `message_id`, `trace_id` and
    /// `request_id`. Priority is clamped into `[1, 5]`.
    pub fn new(
        from_agent: AgentKind,
        to_agent: AgentKind,
        message_type: MessageType,
        priority: u8,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            message_id: Uuid::new_v4(),
            from_agent,
            to_agent,
            timestamp: Utc::now(),
            trace_id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            message_type,
            priority: priority.clamp(PRIORITY_MIN, PRIORITY_MAX),
            payload,
            extensions: HashMap::new(),
        }
    }

    /// Builds a reply envelope addressed back to the sender, carrying the
    /// same `trace_id`, `request_id` and priority as the original.
    pub fn reply(&self, message_type: MessageType, payload: serde_json::Value) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            message_id: Uuid::new_v4(),
            from_agent: self.to_agent,
            to_agent: self.from_agent,
            timestamp: Utc::now(),
            trace_id: self.trace_id,
            request_id: self.request_id,
            message_type,
            priority: self.priority,
            payload,
            extensions: HashMap::new(),
        }
    }

    /// Validates the protocol version and that the message is of the
    /// expected type. Failures are terminal at this layer: the caller
    /// nacks the message without requeue and it flows to the DLX.
    pub fn validate(&self, expected: MessageType) -> FabricResult<()> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(FabricError::Validation(format!(
                "unsupported protocol version '{}' (expected '{}')",
                self.protocol_version, PROTOCOL_VERSION
            )));
        }
        if self.message_type != expected {
            return Err(FabricError::Validation(format!(
                "unexpected message type {:?} (expected {:?})",
                self.message_type, expected
            )));
        }
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&self.priority) {
            return Err(FabricError::Validation(format!(
                "priority {} outside [{}, {}]",
                self.priority, PRIORITY_MIN, PRIORITY_MAX
            )));
        }
        Ok(())
    }

    /// Whether this envelope should be published as a durable message.
    /// Priorities below [`PRIORITY_DURABLE`] are transient, trading a small
    /// durability gap for throughput on background traffic.
    pub fn is_durable(&self) -> bool {
        self.priority >= PRIORITY_DURABLE
    }

    /// Deserializes the payload into a concrete type.
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> FabricResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            FabricError::Validation(format!(
                "payload does not decode as {:?}: {}",
                self.message_type, e
            ))
        })
    }
}
