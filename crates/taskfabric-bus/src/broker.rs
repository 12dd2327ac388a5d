use crate::topology::{Binding, ExchangeKind, ExchangeSpec, QueueSpec, Topology};
use async_trait::async_trait;
use std::collections::HashMap;
use taskfabric_core::{Envelope, FabricError, FabricResult};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One message handed to a consumer, awaiting ack or nack.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned delivery tag for ack/nack.
    pub tag: u64,
    /// The queue this message was consumed from.
    pub queue: String,
    /// The message itself.
    pub envelope: Envelope,
    /// Whether this message was requeued at least once.
    pub redelivered: bool,
    /// Whether the message was published as durable.
    pub persistent: bool,
}

/// Broker-agnostic message bus abstraction with AMQP-style semantics.
///
/// Delivery is at-least-once; priority is a best-effort ordering hint.
/// Consumers operate with prefetch = 1: [`MessageBus::consume`] hands out a
/// single in-flight message that must be acked or nacked before the next.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes an envelope directly to a queue. Messages with priority
    /// ≥ 4 are marked durable.
    async fn publish(&self, queue: &str, envelope: Envelope) -> FabricResult<()>;

    /// Publishes an envelope to an exchange with the given routing key.
    async fn publish_to_exchange(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> FabricResult<()>;

    /// Takes the highest-priority message from a queue, if any.
    async fn consume(&self, queue: &str) -> FabricResult<Option<Delivery>>;

    /// Acknowledges a delivery, removing it from the unacked set.
    async fn ack(&self, tag: u64) -> FabricResult<()>;

    /// Rejects a delivery. With `requeue` the message returns to its queue
    /// flagged as redelivered; without it the message is dead-lettered to
    /// the queue's configured DLX (or dropped if none is configured).
    async fn nack(&self, tag: u64, requeue: bool) -> FabricResult<()>;

    /// Current depth of a queue (excluding unacked in-flight messages).
    async fn queue_len(&self, queue: &str) -> FabricResult<usize>;
}

struct Queued {
    envelope: Envelope,
    seq: u64,
    persistent: bool,
    redelivered: bool,
}

struct QueueState {
    spec: QueueSpec,
    // Kept in enqueue order; seq is monotonic so index 0 is the oldest.
    messages: Vec<Queued>,
}

struct Unacked {
    queue: String,
    message: Queued,
}

struct BrokerState {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    unacked: HashMap<u64, Unacked>,
    next_tag: u64,
    next_seq: u64,
}

impl BrokerState {
    fn enqueue(&mut self, queue: &str, mut message: Queued) -> FabricResult<()> {
        let state = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| FabricError::Bus(format!("unknown queue '{queue}'")))?;
        if let Some(max) = state.spec.max_priority {
            message.envelope.priority = message.envelope.priority.min(max);
        }
        if let Some(max_length) = state.spec.max_length {
            while state.messages.len() >= max_length {
                let dropped = state.messages.remove(0);
                warn!(
                    queue,
                    message_id = %dropped.envelope.message_id,
                    "queue at max length, dropping oldest message"
                );
            }
        }
        state.messages.push(message);
        Ok(())
    }

    /// Routes one envelope through an exchange, returning the target queues.
    fn route(&self, exchange: &str, routing_key: &str) -> FabricResult<Vec<String>> {
        let spec = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| FabricError::Bus(format!("unknown exchange '{exchange}'")))?;
        let targets = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange)
            .filter(|b| match spec.kind {
                ExchangeKind::Fanout => true,
                ExchangeKind::Direct => b.routing_key == routing_key,
            })
            .map(|b| b.queue.clone())
            .collect();
        Ok(targets)
    }
}

/// In-process broker implementing the standard topology semantics.
///
/// Used by tests and single-process deployments; production deployments
/// substitute an AMQP-backed [`MessageBus`] with identical declared
/// attributes.
pub struct InMemoryBroker {
    inner: Mutex<BrokerState>,
}

impl InMemoryBroker {
    /// Creates an empty broker with no declared topology.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BrokerState {
                exchanges: HashMap::new(),
                queues: HashMap::new(),
                bindings: Vec::new(),
                unacked: HashMap::new(),
                next_tag: 0,
                next_seq: 0,
            }),
        }
    }

    /// Creates a broker with [`Topology::standard`] already declared.
    pub async fn with_standard_topology() -> Self {
        let broker = Self::new();
        broker.declare(Topology::standard()).await;
        broker
    }

    /// Declares (or re-declares) a topology. Existing queue contents are
    /// preserved; declaration is idempotent on names.
    pub async fn declare(&self, topology: Topology) {
        let mut state = self.inner.lock().await;
        for exchange in topology.exchanges {
            state.exchanges.insert(exchange.name.clone(), exchange);
        }
        for queue in topology.queues {
            state
                .queues
                .entry(queue.name.clone())
                .or_insert_with(|| QueueState {
                    spec: queue,
                    messages: Vec::new(),
                });
        }
        for binding in topology.bindings {
            state.bindings.push(binding);
        }
    }

    /// Number of in-flight (consumed but not yet acked) messages.
    pub async fn unacked_len(&self) -> usize {
        self.inner.lock().await.unacked.len()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBroker {
    async fn publish(&self, queue: &str, envelope: Envelope) -> FabricResult<()> {
        let mut state = self.inner.lock().await;
        state.next_seq += 1;
        let message = Queued {
            persistent: envelope.is_durable(),
            seq: state.next_seq,
            redelivered: false,
            envelope,
        };
        debug!(queue, seq = message.seq, "publish");
        state.enqueue(queue, message)
    }

    async fn publish_to_exchange(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> FabricResult<()> {
        let mut state = self.inner.lock().await;
        let targets = state.route(exchange, routing_key)?;
        for queue in targets {
            state.next_seq += 1;
            let message = Queued {
                persistent: envelope.is_durable(),
                seq: state.next_seq,
                redelivered: false,
                envelope: envelope.clone(),
            };
            state.enqueue(&queue, message)?;
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> FabricResult<Option<Delivery>> {
        let mut state = self.inner.lock().await;
        let queue_state = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| FabricError::Bus(format!("unknown queue '{queue}'")))?;

        // Highest priority wins; among equals the oldest (lowest index).
        let best = queue_state
            .messages
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| {
                a.envelope
                    .priority
                    .cmp(&b.envelope.priority)
                    .then(ib.cmp(ia))
            })
            .map(|(i, _)| i);
        let Some(index) = best else {
            return Ok(None);
        };
        let message = queue_state.messages.remove(index);

        state.next_tag += 1;
        let tag = state.next_tag;
        let delivery = Delivery {
            tag,
            queue: queue.to_string(),
            envelope: message.envelope.clone(),
            redelivered: message.redelivered,
            persistent: message.persistent,
        };
        state.unacked.insert(
            tag,
            Unacked {
                queue: queue.to_string(),
                message,
            },
        );
        Ok(Some(delivery))
    }

    async fn ack(&self, tag: u64) -> FabricResult<()> {
        let mut state = self.inner.lock().await;
        state
            .unacked
            .remove(&tag)
            .map(|_| ())
            .ok_or_else(|| FabricError::Bus(format!("unknown delivery tag {tag}")))
    }

    async fn nack(&self, tag: u64, requeue: bool) -> FabricResult<()> {
        let mut state = self.inner.lock().await;
        let unacked = state
            .unacked
            .remove(&tag)
            .ok_or_else(|| FabricError::Bus(format!("unknown delivery tag {tag}")))?;

        let mut message = unacked.message;
        if requeue {
            message.redelivered = true;
            state.next_seq += 1;
            message.seq = state.next_seq;
            return state.enqueue(&unacked.queue, message);
        }

        let dlx = state
            .queues
            .get(&unacked.queue)
            .and_then(|q| q.spec.dead_letter_exchange.clone());
        match dlx {
            Some(exchange) => {
                let targets = state.route(&exchange, "")?;
                debug!(
                    queue = %unacked.queue,
                    exchange = %exchange,
                    message_id = %message.envelope.message_id,
                    "dead-lettering rejected message"
                );
                for queue in targets {
                    state.next_seq += 1;
                    let copy = Queued {
                        envelope: message.envelope.clone(),
                        seq: state.next_seq,
                        persistent: message.persistent,
                        redelivered: false,
                    };
                    state.enqueue(&queue, copy)?;
                }
                Ok(())
            }
            None => {
                warn!(
                    queue = %unacked.queue,
                    message_id = %message.envelope.message_id,
                    "rejected message dropped (no dead-letter exchange)"
                );
                Ok(())
            }
        }
    }

    async fn queue_len(&self, queue: &str) -> FabricResult<usize> {
        let state = self.inner.lock().await;
        state
            .queues
            .get(queue)
            .map(|q| q.messages.len())
            .ok_or_else(|| FabricError::Bus(format!("unknown queue '{queue}'")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::topology::{BROADCAST_EXCHANGE, DLX_QUEUE, WORK_QUEUE};
    use taskfabric_core::{AgentKind, MessageType};

    fn envelope(priority: u8) -> Envelope {
        Envelope::new(
            AgentKind::Orchestrator,
            AgentKind::Infra,
            MessageType::WorkRequest,
            priority,
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn test_publish_consume_ack() {
        let broker = InMemoryBroker::with_standard_topology().await;
        broker.publish(WORK_QUEUE, envelope(3)).await.unwrap();

        let delivery = broker.consume(WORK_QUEUE).await.unwrap().unwrap();
        assert!(!delivery.redelivered);
        assert_eq!(broker.unacked_len().await, 1);

        broker.ack(delivery.tag).await.unwrap();
        assert_eq!(broker.unacked_len().await, 0);
        assert!(broker.consume(WORK_QUEUE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_priority_ordering_best_effort() {
        let broker = InMemoryBroker::with_standard_topology().await;
        broker.publish(WORK_QUEUE, envelope(1)).await.unwrap();
        broker.publish(WORK_QUEUE, envelope(5)).await.unwrap();
        broker.publish(WORK_QUEUE, envelope(3)).await.unwrap();

        let priorities: Vec<u8> = {
            let mut out = Vec::new();
            while let Some(d) = broker.consume(WORK_QUEUE).await.unwrap() {
                out.push(d.envelope.priority);
                broker.ack(d.tag).await.unwrap();
            }
            out
        };
        assert_eq!(priorities, vec![5, 3, 1]);
    }

    #[tokio::test]
    async fn test_equal_priority_is_fifo() {
        let broker = InMemoryBroker::with_standard_topology().await;
        let first = envelope(3);
        let first_id = first.message_id;
        broker.publish(WORK_QUEUE, first).await.unwrap();
        broker.publish(WORK_QUEUE, envelope(3)).await.unwrap();

        let d = broker.consume(WORK_QUEUE).await.unwrap().unwrap();
        assert_eq!(d.envelope.message_id, first_id);
    }

    #[tokio::test]
    async fn test_nack_requeue_sets_redelivered() {
        let broker = InMemoryBroker::with_standard_topology().await;
        broker.publish(WORK_QUEUE, envelope(3)).await.unwrap();

        let d = broker.consume(WORK_QUEUE).await.unwrap().unwrap();
        broker.nack(d.tag, true).await.unwrap();

        let d = broker.consume(WORK_QUEUE).await.unwrap().unwrap();
        assert!(d.redelivered);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_dead_letters() {
        let broker = InMemoryBroker::with_standard_topology().await;
        let env = envelope(3);
        let id = env.message_id;
        broker.publish(WORK_QUEUE, env).await.unwrap();

        let d = broker.consume(WORK_QUEUE).await.unwrap().unwrap();
        broker.nack(d.tag, false).await.unwrap();

        assert_eq!(broker.queue_len(WORK_QUEUE).await.unwrap(), 0);
        assert_eq!(broker.queue_len(DLX_QUEUE).await.unwrap(), 1);
        let dead = broker.consume(DLX_QUEUE).await.unwrap().unwrap();
        assert_eq!(dead.envelope.message_id, id);
    }

    #[tokio::test]
    async fn test_durability_marking() {
        let broker = InMemoryBroker::with_standard_topology().await;
        broker.publish(WORK_QUEUE, envelope(3)).await.unwrap();
        broker.publish(WORK_QUEUE, envelope(5)).await.unwrap();

        let first = broker.consume(WORK_QUEUE).await.unwrap().unwrap();
        assert_eq!(first.envelope.priority, 5);
        assert!(first.persistent);
        broker.ack(first.tag).await.unwrap();

        let second = broker.consume(WORK_QUEUE).await.unwrap().unwrap();
        assert!(!second.persistent);
    }

    #[tokio::test]
    async fn test_max_length_drops_oldest() {
        let broker = InMemoryBroker::new();
        broker
            .declare(Topology {
                exchanges: vec![],
                queues: vec![QueueSpec {
                    name: "bounded".to_string(),
                    durable: true,
                    max_priority: None,
                    max_length: Some(2),
                    dead_letter_exchange: None,
                }],
                bindings: vec![],
            })
            .await;

        let first = envelope(3);
        let first_id = first.message_id;
        broker.publish("bounded", first).await.unwrap();
        broker.publish("bounded", envelope(3)).await.unwrap();
        broker.publish("bounded", envelope(3)).await.unwrap();

        assert_eq!(broker.queue_len("bounded").await.unwrap(), 2);
        let d = broker.consume("bounded").await.unwrap().unwrap();
        assert_ne!(d.envelope.message_id, first_id);
    }

    #[tokio::test]
    async fn test_fanout_copies_to_all_bound_queues() {
        let broker = InMemoryBroker::with_standard_topology().await;
        broker
            .declare(Topology {
                exchanges: vec![],
                queues: vec![
                    QueueSpec {
                        name: "sub_a".to_string(),
                        durable: false,
                        max_priority: None,
                        max_length: None,
                        dead_letter_exchange: None,
                    },
                    QueueSpec {
                        name: "sub_b".to_string(),
                        durable: false,
                        max_priority: None,
                        max_length: None,
                        dead_letter_exchange: None,
                    },
                ],
                bindings: vec![
                    Binding {
                        exchange: BROADCAST_EXCHANGE.to_string(),
                        queue: "sub_a".to_string(),
                        routing_key: "ignored".to_string(),
                    },
                    Binding {
                        exchange: BROADCAST_EXCHANGE.to_string(),
                        queue: "sub_b".to_string(),
                        routing_key: String::new(),
                    },
                ],
            })
            .await;

        broker
            .publish_to_exchange(BROADCAST_EXCHANGE, "", envelope(2))
            .await
            .unwrap();
        assert_eq!(broker.queue_len("sub_a").await.unwrap(), 1);
        assert_eq!(broker.queue_len("sub_b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_queue_errors() {
        let broker = InMemoryBroker::new();
        assert!(broker.publish("nope", envelope(3)).await.is_err());
        assert!(broker.consume("nope").await.is_err());
        assert!(broker.queue_len("nope").await.is_err());
        assert!(broker.ack(7).await.is_err());
    }
}
