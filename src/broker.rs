//! Message broker contract and in-process implementation
//!
//! Workers coordinate exclusively through broker topics; there is no
//! shared in-process mutable state between handler invocations. The
//! trait keeps the semantics broker-shaped (publish, bounded-prefetch
//! consume, idempotent keyed ack, redelivery) so an external broker can
//! be dropped in behind the same seam. `MemoryBroker` wires topics with
//! tokio channels for the single-process deployment and for tests.

use crate::error::BrokerError;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

/// Topic names used by the ingestion pipeline.
pub mod topics {
    /// Newly observed node blocks (in) and confirmed blocks (out)
    pub const BLOCK: &str = "block";
    /// Per-transaction fan-out from the block worker
    pub const TXID: &str = "txid";
    /// Per-address sync targets from the coordinator
    pub const TXID_ADDRESS: &str = "txid.address";
    /// Orphan notifications from the reorg resolver
    pub const REORG_BLOCK: &str = "reorgBlock";

    /// Per-client result exchange.
    pub fn client_tx(client_id: &str) -> String {
        format!("client.{}.tx", client_id)
    }

    /// Sibling topic a contended message is republished to.
    pub fn requeue(topic: &str) -> String {
        format!("{}.requeue", topic)
    }
}

/// Observed-block notification consumed by the block worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMessage {
    pub hash: B256,
}

/// Per-transaction fan-out message consumed by the tx worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxidMessage {
    pub txid: B256,
}

/// Per-address sync target consumed by the address worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressTxMessage {
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub address: Address,
    pub txid: B256,
}

/// One delivered message.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Topic the message was consumed from
    pub topic: String,
    /// Raw payload bytes (JSON)
    pub payload: Vec<u8>,
    /// How many times this message has been redelivered
    pub redeliveries: u32,
    /// Acknowledgement key; duplicate acks of the same key are idempotent
    pub ack_key: Option<String>,
}

/// Broker seam used by all workers.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a payload to a topic.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.publish_keyed(topic, payload, None).await
    }

    /// Publish with an acknowledgement key.
    async fn publish_keyed(
        &self,
        topic: &str,
        payload: Vec<u8>,
        ack_key: Option<String>,
    ) -> Result<(), BrokerError>;

    /// Republish a delivery to its own topic with the redelivery count
    /// incremented.
    async fn redeliver(&self, delivery: Delivery) -> Result<(), BrokerError>;

    /// Consume a topic with a bounded prefetch; at most `prefetch`
    /// messages sit in the returned channel awaiting handling.
    async fn consume(
        &self,
        topic: &str,
        prefetch: usize,
    ) -> Result<mpsc::Receiver<Delivery>, BrokerError>;

    /// Acknowledge a delivery. Acking the same key twice is a no-op.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;
}

/// Serialize a message for publishing.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, BrokerError> {
    Ok(serde_json::to_vec(message)?)
}

/// Deserialize a delivered payload.
pub fn decode<T: for<'de> Deserialize<'de>>(delivery: &Delivery) -> Result<T, BrokerError> {
    Ok(serde_json::from_slice(&delivery.payload)?)
}

#[derive(Default)]
struct TopicChannel {
    queue: Mutex<VecDeque<Delivery>>,
    notify: Notify,
}

/// In-process broker backed by per-topic queues and tokio channels.
#[derive(Default)]
pub struct MemoryBroker {
    channels: Mutex<HashMap<String, Arc<TopicChannel>>>,
    acked: Mutex<HashSet<String>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, topic: &str) -> Arc<TopicChannel> {
        self.channels
            .lock()
            .expect("broker lock poisoned")
            .entry(topic.to_string())
            .or_default()
            .clone()
    }

    fn enqueue(&self, delivery: Delivery) {
        let channel = self.channel(&delivery.topic);
        channel
            .queue
            .lock()
            .expect("topic lock poisoned")
            .push_back(delivery);
        channel.notify.notify_one();
    }

    /// Number of messages waiting on a topic (for tests and metrics).
    pub fn pending(&self, topic: &str) -> usize {
        self.channel(topic).queue.lock().expect("topic lock poisoned").len()
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn publish_keyed(
        &self,
        topic: &str,
        payload: Vec<u8>,
        ack_key: Option<String>,
    ) -> Result<(), BrokerError> {
        self.enqueue(Delivery {
            topic: topic.to_string(),
            payload,
            redeliveries: 0,
            ack_key,
        });
        Ok(())
    }

    async fn redeliver(&self, mut delivery: Delivery) -> Result<(), BrokerError> {
        delivery.redeliveries += 1;
        self.enqueue(delivery);
        Ok(())
    }

    async fn consume(
        &self,
        topic: &str,
        prefetch: usize,
    ) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        let (tx, rx) = mpsc::channel(prefetch.max(1));
        let channel = self.channel(topic);
        tokio::spawn(async move {
            loop {
                let delivery = loop {
                    if let Some(d) = channel.queue.lock().expect("topic lock poisoned").pop_front()
                    {
                        break d;
                    }
                    channel.notify.notified().await;
                };
                if tx.send(delivery).await.is_err() {
                    // Consumer dropped; leave remaining messages queued.
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        if let Some(key) = &delivery.ack_key {
            self.acked.lock().expect("broker lock poisoned").insert(key.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;

    #[tokio::test]
    async fn test_publish_then_consume() {
        let broker = MemoryBroker::new();
        let message = TxidMessage {
            txid: b256!("0000000000000000000000000000000000000000000000000000000000000001"),
        };
        // Published before any consumer exists; must not be lost.
        broker
            .publish(topics::TXID, encode(&message).unwrap())
            .await
            .unwrap();

        let mut rx = broker.consume(topics::TXID, 4).await.unwrap();
        let delivery = rx.recv().await.unwrap();
        let decoded: TxidMessage = decode(&delivery).unwrap();
        assert_eq!(decoded.txid, message.txid);
        assert_eq!(delivery.redeliveries, 0);
    }

    #[tokio::test]
    async fn test_redeliver_increments_count() {
        let broker = MemoryBroker::new();
        broker.publish(topics::TXID, b"{}".to_vec()).await.unwrap();

        let mut rx = broker.consume(topics::TXID, 1).await.unwrap();
        let first = rx.recv().await.unwrap();
        broker.redeliver(first).await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.redeliveries, 1);
    }

    #[tokio::test]
    async fn test_duplicate_keyed_ack_is_idempotent() {
        let broker = MemoryBroker::new();
        broker
            .publish_keyed(topics::TXID, b"{}".to_vec(), Some("tx-1".to_string()))
            .await
            .unwrap();
        let mut rx = broker.consume(topics::TXID, 1).await.unwrap();
        let delivery = rx.recv().await.unwrap();
        broker.ack(&delivery).await.unwrap();
        broker.ack(&delivery).await.unwrap();
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(topics::client_tx("acme"), "client.acme.tx");
        assert_eq!(topics::requeue(topics::TXID), "txid.requeue");
    }
}
