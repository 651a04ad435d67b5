// ===============================
// src/fabric.rs
// ===============================
//
// Messaging fabric seam:
// - MessageFabric     : broker abstraction (named durable channels)
// - InMemoryBroker    : in-process implementation over unbounded mpsc queues
// - Publisher/SubscriberConnector : glue for the connection supervisor
//
// Fabric guarantees assumed by the rest of the system: a published message
// is buffered until consumed, delivery is FIFO per channel, and there is no
// ordering across channels.
//
use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::supervisor::Connect;

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("not connected to channel '{0}'")]
    NotConnected(String),
    #[error("connect to channel '{0}' failed: {1}")]
    ConnectFailure(String, String),
    #[error("channel '{0}' closed")]
    ChannelClosed(String),
}

#[async_trait]
pub trait ChannelPublisher: Send {
    async fn publish(&mut self, payload: Vec<u8>) -> Result<(), FabricError>;
}

#[async_trait]
pub trait ChannelSubscriber: Send {
    /// Waits for the next message on the channel, in delivery order.
    async fn next(&mut self) -> Result<Vec<u8>, FabricError>;
}

#[async_trait]
pub trait MessageFabric: Send + Sync {
    async fn publisher(&self, channel: &str) -> Result<Box<dyn ChannelPublisher>, FabricError>;
    async fn subscriber(&self, channel: &str) -> Result<Box<dyn ChannelSubscriber>, FabricError>;
}

// -----------------------------------------------------------------------------
// In-memory broker
//
// Each named channel is one unbounded mpsc queue. The sender side stays parked
// in the registry so the queue never closes; the receiver side is handed to at
// most one live subscriber at a time and returned to the registry when that
// subscriber is dropped, so messages published while nobody consumes are kept.
// -----------------------------------------------------------------------------

struct Queue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    parked_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[derive(Default)]
struct BrokerInner {
    queues: Mutex<HashMap<String, Queue>>,
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self { Self::default() }

    fn declare(&self, channel: &str) {
        let mut queues = self.inner.queues.lock().expect("broker registry poisoned");
        queues.entry(channel.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            debug!(%channel, "declared durable channel");
            Queue { tx, parked_rx: Some(rx) }
        });
    }
}

#[async_trait]
impl MessageFabric for InMemoryBroker {
    async fn publisher(&self, channel: &str) -> Result<Box<dyn ChannelPublisher>, FabricError> {
        self.declare(channel);
        let queues = self.inner.queues.lock().expect("broker registry poisoned");
        let tx = queues[channel].tx.clone();
        Ok(Box::new(BrokerPublisher { channel: channel.to_string(), tx }))
    }

    async fn subscriber(&self, channel: &str) -> Result<Box<dyn ChannelSubscriber>, FabricError> {
        self.declare(channel);
        let mut queues = self.inner.queues.lock().expect("broker registry poisoned");
        let slot = queues.get_mut(channel).expect("declared above");
        let rx = slot.parked_rx.take().ok_or_else(|| {
            FabricError::ConnectFailure(channel.to_string(), "consumer already attached".into())
        })?;
        Ok(Box::new(BrokerSubscriber {
            channel: channel.to_string(),
            rx: Some(rx),
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct BrokerPublisher {
    channel: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl ChannelPublisher for BrokerPublisher {
    async fn publish(&mut self, payload: Vec<u8>) -> Result<(), FabricError> {
        self.tx
            .send(payload)
            .map_err(|_| FabricError::ChannelClosed(self.channel.clone()))
    }
}

struct BrokerSubscriber {
    channel: String,
    rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    inner: Arc<BrokerInner>,
}

#[async_trait]
impl ChannelSubscriber for BrokerSubscriber {
    async fn next(&mut self) -> Result<Vec<u8>, FabricError> {
        let rx = self
            .rx
            .as_mut()
            .ok_or_else(|| FabricError::NotConnected(self.channel.clone()))?;
        rx.recv()
            .await
            .ok_or_else(|| FabricError::ChannelClosed(self.channel.clone()))
    }
}

impl Drop for BrokerSubscriber {
    fn drop(&mut self) {
        // Park the receiver so pending messages survive this consumer.
        if let Some(rx) = self.rx.take() {
            if let Ok(mut queues) = self.inner.queues.lock() {
                if let Some(slot) = queues.get_mut(&self.channel) {
                    slot.parked_rx = Some(rx);
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Supervisor connectors (one per role)
// -----------------------------------------------------------------------------

pub struct PublisherConnector {
    fabric: Arc<dyn MessageFabric>,
    channel: String,
}

impl PublisherConnector {
    pub fn new(fabric: Arc<dyn MessageFabric>, channel: impl Into<String>) -> Self {
        Self { fabric, channel: channel.into() }
    }
}

#[async_trait]
impl Connect for PublisherConnector {
    type Handle = Box<dyn ChannelPublisher>;
    async fn connect(&mut self) -> Result<Self::Handle, FabricError> {
        self.fabric.publisher(&self.channel).await
    }
}

pub struct SubscriberConnector {
    fabric: Arc<dyn MessageFabric>,
    channel: String,
}

impl SubscriberConnector {
    pub fn new(fabric: Arc<dyn MessageFabric>, channel: impl Into<String>) -> Self {
        Self { fabric, channel: channel.into() }
    }
}

#[async_trait]
impl Connect for SubscriberConnector {
    type Handle = Box<dyn ChannelSubscriber>;
    async fn connect(&mut self) -> Result<Self::Handle, FabricError> {
        self.fabric.subscriber(&self.channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_published_before_subscribe_are_kept() {
        let broker = InMemoryBroker::new();
        let mut publisher = broker.publisher("trade.orders").await.unwrap();
        publisher.publish(b"one".to_vec()).await.unwrap();
        publisher.publish(b"two".to_vec()).await.unwrap();

        let mut sub = broker.subscriber("trade.orders").await.unwrap();
        assert_eq!(sub.next().await.unwrap(), b"one");
        assert_eq!(sub.next().await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn second_live_consumer_is_rejected() {
        let broker = InMemoryBroker::new();
        let _sub = broker.subscriber("price.updates").await.unwrap();
        let err = broker.subscriber("price.updates").await.err().unwrap();
        assert!(matches!(err, FabricError::ConnectFailure(_, _)));
    }

    #[tokio::test]
    async fn pending_messages_survive_consumer_restart() {
        let broker = InMemoryBroker::new();
        let mut publisher = broker.publisher("trade.orders").await.unwrap();

        let mut sub = broker.subscriber("trade.orders").await.unwrap();
        publisher.publish(b"a".to_vec()).await.unwrap();
        assert_eq!(sub.next().await.unwrap(), b"a");
        publisher.publish(b"b".to_vec()).await.unwrap();
        drop(sub);

        let mut sub2 = broker.subscriber("trade.orders").await.unwrap();
        assert_eq!(sub2.next().await.unwrap(), b"b");
    }

    #[tokio::test]
    async fn channels_are_independent() {
        let broker = InMemoryBroker::new();
        let mut orders = broker.publisher("trade.orders").await.unwrap();
        let mut prices = broker.publisher("price.updates").await.unwrap();
        orders.publish(b"o".to_vec()).await.unwrap();
        prices.publish(b"p".to_vec()).await.unwrap();

        let mut price_sub = broker.subscriber("price.updates").await.unwrap();
        assert_eq!(price_sub.next().await.unwrap(), b"p");
    }
}
