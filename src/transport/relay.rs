//! Broker-relayed channels.
//!
//! Devices that are not reachable on the local network are addressed
//! through a publish/subscribe broker:
//!
//! | Topic           | Direction        |
//! |-----------------|------------------|
//! | `rv/d/i/{duid}` | client → device  |
//! | `rv/d/o/{duid}` | device → client  |
//!
//! The broker itself sits behind the [`Broker`] trait. [`MemoryBroker`] is
//! an in-process implementation used for bridging and simulation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::{BoxFuture, Channel, Connector, TransportKind};
use crate::error::{Result, RobovacError};
use crate::model::DeviceId;

const SUBSCRIPTION_QUEUE: usize = 256;

/// Topic the device listens on
pub fn device_inbound_topic(duid: &DeviceId) -> String {
    format!("rv/d/i/{duid}")
}

/// Topic the device publishes on
pub fn device_outbound_topic(duid: &DeviceId) -> String {
    format!("rv/d/o/{duid}")
}

/// Publish/subscribe message broker
pub trait Broker: Send + Sync {
    /// Publish a message. Messages to topics without subscribers are dropped.
    fn publish<'a>(&'a self, topic: &'a str, payload: Bytes) -> BoxFuture<'a, Result<()>>;

    /// Subscribe to a topic. The subscription ends when the receiver is dropped.
    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<mpsc::Receiver<Bytes>>>;
}

/// In-process broker
#[derive(Debug)]
pub struct MemoryBroker {
    topics: DashMap<String, Vec<mpsc::Sender<Bytes>>>,
    online: AtomicBool,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Empty broker, online
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            online: AtomicBool::new(true),
        }
    }

    /// Take the broker offline (`false`) or back online (`true`)
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if !online {
            // Ends every subscription, like a dropped broker connection
            self.topics.clear();
        }
    }

    /// Live subscriptions on a topic
    pub fn subscribers(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn check_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RobovacError::Connection("Broker offline".to_string()))
        }
    }
}

impl Broker for MemoryBroker {
    fn publish<'a>(&'a self, topic: &'a str, payload: Bytes) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_online()?;
            let subscribers = self
                .topics
                .get(topic)
                .map(|subs| subs.value().clone())
                .unwrap_or_default();

            let mut any_closed = false;
            for tx in &subscribers {
                if tx.send(payload.clone()).await.is_err() {
                    any_closed = true;
                }
            }
            if any_closed {
                if let Some(mut subs) = self.topics.get_mut(topic) {
                    subs.retain(|tx| !tx.is_closed());
                }
            }
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<mpsc::Receiver<Bytes>>> {
        Box::pin(async move {
            self.check_online()?;
            let (tx, rx) = mpsc::channel(SUBSCRIPTION_QUEUE);
            self.topics.entry(topic.to_string()).or_default().push(tx);
            Ok(rx)
        })
    }
}

/// Opens relayed channels to one device
#[derive(Clone)]
pub struct RelayConnector {
    broker: Arc<dyn Broker>,
    duid: DeviceId,
}

impl RelayConnector {
    /// Connector for a device on a broker
    pub fn new(broker: Arc<dyn Broker>, duid: DeviceId) -> Self {
        Self { broker, duid }
    }

    /// The device's end of the relay: subscribed to the inbound topic,
    /// publishing on the outbound one.
    pub async fn device_endpoint(broker: Arc<dyn Broker>, duid: &DeviceId) -> Result<RelayChannel> {
        let rx = broker.subscribe(&device_inbound_topic(duid)).await?;
        Ok(RelayChannel {
            broker,
            publish_topic: device_outbound_topic(duid),
            rx,
            closed: false,
        })
    }
}

impl std::fmt::Debug for RelayConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnector")
            .field("duid", &self.duid)
            .finish_non_exhaustive()
    }
}

impl Connector for RelayConnector {
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn Channel>>> {
        Box::pin(async move {
            let rx = self
                .broker
                .subscribe(&device_outbound_topic(&self.duid))
                .await?;
            Ok(Box::new(RelayChannel {
                broker: Arc::clone(&self.broker),
                publish_topic: device_inbound_topic(&self.duid),
                rx,
                closed: false,
            }) as Box<dyn Channel>)
        })
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Relayed
    }

    fn describe(&self) -> String {
        format!("relay://{}", device_inbound_topic(&self.duid))
    }
}

/// Channel over a pair of broker topics
pub struct RelayChannel {
    broker: Arc<dyn Broker>,
    publish_topic: String,
    rx: mpsc::Receiver<Bytes>,
    closed: bool,
}

impl std::fmt::Debug for RelayChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayChannel")
            .field("publish_topic", &self.publish_topic)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Channel for RelayChannel {
    fn send(&mut self, bytes: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.closed {
                return Err(RobovacError::Connection("Channel closed".to_string()));
            }
            self.broker.publish(&self.publish_topic, bytes).await
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<Result<Bytes>>> {
        // mpsc::Receiver::recv is cancel-safe
        Box::pin(async move { self.rx.recv().await.map(Ok) })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.closed = true;
            self.rx.close();
        })
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Relayed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        let duid = DeviceId::from("abc");
        assert_eq!(device_inbound_topic(&duid), "rv/d/i/abc");
        assert_eq!(device_outbound_topic(&duid), "rv/d/o/abc");
    }

    #[tokio::test]
    async fn test_relay_roundtrip() {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let duid = DeviceId::from("abc");
        let mut device = RelayConnector::device_endpoint(Arc::clone(&broker), &duid)
            .await
            .unwrap();
        let connector = RelayConnector::new(Arc::clone(&broker), duid);
        let mut client = connector.open().await.unwrap();
        assert_eq!(client.kind(), TransportKind::Relayed);

        client.send(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(&device.recv().await.unwrap().unwrap()[..], b"hello");

        device.send(Bytes::from_static(b"ack")).await.unwrap();
        assert_eq!(&client.recv().await.unwrap().unwrap()[..], b"ack");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let broker = MemoryBroker::new();
        broker
            .publish("rv/d/i/nobody", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(broker.subscribers("rv/d/i/nobody"), 0);
    }

    #[tokio::test]
    async fn test_offline_broker() {
        let broker = Arc::new(MemoryBroker::new());
        let connector = RelayConnector::new(broker.clone(), DeviceId::from("abc"));
        let mut client = connector.open().await.unwrap();

        broker.set_online(false);
        // Existing subscriptions end
        assert!(client.recv().await.is_none());
        assert!(matches!(
            connector.open().await,
            Err(RobovacError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_subscription_pruned() {
        let broker = Arc::new(MemoryBroker::new());
        let connector = RelayConnector::new(broker.clone(), DeviceId::from("abc"));
        let mut client = connector.open().await.unwrap();
        assert_eq!(broker.subscribers("rv/d/o/abc"), 1);

        client.close().await;
        client.close().await;
        broker
            .publish("rv/d/o/abc", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(broker.subscribers("rv/d/o/abc"), 0);
    }
}
