//! Broker abstraction and the in-process implementation.
//!
//! The broker is the only queue in the system: subscribers own bounded
//! channels and publishers await channel capacity, so producers that outrun
//! consumers observe publish latency rather than unbounded buffering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Identifies one subscriber on one topic.
pub type SubscriberId = u64;

/// A live subscription: the id to unsubscribe with and the delivery channel.
pub struct TopicSubscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<Vec<u8>>,
}

/// Topic-addressed pub/sub transport.
///
/// Implementations must be internally thread-safe: one broker handle is
/// shared by every agent in the process.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Deliver `payload` to every current subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Register a new subscriber on `topic`.
    async fn subscribe(&self, topic: &str) -> Result<TopicSubscription>;

    /// Remove a subscriber from `topic`.
    async fn unsubscribe(&self, topic: &str, id: SubscriberId) -> Result<()>;
}

type SubscriberList = Vec<(SubscriberId, mpsc::Sender<Vec<u8>>)>;

/// In-process broker: a topic table of bounded fan-out channels.
///
/// Thread-mode and process-mode agents share one instance behind an `Arc`,
/// which is what makes the two start modes equivalent for correctness.
pub struct LocalBroker {
    topics: DashMap<String, SubscriberList>,
    next_id: AtomicU64,
    capacity: usize,
}

impl LocalBroker {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(64)
    }

    /// `capacity` bounds each subscriber's channel.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            topics: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity,
        })
    }

    /// Number of live subscribers on a topic. Used by tests to assert that
    /// reply topics do not leak.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|list| list.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        // Snapshot the senders so no map guard is held across an await.
        let senders: SubscriberList = match self.topics.get(topic) {
            Some(list) => list.value().clone(),
            None => return Ok(()),
        };

        let mut closed = Vec::new();
        for (id, sender) in &senders {
            if sender.send(payload.clone()).await.is_err() {
                closed.push(*id);
            }
        }
        if !closed.is_empty() {
            if let Some(mut list) = self.topics.get_mut(topic) {
                list.retain(|(id, _)| !closed.contains(id));
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<TopicSubscription> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.topics
            .entry(topic.to_string())
            .or_default()
            .push((id, tx));
        Ok(TopicSubscription { id, receiver: rx })
    }

    async fn unsubscribe(&self, topic: &str, id: SubscriberId) -> Result<()> {
        match self.topics.get_mut(topic) {
            Some(mut list) => {
                list.retain(|(sub_id, _)| *sub_id != id);
                Ok(())
            }
            None => Err(Error::Transport(format!("unknown topic: {topic}"))),
        }
    }
}
