//! Agent lifecycle and bus wiring.
//!
//! An agent is a long-lived actor with one identity, one inbox per
//! subscription, and a set of handlers. Components implement
//! [`AgentBehavior`] and register subscriptions in `on_activate`; the
//! runtime owns delivery order (FIFO within a topic, concurrent across
//! topics) and the synchronous request/reply built on top of pub/sub.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::{Broker, SubscriberId};
use crate::error::{Error, Result};
use crate::parcel::{ContentKind, Parcel};

static AGENT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Lifecycle states, in order. Messages are only delivered while `Active`;
/// publishing is refused from `Terminating` on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AgentState {
    Created,
    Activating,
    Active,
    Terminating,
    Terminated,
}

/// Lifecycle hooks and the default message sink of an agent.
///
/// `on_activate` runs before the agent is connected: register subscriptions
/// there. `on_connected` runs once the broker link is established, just
/// before the state flips to `Active`.
#[async_trait]
pub trait AgentBehavior: Send + Sync + 'static {
    /// Short name; the runtime appends a monotonic counter to form the
    /// agent id.
    fn name(&self) -> &str;

    async fn on_activate(&self, agent: &AgentHandle) -> Result<()>;

    async fn on_connected(&self, _agent: &AgentHandle) -> Result<()> {
        Ok(())
    }

    /// Default handler for subscriptions registered without an explicit
    /// topic handler. A non-`None` result is published to the incoming
    /// parcel's `topic_return`.
    async fn on_message(
        &self,
        _agent: &AgentHandle,
        _topic: &str,
        _parcel: Parcel,
    ) -> Result<Option<Parcel>> {
        Ok(None)
    }

    async fn on_terminated(&self) {}
}

/// A per-topic handler. Duplicates for the same topic replace the prior
/// handler.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle(
        &self,
        agent: &AgentHandle,
        topic: &str,
        parcel: Parcel,
    ) -> Result<Option<Parcel>>;
}

/// Adapts an async closure into a [`TopicHandler`].
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F, Fut> TopicHandler for HandlerFn<F>
where
    F: Fn(AgentHandle, String, Parcel) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Option<Parcel>>> + Send,
{
    async fn handle(
        &self,
        agent: &AgentHandle,
        topic: &str,
        parcel: Parcel,
    ) -> Result<Option<Parcel>> {
        (self.0)(agent.clone(), topic.to_string(), parcel).await
    }
}

/// Routes deliveries to the behavior's `on_message`.
struct DefaultHandler;

#[async_trait]
impl TopicHandler for DefaultHandler {
    async fn handle(
        &self,
        agent: &AgentHandle,
        topic: &str,
        parcel: Parcel,
    ) -> Result<Option<Parcel>> {
        let behavior = agent.inner.behavior.clone();
        behavior.on_message(agent, topic, parcel).await
    }
}

struct SubEntry {
    broker_id: SubscriberId,
    task: JoinHandle<()>,
}

struct AgentInner {
    agent_id: String,
    broker: Arc<dyn Broker>,
    behavior: Arc<dyn AgentBehavior>,
    state_tx: watch::Sender<AgentState>,
    subs: Mutex<HashMap<String, SubEntry>>,
    reply_seq: AtomicU64,
}

/// Cheap-to-clone handle on a running agent.
#[derive(Clone)]
pub struct AgentHandle {
    inner: Arc<AgentInner>,
}

/// Builds and starts agents on a shared broker.
pub struct Agent;

impl Agent {
    fn build(behavior: Arc<dyn AgentBehavior>, broker: Arc<dyn Broker>) -> AgentHandle {
        let agent_id = format!(
            "{}-{}",
            behavior.name(),
            AGENT_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let (state_tx, _) = watch::channel(AgentState::Created);
        AgentHandle {
            inner: Arc::new(AgentInner {
                agent_id,
                broker,
                behavior,
                state_tx,
                subs: Mutex::new(HashMap::new()),
                reply_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Start an agent on the caller's runtime and wait for it to activate.
    pub async fn start(
        behavior: Arc<dyn AgentBehavior>,
        broker: Arc<dyn Broker>,
    ) -> Result<AgentHandle> {
        let handle = Self::build(behavior, broker);
        handle.activate().await?;
        Ok(handle)
    }

    /// Start an agent on the caller's runtime without waiting for
    /// activation to finish.
    pub fn start_thread(behavior: Arc<dyn AgentBehavior>, broker: Arc<dyn Broker>) -> AgentHandle {
        let handle = Self::build(behavior, broker);
        let activating = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = activating.activate().await {
                warn!(agent = %activating.agent_id(), error = %e, "activation failed");
            }
        });
        handle
    }

    /// Start an agent on a dedicated OS thread with its own runtime, bound
    /// to the same broker. Equivalent to thread mode for correctness; only
    /// the resource footprint differs.
    pub fn start_process(behavior: Arc<dyn AgentBehavior>, broker: Arc<dyn Broker>) -> AgentHandle {
        let handle = Self::build(behavior, broker);
        let worker = handle.clone();
        std::thread::Builder::new()
            .name(worker.agent_id().to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        warn!(error = %e, "failed to build worker runtime");
                        return;
                    }
                };
                runtime.block_on(async move {
                    if let Err(e) = worker.activate().await {
                        warn!(agent = %worker.agent_id(), error = %e, "activation failed");
                        return;
                    }
                    let mut state = worker.inner.state_tx.subscribe();
                    let _ = state.wait_for(|s| *s == AgentState::Terminated).await;
                });
            })
            .expect("failed to spawn agent worker thread");
        handle
    }
}

impl AgentHandle {
    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    pub fn state(&self) -> AgentState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == AgentState::Active
    }

    async fn activate(&self) -> Result<()> {
        self.inner.state_tx.send_replace(AgentState::Activating);
        self.inner.behavior.on_activate(self).await?;
        self.inner.behavior.on_connected(self).await?;
        self.inner.state_tx.send_replace(AgentState::Active);
        debug!(agent = %self.agent_id(), "active");
        Ok(())
    }

    /// Subscribe a topic, routing deliveries to the behavior's
    /// `on_message`. Idempotent: a repeated subscribe replaces the prior
    /// handler.
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        self.subscribe_handler(topic, Arc::new(DefaultHandler), ContentKind::Any)
            .await
    }

    /// Subscribe a topic with a dedicated handler.
    pub async fn subscribe_with(&self, topic: &str, handler: Arc<dyn TopicHandler>) -> Result<()> {
        self.subscribe_handler(topic, handler, ContentKind::Any).await
    }

    /// Subscribe a topic with a dedicated handler and an expected content
    /// kind; mismatched parcels are dropped with a warning.
    pub async fn subscribe_expecting(
        &self,
        topic: &str,
        handler: Arc<dyn TopicHandler>,
        kind: ContentKind,
    ) -> Result<()> {
        self.subscribe_handler(topic, handler, kind).await
    }

    async fn subscribe_handler(
        &self,
        topic: &str,
        handler: Arc<dyn TopicHandler>,
        kind: ContentKind,
    ) -> Result<()> {
        let subscription = self.inner.broker.subscribe(topic).await?;
        let mut subs = self.inner.subs.lock().await;
        if let Some(prev) = subs.remove(topic) {
            self.inner.broker.unsubscribe(topic, prev.broker_id).await.ok();
            prev.task.abort();
        }
        let task = tokio::spawn(dispatch_loop(
            self.clone(),
            topic.to_string(),
            handler,
            kind,
            subscription.receiver,
        ));
        subs.insert(
            topic.to_string(),
            SubEntry {
                broker_id: subscription.id,
                task,
            },
        );
        Ok(())
    }

    /// Drop the subscription on `topic`.
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let entry = self.inner.subs.lock().await.remove(topic);
        if let Some(entry) = entry {
            self.inner.broker.unsubscribe(topic, entry.broker_id).await.ok();
            entry.task.abort();
        }
        Ok(())
    }

    /// Fire-and-forget publish. Values are auto-wrapped into text parcels.
    pub async fn publish(&self, topic: &str, parcel: impl Into<Parcel>) -> Result<()> {
        if self.state() >= AgentState::Terminating {
            return Err(Error::Terminated);
        }
        let mut parcel = parcel.into();
        if parcel.agent_id.is_none() {
            parcel.agent_id = Some(self.inner.agent_id.clone());
        }
        self.inner.broker.publish(topic, parcel.to_bytes()?).await
    }

    /// Synchronous request/reply on top of pub/sub.
    ///
    /// Allocates a private reply topic, subscribes it, stamps the parcel's
    /// `topic_return`, publishes, and blocks until one reply arrives or the
    /// deadline elapses. The reply topic is unsubscribed on success and on
    /// timeout. A reply carrying an error descriptor is surfaced as
    /// [`Error::Remote`]. Safe to call concurrently from multiple handlers
    /// of the same agent.
    pub async fn publish_sync(
        &self,
        topic: &str,
        parcel: impl Into<Parcel>,
        timeout: Duration,
    ) -> Result<Parcel> {
        if self.state() >= AgentState::Terminating {
            return Err(Error::Terminated);
        }
        let reply_topic = format!(
            "{}/reply-{}",
            self.inner.agent_id,
            self.inner.reply_seq.fetch_add(1, Ordering::Relaxed)
        );
        let mut subscription = self.inner.broker.subscribe(&reply_topic).await?;

        let mut parcel = parcel.into();
        parcel.topic_return = Some(reply_topic.clone());
        parcel.agent_id = Some(self.inner.agent_id.clone());

        let exchange = async {
            self.inner
                .broker
                .publish(topic, parcel.to_bytes()?)
                .await?;
            match subscription.receiver.recv().await {
                Some(bytes) => Parcel::from_bytes(&bytes),
                None => Err(Error::Transport("reply channel closed".into())),
            }
        };

        let outcome = tokio::time::timeout(timeout, exchange).await;
        self.inner
            .broker
            .unsubscribe(&reply_topic, subscription.id)
            .await
            .ok();

        match outcome {
            Ok(reply) => reply?.into_result(),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    /// Unsubscribe every topic, stop dispatching, and run `on_terminated`.
    pub async fn terminate(&self) {
        if self.state() >= AgentState::Terminating {
            return;
        }
        self.inner.state_tx.send_replace(AgentState::Terminating);

        let entries: Vec<(String, SubEntry)> =
            self.inner.subs.lock().await.drain().collect();
        for (topic, entry) in &entries {
            self.inner
                .broker
                .unsubscribe(topic, entry.broker_id)
                .await
                .ok();
        }

        self.inner.behavior.on_terminated().await;
        self.inner.state_tx.send_replace(AgentState::Terminated);
        info!(agent = %self.agent_id(), "terminated");

        // Abort last: terminate may run inside one of these tasks, and
        // cancellation only lands at the next await point.
        for (_, entry) in entries {
            entry.task.abort();
        }
    }
}

async fn dispatch_loop(
    agent: AgentHandle,
    topic: String,
    handler: Arc<dyn TopicHandler>,
    kind: ContentKind,
    mut receiver: mpsc::Receiver<Vec<u8>>,
) {
    // No delivery before the agent is active.
    let mut state = agent.inner.state_tx.subscribe();
    if state
        .wait_for(|s| *s >= AgentState::Active)
        .await
        .is_err()
    {
        return;
    }

    while let Some(bytes) = receiver.recv().await {
        if agent.state() >= AgentState::Terminating {
            break;
        }
        let parcel = match Parcel::from_bytes(&bytes) {
            Ok(parcel) => parcel,
            Err(e) => {
                warn!(topic, error = %e, "dropping undecodable parcel");
                continue;
            }
        };
        if !kind.matches(&parcel.body) {
            warn!(topic, "dropping parcel of unexpected content kind");
            continue;
        }

        let topic_return = parcel
            .topic_return
            .clone()
            .filter(|t| !t.is_empty());

        match handler.handle(&agent, &topic, parcel).await {
            Ok(Some(mut reply)) => {
                if let Some(reply_topic) = topic_return {
                    reply.topic_return = None;
                    if let Err(e) = agent.publish(&reply_topic, reply).await {
                        warn!(topic, error = %e, "failed to publish reply");
                    }
                }
            }
            Ok(None) => {}
            // Handler failures never kill the agent; a waiting sync caller
            // observes its own timeout.
            Err(e) => warn!(topic, agent = %agent.agent_id(), error = %e, "handler failed"),
        }
    }
}
