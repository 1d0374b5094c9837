//! Synchronous request/reply over the in-process broker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use wastepro_core::prelude::*;

/// Replies to `topic_1` with the incoming number plus one.
struct Responder;

#[async_trait]
impl AgentBehavior for Responder {
    fn name(&self) -> &str {
        "responder"
    }

    async fn on_activate(&self, agent: &AgentHandle) -> Result<()> {
        agent.subscribe("topic_1").await
    }

    async fn on_message(
        &self,
        _agent: &AgentHandle,
        _topic: &str,
        parcel: Parcel,
    ) -> Result<Option<Parcel>> {
        let n = parcel.content().as_i64().unwrap_or(0);
        Ok(Some(Parcel::text(json!(n + 1))))
    }
}

/// Echoes whatever arrives on `echo`.
struct Echo;

#[async_trait]
impl AgentBehavior for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn on_activate(&self, agent: &AgentHandle) -> Result<()> {
        agent.subscribe("echo").await
    }

    async fn on_message(
        &self,
        _agent: &AgentHandle,
        _topic: &str,
        parcel: Parcel,
    ) -> Result<Option<Parcel>> {
        Ok(Some(Parcel::text(parcel.content().clone())))
    }
}

struct Caller;

#[async_trait]
impl AgentBehavior for Caller {
    fn name(&self) -> &str {
        "main"
    }

    async fn on_activate(&self, _agent: &AgentHandle) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn chained_request_reply() {
    let broker = LocalBroker::new();
    let responder = Agent::start(Arc::new(Responder), broker.clone())
        .await
        .unwrap();
    let caller = Agent::start(Arc::new(Caller), broker.clone()).await.unwrap();

    let timeout = Duration::from_secs(5);
    let a = caller
        .publish_sync("topic_1", json!(1), timeout)
        .await
        .unwrap();
    assert_eq!(a.content().as_i64(), Some(2));

    let b = caller
        .publish_sync("topic_1", a.content().clone(), timeout)
        .await
        .unwrap();
    assert_eq!(b.content().as_i64(), Some(3));

    let c = caller
        .publish_sync("topic_1", b.content().clone(), timeout)
        .await
        .unwrap();
    assert_eq!(c.content().as_i64(), Some(4));

    caller.terminate().await;
    responder.terminate().await;
}

#[tokio::test]
async fn echo_reply_has_equal_content_and_no_return_topic() {
    let broker = LocalBroker::new();
    let echo = Agent::start(Arc::new(Echo), broker.clone()).await.unwrap();
    let caller = Agent::start(Arc::new(Caller), broker.clone()).await.unwrap();

    let body = json!({"stem": "S", "answer": "B"});
    let reply = caller
        .publish_sync("echo", body.clone(), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(reply.content(), &body);
    assert!(reply.topic_return.is_none());

    caller.terminate().await;
    echo.terminate().await;
}

#[tokio::test]
async fn timeout_on_silent_topic_leaves_no_subscription() {
    let broker = LocalBroker::new();
    let caller = Agent::start(Arc::new(Caller), broker.clone()).await.unwrap();

    let started = Instant::now();
    let err = caller
        .publish_sync("nonexistent", json!(1), Duration::from_secs(1))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout(), "expected Timeout, got {err}");
    assert!(
        elapsed < Duration::from_millis(1500),
        "timeout took {elapsed:?}"
    );
    // The private reply topic must not linger.
    let reply_topic = format!("{}/reply-1", caller.agent_id());
    assert_eq!(broker.subscriber_count(&reply_topic), 0);

    caller.terminate().await;
}

#[tokio::test]
async fn concurrent_sync_calls_do_not_cross_replies() {
    let broker = LocalBroker::new();
    let responder = Agent::start(Arc::new(Responder), broker.clone())
        .await
        .unwrap();
    let caller = Agent::start(Arc::new(Caller), broker.clone()).await.unwrap();

    let timeout = Duration::from_secs(5);
    let mut handles = Vec::new();
    for n in 0..8i64 {
        let caller = caller.clone();
        handles.push(tokio::spawn(async move {
            let reply = caller.publish_sync("topic_1", json!(n), timeout).await?;
            Ok::<_, Error>((n, reply.content().as_i64().unwrap()))
        }));
    }
    for handle in handles {
        let (n, got) = handle.await.unwrap().unwrap();
        assert_eq!(got, n + 1);
    }

    caller.terminate().await;
    responder.terminate().await;
}

#[tokio::test]
async fn responder_failure_surfaces_as_caller_timeout() {
    struct Faulty;

    #[async_trait]
    impl AgentBehavior for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }

        async fn on_activate(&self, agent: &AgentHandle) -> Result<()> {
            agent.subscribe("faulty/in").await
        }

        async fn on_message(
            &self,
            _agent: &AgentHandle,
            _topic: &str,
            _parcel: Parcel,
        ) -> Result<Option<Parcel>> {
            Err(Error::Transport("boom".into()))
        }
    }

    let broker = LocalBroker::new();
    let faulty = Agent::start(Arc::new(Faulty), broker.clone()).await.unwrap();
    let caller = Agent::start(Arc::new(Caller), broker.clone()).await.unwrap();

    let err = caller
        .publish_sync("faulty/in", json!(1), Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    // The faulty agent is still alive and serviceable.
    assert!(faulty.is_active());

    caller.terminate().await;
    faulty.terminate().await;
}

#[tokio::test]
async fn error_reply_surfaces_as_remote_error() {
    struct Failing;

    #[async_trait]
    impl AgentBehavior for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn on_activate(&self, agent: &AgentHandle) -> Result<()> {
            agent.subscribe("failing/in").await
        }

        async fn on_message(
            &self,
            _agent: &AgentHandle,
            _topic: &str,
            _parcel: Parcel,
        ) -> Result<Option<Parcel>> {
            Ok(Some(Parcel::error("KGQueryFailed", "no such subject")))
        }
    }

    let broker = LocalBroker::new();
    let failing = Agent::start(Arc::new(Failing), broker.clone())
        .await
        .unwrap();
    let caller = Agent::start(Arc::new(Caller), broker.clone()).await.unwrap();

    let err = caller
        .publish_sync("failing/in", json!({}), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err.remote_kind(), Some("KGQueryFailed"));

    caller.terminate().await;
    failing.terminate().await;
}

#[tokio::test]
async fn process_mode_agent_serves_requests() {
    let broker = LocalBroker::new();
    let responder = Agent::start_process(Arc::new(Responder), broker.clone());

    // Give the worker thread a moment to activate.
    let caller = Agent::start(Arc::new(Caller), broker.clone()).await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !responder.is_active() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let reply = caller
        .publish_sync("topic_1", json!(41), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(reply.content().as_i64(), Some(42));

    caller.terminate().await;
    responder.terminate().await;
}
