//! Bus-level tests of the question generation path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use wastepro_core::config::ScqServiceConfig;
use wastepro_core::prelude::*;
use wastepro_kg::{
    KgOrchestrator, KgService, MemoryOrchestrator, NodeKind, NodeSpec, StoreResolver, Triplet,
};
use wastepro_llm::{LlmService, MockProvider};
use wastepro_scq::{FeatureVector, SingleChoiceGenerator, ERROR_STEM, TOPIC_CREATE};

const TIMEOUT: Duration = Duration::from_secs(10);

struct Probe;

#[async_trait]
impl AgentBehavior for Probe {
    fn name(&self) -> &str {
        "probe"
    }

    async fn on_activate(&self, _agent: &AgentHandle) -> Result<()> {
        Ok(())
    }
}

/// Seed subject `K`: one concept under document `D` with three facts and
/// enough fact-to-fact relations to build text materials.
async fn seed_subject(orchestrator: &Arc<MemoryOrchestrator>) {
    let endpoints = orchestrator.create("K").await.unwrap();
    let store = orchestrator.resolve(&endpoints.bolt_url).unwrap();

    let mut triplets = vec![
        Triplet::new(
            NodeSpec::new(NodeKind::Structure, "ch1"),
            "part_of",
            NodeSpec::new(NodeKind::Document, "D"),
        ),
        Triplet::new(
            NodeSpec::new(NodeKind::Concept, "waste"),
            "include_in",
            NodeSpec::new(NodeKind::Structure, "ch1"),
        ),
    ];
    for i in 0..4 {
        triplets.push(Triplet::new(
            NodeSpec::new(NodeKind::Fact, format!("fact-{i}")),
            "is_a",
            NodeSpec::new(NodeKind::Concept, "waste"),
        ));
    }
    for i in 0..3 {
        triplets.push(Triplet::new(
            NodeSpec::new(NodeKind::Fact, format!("fact-{i}")),
            "feeds",
            NodeSpec::new(NodeKind::Fact, format!("fact-{}", i + 1)),
        ));
    }
    store.add_triplets("seed", 0, &triplets).await.unwrap();
}

fn criteria(difficulty: u32) -> Value {
    json!({
        "question_id": "Q101",
        "subject": "K",
        "document": "D",
        "section": ["ch1"],
        "difficulty": difficulty,
    })
}

async fn start_stack(
    provider: Arc<MockProvider>,
    options: ScqServiceConfig,
) -> (Arc<LocalBroker>, Vec<AgentHandle>, AgentHandle) {
    let broker = LocalBroker::new();
    let orchestrator = MemoryOrchestrator::new("localhost");
    seed_subject(&orchestrator).await;

    let kg = Agent::start(
        Arc::new(KgService::new(orchestrator.clone(), orchestrator.clone())),
        broker.clone(),
    )
    .await
    .unwrap();
    let llm = Agent::start(Arc::new(LlmService::with_provider(provider)), broker.clone())
        .await
        .unwrap();
    let generator = Agent::start(
        Arc::new(SingleChoiceGenerator::new(orchestrator, options)),
        broker.clone(),
    )
    .await
    .unwrap();
    let probe = Agent::start(Arc::new(Probe), broker.clone()).await.unwrap();
    (broker, vec![kg, llm, generator], probe)
}

#[tokio::test]
async fn happy_path_preserves_the_answer_text() {
    let provider = Arc::new(MockProvider::new().with_fallback(
        r#"{"stem": "S", "option_A": "a", "option_B": "b", "option_C": "c", "option_D": "d", "answer": "B"}"#,
    ));
    let (_broker, services, probe) = start_stack(provider, ScqServiceConfig::default()).await;

    let reply = probe
        .publish_sync(TOPIC_CREATE, criteria(50), TIMEOUT)
        .await
        .unwrap();

    let question = reply.get("question").cloned().unwrap();
    let answer = question["answer"].as_str().unwrap();
    assert!(["A", "B", "C", "D"].contains(&answer));
    // The answer letter may move, the answer text may not.
    assert_eq!(question[format!("option_{answer}")], json!("b"));

    let enriched = reply.get("question_criteria").cloned().unwrap();
    let levels = enriched["feature_levels"].as_object().unwrap();
    let vector = FeatureVector::from_map(levels).expect("seven valid grades");
    let grade = enriched["weighted_grade"].as_f64().unwrap();
    assert!((grade - vector.weighted_grade()).abs() < 1e-9);
    // Difficulty 50 targets a grade of 14 ± 1.
    assert!((13.0..=15.0).contains(&grade), "grade {grade} off target");

    for service in services {
        service.terminate().await;
    }
    probe.terminate().await;
}

#[tokio::test]
async fn unusable_model_output_yields_the_placeholder() {
    let provider = Arc::new(MockProvider::new().with_fallback("not json"));
    let (_broker, services, probe) = start_stack(provider, ScqServiceConfig::default()).await;

    let reply = probe
        .publish_sync(TOPIC_CREATE, criteria(50), TIMEOUT)
        .await
        .unwrap();

    let question = reply.get("question").cloned().unwrap();
    assert!(question["stem"].as_str().unwrap().starts_with(ERROR_STEM));
    assert_eq!(question["answer"], json!("D"));

    for service in services {
        service.terminate().await;
    }
    probe.terminate().await;
}

#[tokio::test]
async fn empty_subject_fails_with_no_concepts() {
    let provider = Arc::new(MockProvider::new());
    let (_broker, services, probe) = start_stack(provider, ScqServiceConfig::default()).await;

    let request = json!({
        "question_id": "Q102",
        "subject": "K",
        "document": "Unknown",
        "difficulty": 50,
    });
    let err = probe
        .publish_sync(TOPIC_CREATE, request, TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err.remote_kind(), Some("NoConcepts"));

    for service in services {
        service.terminate().await;
    }
    probe.terminate().await;
}

#[tokio::test]
async fn unsupported_difficulty_is_rejected() {
    let provider = Arc::new(MockProvider::new());
    let (_broker, services, probe) = start_stack(provider, ScqServiceConfig::default()).await;

    let err = probe
        .publish_sync(TOPIC_CREATE, criteria(40), TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err.remote_kind(), Some("InvalidRequest"));

    for service in services {
        service.terminate().await;
    }
    probe.terminate().await;
}

/// Stub evaluator that always measures the question far from any target.
struct FarEvaluator {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl AgentBehavior for FarEvaluator {
    fn name(&self) -> &str {
        "far-evaluator"
    }

    async fn on_activate(&self, agent: &AgentHandle) -> Result<()> {
        agent.subscribe(wastepro_scq::TOPIC_EVALUATE).await
    }

    async fn on_message(
        &self,
        _agent: &AgentHandle,
        _topic: &str,
        parcel: Parcel,
    ) -> Result<Option<Parcel>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut assessment = parcel.content().as_object().cloned().unwrap_or_default();
        // G = 3+3+4.5+3+3+3+1.2 = 20.7, distance 6.7 from target 14.
        let measured = FeatureVector([3, 3, 3, 3, 3, 3, 1]);
        assessment.insert("evaluation".into(), Value::Object(measured.to_map()));
        Ok(Some(assessment.into()))
    }
}

#[tokio::test]
async fn rejecting_evaluator_exhausts_retries_and_returns_closest() {
    let provider = Arc::new(MockProvider::new().with_fallback(
        r#"{"stem": "S", "option_A": "a", "option_B": "b", "option_C": "c", "option_D": "d", "answer": "B"}"#,
    ));
    let options = ScqServiceConfig {
        evaluation: true,
        ranker: "simple".into(),
    };
    let (broker, mut services, probe) = start_stack(provider, options).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let evaluator = Agent::start(
        Arc::new(FarEvaluator {
            calls: calls.clone(),
        }),
        broker.clone(),
    )
    .await
    .unwrap();

    let reply = probe
        .publish_sync(TOPIC_CREATE, criteria(50), TIMEOUT)
        .await
        .unwrap();

    // Every attempt measured 6.7 away, so the loop ran all three times
    // and returned a real (non-placeholder) question.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let question = reply.get("question").cloned().unwrap();
    assert_eq!(question["stem"], json!("S"));

    services.push(evaluator);
    for service in services {
        service.terminate().await;
    }
    probe.terminate().await;
}
