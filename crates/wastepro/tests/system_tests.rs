//! Whole-system smoke: ingest a document, then generate a question from
//! it, with every service running on one in-process broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map};
use tokio::sync::mpsc;

use wastepro::prelude::*;
use wastepro_core::Config;
use wastepro_llm::MockProvider;
use wastepro_retrieval::{FixedPages, TOPIC_PDF_FILE_UPLOAD, TOPIC_RETRIEVED};
use wastepro_scq::TOPIC_CREATE;

struct Probe {
    retrieved: mpsc::UnboundedSender<Parcel>,
}

#[async_trait]
impl AgentBehavior for Probe {
    fn name(&self) -> &str {
        "probe"
    }

    async fn on_activate(&self, agent: &AgentHandle) -> Result<()> {
        agent.subscribe(TOPIC_RETRIEVED).await
    }

    async fn on_message(
        &self,
        _agent: &AgentHandle,
        _topic: &str,
        parcel: Parcel,
    ) -> Result<Option<Parcel>> {
        let _ = self.retrieved.send(parcel);
        Ok(None)
    }
}

/// Scripted model: one page of extraction steps, then question
/// generations on demand.
fn scripted_provider() -> Arc<MockProvider> {
    let provider = Arc::new(MockProvider::new().with_fallback(
        r#"{"stem": "What is bottom ash reuse?", "option_A": "a", "option_B": "b", "option_C": "c", "option_D": "d", "answer": "A"}"#,
    ));
    provider.push_response("bottom ash, reuse rate, landfill");
    provider
        .push_response(r#"{"residue": ["bottom ash"], "metrics": ["reuse rate"], "facilities": ["landfill"]}"#);
    provider.push_response(
        r#"[["bottom ash", "reused as", "reuse rate"], ["bottom ash", "diverted from", "landfill"]]"#,
    );
    provider.push_response(r#"{"bottom ash": ["incineration bottom ash"]}"#);
    provider
}

#[tokio::test]
async fn ingest_then_generate() {
    let storage = tempfile::tempdir().unwrap();
    let config = Config::parse(&format!(
        r#"
[service.file]
home_directory = "{}"
"#,
        storage.path().display()
    ))
    .unwrap();

    let broker = LocalBroker::new();
    let collaborators = Collaborators::in_memory("localhost")
        .with_pages(Arc::new(FixedPages(vec![
            "Bottom ash is reused at an 89% rate instead of entering landfills.".to_string(),
        ])))
        .with_llm_provider(scripted_provider());
    let services = start_services(&config, broker.clone(), collaborators)
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let probe = Agent::start(Arc::new(Probe { retrieved: tx }), broker.clone())
        .await
        .unwrap();

    // Ingest.
    let mut sidecar = Map::new();
    sidecar.insert("filename".into(), json!("wastepro02.pdf"));
    sidecar.insert("kg_name".into(), json!("Wastepro02"));
    sidecar.insert("meta".into(), json!({"title": "Wastepro02"}));
    probe
        .publish(
            TOPIC_PDF_FILE_UPLOAD,
            Parcel::binary(b"%PDF-1.4 demo".to_vec(), sidecar),
        )
        .await
        .unwrap();

    let completion = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("ingest did not complete")
        .expect("probe channel closed");
    assert!(completion.error.is_none());

    // Generate, polling until the fire-and-forget merge has landed.
    let request = json!({
        "question_id": "Q1",
        "subject": "Wastepro02",
        "document": "Wastepro02",
        "difficulty": 50,
    });
    let mut reply = None;
    for _ in 0..50 {
        match probe
            .publish_sync(TOPIC_CREATE, request.clone(), Duration::from_secs(10))
            .await
        {
            Ok(parcel) => {
                reply = Some(parcel);
                break;
            }
            Err(e) if e.remote_kind() == Some("NoConcepts") => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => panic!("generation failed: {e}"),
        }
    }
    let reply = reply.expect("generation never succeeded");

    let question = reply.get("question").cloned().unwrap();
    let answer = question["answer"].as_str().unwrap();
    assert!(["A", "B", "C", "D"].contains(&answer));
    assert_eq!(question[format!("option_{answer}")], json!("a"));

    let enriched = reply.get("question_criteria").cloned().unwrap();
    assert_eq!(enriched["subject"], json!("Wastepro02"));
    assert!(enriched["weighted_grade"].as_f64().is_some());

    probe.terminate().await;
    services.terminate_all().await;
}
