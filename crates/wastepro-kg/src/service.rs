//! The KG service agent.
//!
//! Owns per-subject graph instances behind the orchestrator seam and
//! exposes the triplet-merge and structural-query topics. Each subject's
//! triplet-add topic is serviced by this one agent, which is what
//! serializes the mutation path per subject.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use wastepro_core::{AgentBehavior, AgentHandle, Parcel, Result};

use crate::orchestrator::{KgOrchestrator, StoreResolver};
use crate::store::{KgError, Triplet};

pub const TOPIC_CREATE: &str = "Create/KGService/Services";
pub const TOPIC_ACCESS_POINT: &str = "AccessPoint/KGService/Services";
pub const TOPIC_CONCEPTS_QUERY: &str = "ConceptsQuery/KGService/Services";
pub const TOPIC_SECTIONS_QUERY: &str = "SectionsQuery/KGService/Services";

/// Suffix of the per-subject triplet-add topic.
pub const TOPIC_TRIPLETS_ADD: &str = "AddTriplets/KGService/Services";

/// The per-subject triplet-add topic.
pub fn triplets_topic(subject: &str) -> String {
    format!("{subject}/{TOPIC_TRIPLETS_ADD}")
}

pub struct KgService {
    orchestrator: Arc<dyn KgOrchestrator>,
    resolver: Arc<dyn StoreResolver>,
}

impl KgService {
    pub fn new(
        orchestrator: Arc<dyn KgOrchestrator>,
        resolver: Arc<dyn StoreResolver>,
    ) -> Self {
        Self {
            orchestrator,
            resolver,
        }
    }

    fn error_parcel(error: &KgError) -> Parcel {
        let kind = match error {
            KgError::QueryFailed(_) => "KGQueryFailed",
            KgError::UnknownSubject(_) => "UnknownSubject",
            KgError::InstanceUnavailable(_) => "InstanceUnavailable",
            KgError::InvalidTriplet(_) => "InvalidTriplet",
        };
        Parcel::error(kind, error.to_string())
    }

    fn str_field<'a>(content: &'a Value, key: &str) -> std::result::Result<&'a str, Parcel> {
        content
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Parcel::error("InvalidRequest", format!("missing field '{key}'")))
    }

    fn section_field(content: &Value) -> Option<Vec<String>> {
        content.get("section").and_then(|value| match value {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            ),
            Value::String(name) => Some(vec![name.clone()]),
            _ => None,
        })
    }

    async fn handle_create(&self, agent: &AgentHandle, parcel: &Parcel) -> Result<Option<Parcel>> {
        let kg_name = match Self::str_field(parcel.content(), "kg_name") {
            Ok(name) => name.to_string(),
            Err(reply) => return Ok(Some(reply)),
        };
        match self.orchestrator.create(&kg_name).await {
            Ok(endpoints) => {
                let topic = triplets_topic(&kg_name);
                agent.subscribe(&topic).await?;
                info!(subject = %kg_name, topic, "subject graph ready");
                Ok(Some(
                    json!({
                        "http_url": endpoints.http_url,
                        "bolt_url": endpoints.bolt_url,
                        "topic_triplets_add": topic,
                    })
                    .into(),
                ))
            }
            Err(e) => Ok(Some(Self::error_parcel(&e))),
        }
    }

    async fn handle_access_point(&self, parcel: &Parcel) -> Result<Option<Parcel>> {
        let kg_name = match Self::str_field(parcel.content(), "kg_name") {
            Ok(name) => name.to_string(),
            Err(reply) => return Ok(Some(reply)),
        };
        match self.orchestrator.open(&kg_name).await {
            Ok(endpoints) => Ok(Some(
                json!({
                    "http_url": endpoints.http_url,
                    "bolt_url": endpoints.bolt_url,
                })
                .into(),
            )),
            Err(e) => Ok(Some(Self::error_parcel(&e))),
        }
    }

    async fn handle_triplets_add(&self, subject: &str, parcel: &Parcel) -> Result<Option<Parcel>> {
        let content = parcel.content();
        let file_id = match Self::str_field(content, "file_id") {
            Ok(id) => id.to_string(),
            Err(reply) => return Ok(Some(reply)),
        };
        let page_number = content
            .get("page_number")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        let triplets: Vec<Triplet> = match content.get("triplets") {
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(triplets) => triplets,
                Err(e) => {
                    warn!(subject, error = %e, "rejecting malformed triplets");
                    return Ok(Some(Parcel::error(
                        "InvalidTriplet",
                        format!("malformed triplets: {e}"),
                    )));
                }
            },
            None => Vec::new(),
        };
        debug!(subject, file_id, page_number, count = triplets.len(), "merging triplets");

        let outcome = async {
            let endpoints = self.orchestrator.open(subject).await?;
            let store = self.resolver.resolve(&endpoints.bolt_url)?;
            store.add_triplets(&file_id, page_number, &triplets).await
        }
        .await;

        match outcome {
            Ok(()) => Ok(None),
            Err(e) => {
                warn!(subject, error = %e, "triplet merge failed");
                Ok(Some(Self::error_parcel(&e)))
            }
        }
    }

    async fn handle_concepts_query(&self, parcel: &Parcel) -> Result<Option<Parcel>> {
        let content = parcel.content();
        let kg_name = match Self::str_field(content, "kg_name") {
            Ok(name) => name.to_string(),
            Err(reply) => return Ok(Some(reply)),
        };
        let document = match Self::str_field(content, "document") {
            Ok(name) => name.to_string(),
            Err(reply) => return Ok(Some(reply)),
        };
        let section = Self::section_field(content);

        let outcome = async {
            let endpoints = self.orchestrator.open(&kg_name).await?;
            let store = self.resolver.resolve(&endpoints.bolt_url)?;
            store.query_concepts(&document, section.as_deref()).await
        }
        .await;

        match outcome {
            Ok(concepts) => Ok(Some(json!({ "concepts": concepts }).into())),
            Err(e) => Ok(Some(Self::error_parcel(&e))),
        }
    }

    async fn handle_sections_query(&self, parcel: &Parcel) -> Result<Option<Parcel>> {
        let content = parcel.content();
        let kg_name = match Self::str_field(content, "kg_name") {
            Ok(name) => name.to_string(),
            Err(reply) => return Ok(Some(reply)),
        };
        let document = match Self::str_field(content, "document") {
            Ok(name) => name.to_string(),
            Err(reply) => return Ok(Some(reply)),
        };
        let section = Self::section_field(content);

        let outcome = async {
            let endpoints = self.orchestrator.open(&kg_name).await?;
            let store = self.resolver.resolve(&endpoints.bolt_url)?;
            store.query_subsections(&document, section.as_deref()).await
        }
        .await;

        match outcome {
            Ok(sections) => Ok(Some(json!({ "sections": sections }).into())),
            Err(e) => Ok(Some(Self::error_parcel(&e))),
        }
    }
}

#[async_trait]
impl AgentBehavior for KgService {
    fn name(&self) -> &str {
        "kg_service.services.wastepro"
    }

    async fn on_activate(&self, agent: &AgentHandle) -> Result<()> {
        agent.subscribe(TOPIC_CREATE).await?;
        agent.subscribe(TOPIC_ACCESS_POINT).await?;
        agent.subscribe(TOPIC_CONCEPTS_QUERY).await?;
        agent.subscribe(TOPIC_SECTIONS_QUERY).await?;

        // Pre-subscribe the add topic of every subject that is already
        // running.
        match self.orchestrator.list_running().await {
            Ok(running) => {
                for kg in running {
                    agent.subscribe(&triplets_topic(&kg.name)).await?;
                }
            }
            Err(e) => warn!(error = %e, "could not enumerate running subjects"),
        }
        Ok(())
    }

    async fn on_message(
        &self,
        agent: &AgentHandle,
        topic: &str,
        parcel: Parcel,
    ) -> Result<Option<Parcel>> {
        if let Some(subject) = topic
            .strip_suffix(TOPIC_TRIPLETS_ADD)
            .and_then(|prefix| prefix.strip_suffix('/'))
        {
            return self.handle_triplets_add(subject, &parcel).await;
        }
        match topic {
            TOPIC_CREATE => self.handle_create(agent, &parcel).await,
            TOPIC_ACCESS_POINT => self.handle_access_point(&parcel).await,
            TOPIC_CONCEPTS_QUERY => self.handle_concepts_query(&parcel).await,
            TOPIC_SECTIONS_QUERY => self.handle_sections_query(&parcel).await,
            other => {
                warn!(topic = other, "unexpected topic");
                Ok(None)
            }
        }
    }
}
