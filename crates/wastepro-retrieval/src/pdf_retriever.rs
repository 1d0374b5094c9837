//! The document ingest agent.
//!
//! Receives a file-upload parcel, persists the bytes through the file
//! service, ensures the subject's KG instance, and walks the document page
//! by page: locate the matching section paths in the table of contents,
//! extract triplets, and publish them to the subject's triplet-add topic.
//! A completion parcel is emitted on `Retrieved/Pdf/Retrieval` regardless
//! of per-page failures.

use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use wastepro_core::{AgentBehavior, AgentHandle, Parcel, Result};
use wastepro_llm::{ChatClient, LlmGateway};

use crate::error::{RetrievalError, RetrievalResult};
use crate::extractor::FactConceptExtractor;
use crate::file_service;
use crate::pages::PageExtractor;

pub const TOPIC_FILE_UPLOAD: &str = "FileUpload/Pdf/Retrieval";
pub const TOPIC_RETRIEVED: &str = "Retrieved/Pdf/Retrieval";

/// Deadline for the synchronous hops inside the ingest path.
const SYNC_TIMEOUT: Duration = Duration::from_secs(20);

/// Attempts per page before it is skipped.
const PAGE_RETRIES: usize = 3;

/// One table-of-contents entry: `(title, start_page, end_page, children)`.
/// Serializes as an array, which is the shape callers put on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TocNode(pub String, pub usize, pub usize, pub Vec<TocNode>);

/// All section paths covering `page_number`, via recursive descent through
/// the TOC. Pages no entry claims fall back to a single `Root` path.
pub fn locate_sections(page_number: usize, toc: &[TocNode]) -> Vec<Vec<String>> {
    fn walk(
        page_number: usize,
        toc: &[TocNode],
        parent: &[String],
        matches: &mut Vec<Vec<String>>,
    ) {
        for TocNode(name, start, end, children) in toc {
            if *start <= page_number && page_number <= *end {
                let mut path = parent.to_vec();
                path.push(name.clone());
                matches.push(path.clone());
                walk(page_number, children, &path, matches);
            }
        }
    }

    let mut matches = Vec::new();
    walk(page_number, toc, &[], &mut matches);
    if matches.is_empty() {
        matches.push(vec!["Root".to_string()]);
    }
    matches
}

pub struct PdfRetriever {
    pages: Arc<dyn PageExtractor>,
    chat: OnceLock<Arc<dyn ChatClient>>,
}

impl PdfRetriever {
    pub fn new(pages: Arc<dyn PageExtractor>) -> Self {
        Self {
            pages,
            chat: OnceLock::new(),
        }
    }

    /// Use an explicit chat seam instead of the bus gateway.
    pub fn with_chat(pages: Arc<dyn PageExtractor>, chat: Arc<dyn ChatClient>) -> Self {
        let retriever = Self::new(pages);
        let _ = retriever.chat.set(chat);
        retriever
    }

    async fn ingest(&self, agent: &AgentHandle, parcel: Parcel) -> RetrievalResult<Map<String, Value>> {
        // 1. Persist the bytes.
        let file_reply = agent
            .publish_sync(file_service::TOPIC_FILE_UPLOAD, parcel, SYNC_TIMEOUT)
            .await?;
        let file_info = match file_reply.content() {
            Value::Object(map) => map.clone(),
            _ => return Err(RetrievalError::MissingField("file_info".into())),
        };
        let file_id = str_field(&file_info, "file_id")?;
        let file_path = str_field(&file_info, "file_path")?;
        let filename = str_field(&file_info, "filename")?;
        let kg_name = str_field(&file_info, "kg_name")?;
        debug!(file_id, filename, kg_name, "file persisted");

        // 2. Ensure the subject's graph and its add topic.
        let kg_reply = agent
            .publish_sync(
                wastepro_kg::TOPIC_CREATE,
                serde_json::json!({ "kg_name": kg_name }),
                SYNC_TIMEOUT,
            )
            .await?;
        let topic_add = kg_reply
            .get("topic_triplets_add")
            .and_then(Value::as_str)
            .ok_or_else(|| RetrievalError::MissingField("topic_triplets_add".into()))?
            .to_string();

        // 3. Page texts.
        let pages = self.pages.extract_pages(Path::new(&file_path)).await?;

        // 4. Top-level TOC: the document spans every page, caller TOC
        // nested underneath.
        let meta = file_info.get("meta").cloned();
        let title = meta
            .as_ref()
            .and_then(|m| m.get("title"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                Path::new(&filename)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| filename.to_string())
            });
        let caller_toc: Vec<TocNode> = file_info
            .get("toc")
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(|e| RetrievalError::MissingField(format!("toc: {e}")))?
            .unwrap_or_default();
        let toc = vec![TocNode(title, 0, pages.len(), caller_toc)];

        let chat = self
            .chat
            .get()
            .expect("chat seam installed at activation")
            .clone();
        let extractor = FactConceptExtractor::new(chat);

        // 5. Page loop. Retries are immediate; a page that keeps failing
        // is skipped and logged.
        for (page_number, page_text) in pages.iter().enumerate() {
            let sections = locate_sections(page_number, &toc);
            let deepest = sections.last().cloned().unwrap_or_default();

            let mut extracted = None;
            for attempt in 1..=PAGE_RETRIES {
                match extractor.extract(page_text, &deepest, meta.clone()).await {
                    Ok(triplets) => {
                        extracted = Some(triplets);
                        break;
                    }
                    Err(e) => {
                        warn!(page_number, attempt, error = %e, "page extraction attempt failed")
                    }
                }
            }
            let triplets = match extracted {
                Some(triplets) => triplets,
                None => {
                    warn!(page_number, "page skipped after {PAGE_RETRIES} attempts");
                    continue;
                }
            };

            agent
                .publish(
                    &topic_add,
                    serde_json::json!({
                        "source_type": "pdf",
                        "file_id": file_id,
                        "page_number": page_number,
                        "triplets": triplets,
                    }),
                )
                .await?;
        }

        info!(file_id, pages = pages.len(), "document ingested");
        Ok(file_info)
    }
}

fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> RetrievalResult<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| RetrievalError::MissingField(key.to_string()))
}

#[async_trait]
impl AgentBehavior for PdfRetriever {
    fn name(&self) -> &str {
        "pdf.retrieval.wastepro"
    }

    async fn on_activate(&self, agent: &AgentHandle) -> Result<()> {
        if self.chat.get().is_none() {
            let _ = self
                .chat
                .set(Arc::new(LlmGateway::new(agent.clone())));
        }
        agent.subscribe(TOPIC_FILE_UPLOAD).await
    }

    async fn on_message(
        &self,
        agent: &AgentHandle,
        _topic: &str,
        parcel: Parcel,
    ) -> Result<Option<Parcel>> {
        // A completion parcel goes out regardless: a failed ingest leaves
        // pages missing from the graph, not consumers hanging.
        let completion = match self.ingest(agent, parcel).await {
            Ok(file_info) => Parcel::from(file_info),
            Err(e) => {
                warn!(error = %e, "ingest failed");
                Parcel::error("PageExtractionFailed", e.to_string())
            }
        };
        agent.publish(TOPIC_RETRIEVED, completion).await?;
        Ok(None)
    }
}
