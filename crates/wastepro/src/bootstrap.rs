//! Service wiring.
//!
//! Front-ends are external collaborators; this module is the library-level
//! launcher they call: given a configuration, a broker, and the external
//! seams, start every service agent on the bus and hand back the handles.

use std::sync::Arc;

use wastepro_core::{Agent, AgentHandle, Broker, Config, Result};
use wastepro_kg::{KgOrchestrator, KgService, MemoryOrchestrator, StoreResolver};
use wastepro_llm::{LlmProvider, LlmService};
use wastepro_retrieval::{FileService, PageExtractor, PdfRetriever, TextPages};
use wastepro_scq::{ScqEvaluator, SingleChoiceGenerator};

/// External seams consumed by the services.
pub struct Collaborators {
    pub pages: Arc<dyn PageExtractor>,
    pub orchestrator: Arc<dyn KgOrchestrator>,
    pub resolver: Arc<dyn StoreResolver>,
    /// Overrides the provider selected by `[service.llm]` when set.
    pub llm_provider: Option<Arc<dyn LlmProvider>>,
}

impl Collaborators {
    /// Fully in-process collaborators: memory-backed KG instances and
    /// plain-text page extraction.
    pub fn in_memory(hostname: &str) -> Self {
        let orchestrator = MemoryOrchestrator::new(hostname);
        Self {
            pages: Arc::new(TextPages),
            orchestrator: orchestrator.clone(),
            resolver: orchestrator,
            llm_provider: None,
        }
    }

    pub fn with_pages(mut self, pages: Arc<dyn PageExtractor>) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_llm_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.llm_provider = Some(provider);
        self
    }
}

/// Handles of the running service agents.
pub struct ServiceStack {
    pub file: AgentHandle,
    pub llm: AgentHandle,
    pub kg: AgentHandle,
    pub retriever: AgentHandle,
    pub generator: AgentHandle,
    pub evaluator: AgentHandle,
}

impl ServiceStack {
    pub async fn terminate_all(&self) {
        for handle in [
            &self.retriever,
            &self.generator,
            &self.evaluator,
            &self.kg,
            &self.llm,
            &self.file,
        ] {
            handle.terminate().await;
        }
    }
}

/// Start every service agent on the given broker.
pub async fn start_services(
    config: &Config,
    broker: Arc<dyn Broker>,
    collaborators: Collaborators,
) -> Result<ServiceStack> {
    wastepro_core::logging::init(&config.logging);

    let llm = match collaborators.llm_provider {
        Some(provider) => LlmService::with_provider(provider),
        None => LlmService::new(config.service.llm.clone()),
    };

    let file = Agent::start(
        Arc::new(FileService::new(config.service.file.home_directory.clone())),
        broker.clone(),
    )
    .await?;
    let llm = Agent::start(Arc::new(llm), broker.clone()).await?;
    let kg = Agent::start(
        Arc::new(KgService::new(
            collaborators.orchestrator,
            collaborators.resolver.clone(),
        )),
        broker.clone(),
    )
    .await?;
    let retriever = Agent::start(
        Arc::new(PdfRetriever::new(collaborators.pages)),
        broker.clone(),
    )
    .await?;
    let generator = Agent::start(
        Arc::new(SingleChoiceGenerator::new(
            collaborators.resolver,
            config.service.scq.clone(),
        )),
        broker.clone(),
    )
    .await?;
    let evaluator = Agent::start(Arc::new(ScqEvaluator::new()), broker).await?;

    Ok(ServiceStack {
        file,
        llm,
        kg,
        retriever,
        generator,
        evaluator,
    })
}
