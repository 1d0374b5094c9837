//! KG instance lifecycle seams.
//!
//! Per-subject graph instances are spun up lazily by an external
//! orchestrator; this module specifies only the operations the core
//! consumes, plus an in-process implementation backed by [`MemoryGraph`]
//! instances.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::memory::MemoryGraph;
use crate::registry::PageRegistry;
use crate::store::{GraphStore, KgError, KgResult};

/// Access URLs of one running KG instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KgEndpoints {
    pub http_url: String,
    pub bolt_url: String,
}

#[derive(Debug, Clone)]
pub struct RunningKg {
    pub name: String,
    pub endpoints: KgEndpoints,
}

/// Operations of the external instance orchestrator.
#[async_trait]
pub trait KgOrchestrator: Send + Sync {
    /// Ensure the named instance is running and return its endpoints.
    async fn open(&self, name: &str) -> KgResult<KgEndpoints>;

    /// Ensure the named instance exists and return its endpoints.
    async fn create(&self, name: &str) -> KgResult<KgEndpoints>;

    async fn list_running(&self) -> KgResult<Vec<RunningKg>>;

    async fn stop(&self, name: &str) -> KgResult<()>;
}

/// Maps a bolt URL back to a live store handle.
pub trait StoreResolver: Send + Sync {
    fn resolve(&self, bolt_url: &str) -> KgResult<Arc<dyn GraphStore>>;
}

struct Instance {
    endpoints: KgEndpoints,
    store: Arc<MemoryGraph>,
}

/// In-process orchestrator over [`MemoryGraph`] instances.
///
/// Endpoints follow the conventional graph-database port layout so that
/// callers treat them exactly like externally orchestrated instances.
pub struct MemoryOrchestrator {
    hostname: String,
    registry: Arc<PageRegistry>,
    instances: Mutex<HashMap<String, Instance>>,
    next_offset: AtomicU16,
}

impl MemoryOrchestrator {
    pub fn new(hostname: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            hostname: hostname.into(),
            registry: Arc::new(PageRegistry::new()),
            instances: Mutex::new(HashMap::new()),
            next_offset: AtomicU16::new(0),
        })
    }

    fn ensure(&self, name: &str) -> KgEndpoints {
        let mut instances = self.instances.lock().expect("orchestrator poisoned");
        if let Some(instance) = instances.get(name) {
            return instance.endpoints.clone();
        }
        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);
        let endpoints = KgEndpoints {
            http_url: format!("http://{}:{}", self.hostname, 7474 + offset),
            bolt_url: format!("bolt://{}:{}", self.hostname, 7687 + offset),
        };
        instances.insert(
            name.to_string(),
            Instance {
                endpoints: endpoints.clone(),
                store: Arc::new(MemoryGraph::new(name, self.registry.clone())),
            },
        );
        endpoints
    }
}

#[async_trait]
impl KgOrchestrator for MemoryOrchestrator {
    async fn open(&self, name: &str) -> KgResult<KgEndpoints> {
        Ok(self.ensure(name))
    }

    async fn create(&self, name: &str) -> KgResult<KgEndpoints> {
        Ok(self.ensure(name))
    }

    async fn list_running(&self) -> KgResult<Vec<RunningKg>> {
        let instances = self.instances.lock().expect("orchestrator poisoned");
        Ok(instances
            .iter()
            .map(|(name, instance)| RunningKg {
                name: name.clone(),
                endpoints: instance.endpoints.clone(),
            })
            .collect())
    }

    async fn stop(&self, name: &str) -> KgResult<()> {
        let mut instances = self.instances.lock().expect("orchestrator poisoned");
        instances
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| KgError::UnknownSubject(name.to_string()))
    }
}

impl StoreResolver for MemoryOrchestrator {
    fn resolve(&self, bolt_url: &str) -> KgResult<Arc<dyn GraphStore>> {
        let instances = self.instances.lock().expect("orchestrator poisoned");
        instances
            .values()
            .find(|instance| instance.endpoints.bolt_url == bolt_url)
            .map(|instance| instance.store.clone() as Arc<dyn GraphStore>)
            .ok_or_else(|| KgError::InstanceUnavailable(bolt_url.to_string()))
    }
}
