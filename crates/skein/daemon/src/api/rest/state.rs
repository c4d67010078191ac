//! Application state for API handlers

use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use skein_bulk::{AdapterRegistry, BulkWorkflow, ResourceKind, StoreAccountAdapter};
use skein_query::QueryWorkflow;
use skein_runtime::{NodeId, NodeSelector, RendezvousSelector, WorkflowRuntime};
use skein_store::DocumentStore;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,

    pub query: Arc<WorkflowRuntime<QueryWorkflow>>,

    pub bulk: Arc<WorkflowRuntime<BulkWorkflow>>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Build both workflow runtimes over `store`. Worker pools are not
    /// started; see [`AppState::start`].
    pub fn new(config: &DaemonConfig, store: Arc<dyn DocumentStore>) -> DaemonResult<Self> {
        config
            .runtime
            .validate()
            .map_err(|e| DaemonError::Config(e.to_string()))?;

        let node = NodeId::new(config.node.id.clone());
        let selector: Arc<dyn NodeSelector> = Arc::new(RendezvousSelector::new(
            config.cluster().into_iter().map(NodeId::new).collect(),
        )?);

        let query = QueryWorkflow::new(Arc::clone(&store))
            .with_page_sizes(config.query.default_page_size, config.query.max_page_size);
        let query = WorkflowRuntime::new(query, Arc::clone(&store), config.runtime.clone())
            .with_ownership(node.clone(), Arc::clone(&selector));

        let adapters = AdapterRegistry::new().with(
            ResourceKind::CloudAccount,
            Arc::new(StoreAccountAdapter::new(Arc::clone(&store))),
        );
        let bulk = BulkWorkflow::new(adapters)
            .with_limits(config.bulk.max_attempts, config.bulk.batch_size);
        let bulk = WorkflowRuntime::new(bulk, Arc::clone(&store), config.runtime.clone())
            .with_ownership(node, selector);

        Ok(Self {
            store,
            query: Arc::new(query),
            bulk: Arc::new(bulk),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        })
    }

    /// Start the worker pools of both runtimes
    pub async fn start(&self) -> DaemonResult<()> {
        self.query.start().await?;
        self.bulk.start().await?;
        Ok(())
    }

    pub async fn stop(&self) {
        self.query.stop().await;
        self.bulk.stop().await;
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let duration = chrono::Utc::now() - self.started_at;
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
