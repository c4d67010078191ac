//! Server setup and lifecycle management

use crate::api::{create_router, AppState};
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use skein_runtime::{ExpirationSweeper, Sweep};
use skein_store::{DocumentStore, InMemoryDocumentStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Skein daemon server
pub struct Server {
    config: DaemonConfig,
    state: AppState,
    sweeper: Arc<ExpirationSweeper>,
}

impl Server {
    /// Create a server over an in-memory store
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        Self::with_store(config, Arc::new(InMemoryDocumentStore::new()))
    }

    pub fn with_store(config: DaemonConfig, store: Arc<dyn DocumentStore>) -> DaemonResult<Self> {
        let state = AppState::new(&config, Arc::clone(&store))?;

        let query: Arc<dyn Sweep> = state.query.clone();
        let bulk: Arc<dyn Sweep> = state.bulk.clone();
        let sweeper = ExpirationSweeper::new(store, Duration::from_secs(config.sweeper.interval_secs))
            .register(query)
            .register(bulk);

        Ok(Self {
            config,
            state,
            sweeper: Arc::new(sweeper),
        })
    }

    /// Run the server
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        self.state.start().await?;

        let app = create_router(self.state.clone(), self.config.server.enable_cors);

        let listener = TcpListener::bind(addr).await?;

        tracing::info!(
            addr = %addr,
            node = %self.config.node.id,
            "Skein daemon listening"
        );

        // Start sweeper in background
        let sweeper = self.sweeper.clone();
        tokio::spawn(async move {
            sweeper.start().await;
        });

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Skein daemon shutting down");

        self.sweeper.stop().await;
        self.state.stop().await;

        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
