//! Periodic expiration sweep
//!
//! Each tick first fails expired `Started` instances of every registered
//! runtime, then removes expired documents and page snapshots from the
//! store.

use crate::runtime::WorkflowRuntime;
use crate::workflow::Workflow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use skein_store::DocumentStore;
use skein_types::SkeinResult;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};

/// Something that expires on a schedule
#[async_trait]
pub trait Sweep: Send + Sync {
    fn name(&self) -> &str;

    /// Expire everything due at `now`, returning how many were expired
    async fn sweep(&self, now: DateTime<Utc>) -> SkeinResult<usize>;
}

#[async_trait]
impl<W: Workflow> Sweep for WorkflowRuntime<W> {
    fn name(&self) -> &str {
        <W::Kind as skein_types::WorkflowKind>::KIND
    }

    async fn sweep(&self, now: DateTime<Utc>) -> SkeinResult<usize> {
        self.expire_started(now).await
    }
}

/// Counts from one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub instances_expired: usize,
    pub documents_removed: usize,
}

/// Runs registered sweeps and the store's TTL sweep on an interval
pub struct ExpirationSweeper {
    store: Arc<dyn DocumentStore>,
    sweeps: Vec<Arc<dyn Sweep>>,
    interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl ExpirationSweeper {
    pub fn new(store: Arc<dyn DocumentStore>, interval: Duration) -> Self {
        Self {
            store,
            sweeps: Vec::new(),
            interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn register(mut self, sweep: Arc<dyn Sweep>) -> Self {
        self.sweeps.push(sweep);
        self
    }

    /// Run every sweep once
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SkeinResult<SweepReport> {
        let mut report = SweepReport::default();
        for sweep in &self.sweeps {
            let expired = sweep.sweep(now).await?;
            if expired > 0 {
                tracing::info!(sweep = sweep.name(), expired, "Expired instances");
            }
            report.instances_expired += expired;
        }
        report.documents_removed = self.store.sweep_expired(now).await?;
        Ok(report)
    }

    /// Sweep on every tick until stopped
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        tracing::info!(interval_secs = self.interval.as_secs(), "Expiration sweeper started");

        let mut ticker = interval(self.interval);
        loop {
            ticker.tick().await;

            let running = self.running.read().await;
            if !*running {
                break;
            }
            drop(running);

            if let Err(e) = self.sweep_once(Utc::now()).await {
                tracing::error!(error = %e, "Expiration sweep failed");
            }
        }

        tracing::info!("Expiration sweeper stopped");
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }
}
