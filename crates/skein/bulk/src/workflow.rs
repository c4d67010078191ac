//! The bulk import workflow
//!
//! ```text
//! CreateItems ──(worklist empty)──► TriggerSideEffects ──(queue empty)──► Completed
//!   ▲      │                          ▲        │
//!   └──────┘ one item per step        └────────┘ one batch per step
//! ```

use crate::adapter::{AdapterError, AdapterRegistry, ResourceSpec};
use crate::worklist::{
    BulkReport, BulkWork, SideEffectOutcome, WorklistItem, MAX_ATTEMPTS, MAX_ATTEMPTS_REASON,
    SIDE_EFFECT_BATCH_SIZE,
};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use skein_runtime::Workflow;
use skein_types::{SelfUpdate, SkeinError, SkeinResult, WorkflowInstance, WorkflowKind};
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct BulkKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkStage {
    CreateItems,
    TriggerSideEffects,
    Completed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulkInput {
    pub worklist: Vec<ResourceSpec>,
}

impl WorkflowKind for BulkKind {
    const KIND: &'static str = "bulk-import";
    type SubStage = BulkStage;
    type Input = BulkInput;
    type Work = BulkWork;
    type Output = BulkReport;
}

type Instance = WorkflowInstance<BulkKind>;
type Update = SelfUpdate<BulkKind>;

/// Creates every worklist resource with bounded per-item retries, then
/// triggers their side effects in fixed-size concurrent batches
pub struct BulkWorkflow {
    adapters: AdapterRegistry,
    max_attempts: u32,
    batch_size: usize,
}

impl BulkWorkflow {
    pub fn new(adapters: AdapterRegistry) -> Self {
        Self {
            adapters,
            max_attempts: MAX_ATTEMPTS,
            batch_size: SIDE_EFFECT_BATCH_SIZE,
        }
    }

    pub fn with_limits(mut self, max_attempts: u32, batch_size: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.batch_size = batch_size.max(1);
        self
    }

    async fn create(&self, item: &WorklistItem) -> Result<skein_types::Link, AdapterError> {
        self.adapters
            .get(item.spec.kind)?
            .create_resource(&item.spec)
            .await
    }

    async fn create_next(&self, instance: &Instance) -> SkeinResult<Update> {
        let mut work = instance.work.clone();
        let Some(mut item) = work.worklist.pop_front() else {
            info!(
                instance_id = %instance.id,
                successes = work.successes.len(),
                failures = work.failures.len(),
                "Worklist drained"
            );
            return Ok(Update::proceed(BulkStage::TriggerSideEffects, work));
        };

        item.attempts_made += 1;
        match self.create(&item).await {
            Ok(link) => {
                debug!(instance_id = %instance.id, item = item.id(), link = %link, "Resource created");
                work.record_success(&item, link);
            }
            Err(e) if item.attempts_made >= self.max_attempts => {
                warn!(
                    instance_id = %instance.id,
                    item = item.id(),
                    attempts = item.attempts_made,
                    error = %e,
                    "Giving up on item"
                );
                work.record_failure(&item, MAX_ATTEMPTS_REASON);
            }
            Err(e) if e.is_retryable() => {
                debug!(
                    instance_id = %instance.id,
                    item = item.id(),
                    attempts = item.attempts_made,
                    error = %e,
                    "Requeueing item"
                );
                work.worklist.push_back(item);
            }
            Err(e) => {
                warn!(instance_id = %instance.id, item = item.id(), error = %e, "Item rejected");
                work.record_failure(&item, e.reason());
            }
        }
        Ok(Update::proceed(BulkStage::CreateItems, work))
    }

    async fn trigger_batch(&self, instance: &Instance) -> SkeinResult<Update> {
        let mut work = instance.work.clone();
        let batch = work.next_batch(self.batch_size);
        if batch.is_empty() {
            return Ok(Update::proceed(BulkStage::Completed, work));
        }

        let outcomes = join_all(batch.iter().map(|record| async move {
            match self.adapters.get(record.kind) {
                Ok(adapter) => adapter.trigger_side_effect(record.kind, &record.link).await,
                Err(e) => Err(e),
            }
        }))
        .await;

        let mut failed = 0;
        for (record, outcome) in batch.iter().zip(outcomes) {
            let side_effect = match outcome {
                Ok(()) => SideEffectOutcome::triggered(),
                Err(e) => {
                    failed += 1;
                    warn!(instance_id = %instance.id, item = %record.id, error = %e, "Side effect failed");
                    SideEffectOutcome::failed(e.reason())
                }
            };
            if let Some(success) = work.successes.get_mut(&record.id) {
                success.side_effect = side_effect;
            }
        }
        info!(
            instance_id = %instance.id,
            batch = batch.len(),
            failed,
            remaining = work.side_effect_queue.len(),
            "Side-effect batch completed"
        );
        Ok(Update::proceed(BulkStage::TriggerSideEffects, work))
    }

    fn complete(&self, instance: &Instance) -> SkeinResult<Update> {
        let report = instance.work.report();
        info!(
            instance_id = %instance.id,
            successes = report.successes.len(),
            failures = report.failures.len(),
            "Bulk import completed"
        );
        Ok(Update::finish(report))
    }
}

#[async_trait]
impl Workflow for BulkWorkflow {
    type Kind = BulkKind;

    fn entry_sub_stage(&self) -> BulkStage {
        BulkStage::CreateItems
    }

    fn validate(&self, input: &BulkInput) -> SkeinResult<()> {
        let mut seen = HashSet::new();
        for spec in &input.worklist {
            if spec.name.trim().is_empty() {
                return Err(SkeinError::Validation("worklist item without a name".into()));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(SkeinError::Validation(format!(
                    "duplicate worklist item {}",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    fn initial_work(&self, input: &BulkInput) -> BulkWork {
        BulkWork::new(input.worklist.iter().cloned())
    }

    async fn handle_sub_stage(&self, instance: &Instance) -> SkeinResult<Update> {
        match instance.sub_stage {
            Some(BulkStage::CreateItems) | None => self.create_next(instance).await,
            Some(BulkStage::TriggerSideEffects) => self.trigger_batch(instance).await,
            Some(BulkStage::Completed) => self.complete(instance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{ResourceAdapter, ResourceKind};
    use crate::worklist::SideEffectStatus;
    use skein_runtime::{RuntimeConfig, WorkflowRuntime};
    use skein_store::InMemoryDocumentStore;
    use skein_types::{Link, TaskStage};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Copy)]
    enum Script {
        AlwaysRetryable,
        Terminal,
        FailTimes(u32),
    }

    #[derive(Default)]
    struct ScriptedAdapter {
        scripts: HashMap<String, Script>,
        failing_side_effects: HashSet<String>,
        attempts: Mutex<HashMap<String, u32>>,
        order: Mutex<Vec<String>>,
        side_effects: Mutex<Vec<Link>>,
    }

    impl ScriptedAdapter {
        fn script(mut self, name: &str, script: Script) -> Self {
            self.scripts.insert(name.into(), script);
            self
        }

        fn attempts(&self, name: &str) -> u32 {
            self.attempts.lock().unwrap().get(name).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ResourceAdapter for ScriptedAdapter {
        async fn create_resource(&self, spec: &ResourceSpec) -> Result<Link, AdapterError> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let n = attempts.entry(spec.name.clone()).or_insert(0);
                *n += 1;
                *n
            };
            self.order.lock().unwrap().push(spec.name.clone());
            match self.scripts.get(&spec.name) {
                Some(Script::AlwaysRetryable) => Err(AdapterError::Retryable("endpoint unavailable".into())),
                Some(Script::Terminal) => Err(AdapterError::Terminal("quota permanently exceeded".into())),
                Some(Script::FailTimes(n)) if attempt <= *n => Err(AdapterError::Retryable("timeout".into())),
                _ => Ok(Link::new(format!("/accounts/{}", spec.name))),
            }
        }

        async fn trigger_side_effect(&self, _kind: ResourceKind, link: &Link) -> Result<(), AdapterError> {
            if self.failing_side_effects.contains(link.id()) {
                return Err(AdapterError::Retryable("enumeration service down".into()));
            }
            self.side_effects.lock().unwrap().push(link.clone());
            Ok(())
        }
    }

    fn runtime(adapter: Arc<ScriptedAdapter>, batch_size: usize) -> WorkflowRuntime<BulkWorkflow> {
        let registry = AdapterRegistry::new().with(ResourceKind::CloudAccount, adapter);
        let workflow = BulkWorkflow::new(registry).with_limits(MAX_ATTEMPTS, batch_size);
        WorkflowRuntime::new(workflow, Arc::new(InMemoryDocumentStore::new()), RuntimeConfig::default())
    }

    fn input(names: &[&str]) -> BulkInput {
        BulkInput {
            worklist: names
                .iter()
                .map(|n| ResourceSpec::cloud_account(*n, "aws", "acme"))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_retry_cap_is_exact() {
        let adapter = Arc::new(ScriptedAdapter::default().script("flaky", Script::AlwaysRetryable));
        let rt = runtime(adapter.clone(), 100);
        let instance = rt.submit_and_wait(input(&["ok", "flaky"])).await.unwrap();

        assert_eq!(instance.stage, TaskStage::Finished);
        let report = instance.result.unwrap();
        assert_eq!(adapter.attempts("flaky"), MAX_ATTEMPTS);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].reason, MAX_ATTEMPTS_REASON);
        assert_eq!(report.failures[0].attempts, MAX_ATTEMPTS);
        assert_eq!(report.successes.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_error_recorded_on_first_attempt() {
        let adapter = Arc::new(ScriptedAdapter::default().script("dup", Script::Terminal));
        let rt = runtime(adapter.clone(), 100);
        let report = rt
            .submit_and_wait(input(&["a", "dup", "b"]))
            .await
            .unwrap()
            .result
            .unwrap();

        assert_eq!(adapter.attempts("dup"), 1);
        assert_eq!(report.failures[0].id, "dup");
        assert_eq!(report.failures[0].reason, "quota permanently exceeded");
        let ids: Vec<_> = report.successes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_retryable_items_requeue_at_tail() {
        let adapter = Arc::new(ScriptedAdapter::default().script("f", Script::FailTimes(1)));
        let rt = runtime(adapter.clone(), 100);
        let report = rt
            .submit_and_wait(input(&["f", "a", "b"]))
            .await
            .unwrap()
            .result
            .unwrap();

        assert_eq!(*adapter.order.lock().unwrap(), vec!["f", "a", "b", "f"]);
        assert!(report.failures.is_empty());
        let f = report.successes.iter().find(|s| s.id == "f").unwrap();
        assert_eq!(f.attempts, 2);
    }

    #[tokio::test]
    async fn test_side_effects_run_in_batches() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let rt = runtime(adapter.clone(), 2);
        let instance = rt
            .submit_and_wait(input(&["i1", "i2", "i3", "i4", "i5"]))
            .await
            .unwrap();

        assert_eq!(adapter.side_effects.lock().unwrap().len(), 5);
        let batch_steps = instance
            .transitions
            .iter()
            .filter(|t| t.sub_stage.as_deref() == Some("TriggerSideEffects"))
            .count();
        // entering the stage, then one step per batch of two
        assert_eq!(batch_steps, 1 + 3);
        let report = instance.result.unwrap();
        assert!(report
            .successes
            .iter()
            .all(|s| s.side_effect.status == SideEffectStatus::Triggered));
    }

    #[tokio::test]
    async fn test_side_effect_failure_keeps_success() {
        let adapter = Arc::new(ScriptedAdapter {
            failing_side_effects: HashSet::from(["b".to_string()]),
            ..ScriptedAdapter::default()
        });
        let rt = runtime(adapter, 100);
        let report = rt
            .submit_and_wait(input(&["a", "b"]))
            .await
            .unwrap()
            .result
            .unwrap();

        assert_eq!(report.successes.len(), 2);
        let b = &report.successes[1];
        assert_eq!(b.side_effect.status, SideEffectStatus::Failed);
        assert_eq!(b.side_effect.reason.as_deref(), Some("enumeration service down"));
    }

    #[tokio::test]
    async fn test_missing_adapter_fails_item_only() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let rt = runtime(adapter, 100);
        let mut request = input(&["a"]);
        request.worklist.push(ResourceSpec::new(ResourceKind::Disk, "disk-1"));

        let report = rt.submit_and_wait(request).await.unwrap().result.unwrap();
        assert_eq!(report.successes.len(), 1);
        assert_eq!(report.failures[0].id, "disk-1");
        assert_eq!(report.failures[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_empty_worklist_completes() {
        let rt = runtime(Arc::new(ScriptedAdapter::default()), 100);
        let report = rt.submit_and_wait(input(&[])).await.unwrap().result.unwrap();
        assert_eq!(report, BulkReport::default());
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let rt = runtime(Arc::new(ScriptedAdapter::default()), 100);
        let err = rt.submit(input(&["a", "a"])).await.unwrap_err();
        assert!(matches!(err, SkeinError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancel_stops_remaining_items() {
        let adapter = Arc::new(ScriptedAdapter::default());
        let rt = runtime(adapter.clone(), 100);
        let id = rt.submit(input(&["a", "b", "c"])).await.unwrap();
        rt.step(&id).await.unwrap();
        rt.cancel(&id, "operator stop").await.unwrap();

        let instance = rt.run_until_terminal(&id).await.unwrap();
        assert_eq!(instance.stage, TaskStage::Cancelled);
        assert_eq!(adapter.order.lock().unwrap().len(), 1);
        assert_eq!(instance.work.worklist.len(), 2);
    }
}
