//! The workflow runtime: submission, the self-driving step loop and the
//! partitioned worker pool

use crate::config::RuntimeConfig;
use crate::events::InstanceEvent;
use crate::ownership::{partition, NodeId, NodeSelector, RendezvousSelector};
use crate::transition;
use crate::workflow::{InputOf, Workflow};
use chrono::{DateTime, Utc};
use skein_store::{DocumentStore, QuerySpec};
use skein_types::{
    QueryTree, SelfUpdate, SkeinError, SkeinResult, TaskFailure, TaskStage, UpdateOutcome,
    WorkflowInstance, WorkflowInstanceId, WorkflowKind,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Attempts at generating an instance key owned by the local node
const MAX_KEY_ATTEMPTS: usize = 1024;

/// What one step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The handler's update was committed; carries the new stage
    Advanced(TaskStage),
    /// The update was a duplicate of one already applied
    Replayed,
    /// The instance halted while the handler ran; its result was dropped
    Discarded,
    /// Nothing to do: the instance is not `Started`
    Idle(TaskStage),
    /// Another step of the same instance is in flight
    Busy,
}

/// Drives instances of one workflow type
pub struct WorkflowRuntime<W: Workflow> {
    workflow: Arc<W>,
    store: Arc<dyn DocumentStore>,
    config: RuntimeConfig,
    node: NodeId,
    selector: Arc<dyn NodeSelector>,
    events: broadcast::Sender<InstanceEvent>,
    in_flight: Arc<Mutex<HashSet<WorkflowInstanceId>>>,
    workers: RwLock<Vec<mpsc::UnboundedSender<WorkflowInstanceId>>>,
}

impl<W: Workflow> WorkflowRuntime<W> {
    /// Create a single-node runtime
    pub fn new(workflow: W, store: Arc<dyn DocumentStore>, config: RuntimeConfig) -> Self {
        let node = NodeId::default();
        let (events, _) = broadcast::channel(256);
        Self {
            workflow: Arc::new(workflow),
            store,
            config,
            selector: Arc::new(RendezvousSelector::single(node.clone())),
            node,
            events,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            workers: RwLock::new(Vec::new()),
        }
    }

    /// Run as `node` within the node set of `selector`
    pub fn with_ownership(mut self, node: NodeId, selector: Arc<dyn NodeSelector>) -> Self {
        self.node = node;
        self.selector = selector;
        self
    }

    pub fn workflow(&self) -> &W {
        &self.workflow
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Subscribe to transition events
    pub fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        self.events.subscribe()
    }

    // ── Submission ───────────────────────────────────────────────────

    /// Validate, persist and initialize a new instance
    pub async fn submit(&self, input: InputOf<W>) -> SkeinResult<WorkflowInstanceId> {
        self.submit_expiring(input, None).await
    }

    /// Submit with an explicit absolute expiration
    pub async fn submit_expiring(
        &self,
        input: InputOf<W>,
        expires_at: Option<DateTime<Utc>>,
    ) -> SkeinResult<WorkflowInstanceId> {
        self.config.validate()?;
        self.workflow.validate(&input)?;

        let id = self.local_key()?;
        let work = self.workflow.initial_work(&input);
        let mut instance = WorkflowInstance::<W::Kind>::new(input, work)
            .with_id(id.clone())
            .with_owner(self.node.as_str());
        if let Some(at) = expires_at {
            instance = instance.with_expiration(at);
        }

        self.store
            .create(transition::encode(&instance, self.retention()?)?)
            .await?;
        info!(
            instance_id = %id,
            kind = <W::Kind as WorkflowKind>::KIND,
            node = %self.node,
            "Workflow instance created"
        );

        self.initialize(&id).await?;
        Ok(id)
    }

    /// Enter the entry sub-stage, stamping the default expiration if unset
    async fn initialize(&self, id: &WorkflowInstanceId) -> SkeinResult<()> {
        let instance = self.get(id).await?;
        let expires_at = match instance.expires_at {
            Some(at) => at,
            None => Utc::now() + self.config.default_expiration()?,
        };
        let update =
            SelfUpdate::start(self.workflow.entry_sub_stage()).with_expiration(expires_at);
        self.apply(id, update).await?;
        Ok(())
    }

    /// Generate a key whose owner is this node
    fn local_key(&self) -> SkeinResult<WorkflowInstanceId> {
        if self.selector.nodes().contains(&self.node) {
            for _ in 0..MAX_KEY_ATTEMPTS {
                let id = WorkflowInstanceId::generate();
                if self.selector.owner(id.as_str()) == self.node {
                    return Ok(id);
                }
            }
        }
        Err(SkeinError::Validation(format!(
            "node {} owns no instance keys",
            self.node
        )))
    }

    // ── Updates ──────────────────────────────────────────────────────

    /// Read an instance
    pub async fn get(&self, id: &WorkflowInstanceId) -> SkeinResult<WorkflowInstance<W::Kind>> {
        Ok(transition::load::<W::Kind>(&*self.store, id).await?.0)
    }

    /// Apply an update issued by `issuer`; only the owning node may write
    pub async fn advance(
        &self,
        id: &WorkflowInstanceId,
        update: SelfUpdate<W::Kind>,
        issuer: &NodeId,
    ) -> SkeinResult<UpdateOutcome> {
        self.ensure_owner(id, issuer)?;
        Ok(self.apply(id, update).await?.1)
    }

    /// Halt a `Started` instance
    pub async fn cancel(
        &self,
        id: &WorkflowInstanceId,
        reason: impl Into<String>,
    ) -> SkeinResult<WorkflowInstance<W::Kind>> {
        self.ensure_owner(id, &self.node)?;
        let (instance, _) = self.apply(id, SelfUpdate::cancel(reason)).await?;
        info!(instance_id = %id, "Workflow instance cancelled");
        Ok(instance)
    }

    fn ensure_owner(&self, id: &WorkflowInstanceId, issuer: &NodeId) -> SkeinResult<()> {
        let owner = self.selector.owner(id.as_str());
        if &owner != issuer || owner != self.node {
            return Err(SkeinError::NotOwner {
                instance: id.clone(),
                owner: owner.to_string(),
            });
        }
        Ok(())
    }

    /// Commit an update, publish it, and schedule the next step while the
    /// instance stays `Started`
    async fn apply(
        &self,
        id: &WorkflowInstanceId,
        update: SelfUpdate<W::Kind>,
    ) -> SkeinResult<(WorkflowInstance<W::Kind>, UpdateOutcome)> {
        let (instance, outcome) =
            transition::commit(&*self.store, id, update, self.retention()?).await?;

        if outcome == UpdateOutcome::Applied {
            let _ = self.events.send(InstanceEvent {
                instance_id: id.clone(),
                kind: instance.kind.clone(),
                stage: instance.stage,
                version: instance.version,
                at: instance.updated_at,
            });

            if instance.is_active() {
                self.schedule(id).await;
            } else {
                info!(
                    instance_id = %id,
                    stage = %instance.stage,
                    reason = instance.failure_reason().unwrap_or(""),
                    "Workflow instance reached terminal stage"
                );
            }
        }

        Ok((instance, outcome))
    }

    fn retention(&self) -> SkeinResult<chrono::Duration> {
        self.config.terminal_retention()
    }

    // ── Stepping ─────────────────────────────────────────────────────

    /// Run the handler of the current sub-stage once and commit its update
    pub async fn step(&self, id: &WorkflowInstanceId) -> SkeinResult<StepOutcome> {
        self.ensure_owner(id, &self.node)?;
        let Some(_guard) = InFlight::claim(&self.in_flight, id) else {
            return Ok(StepOutcome::Busy);
        };

        let instance = self.get(id).await?;
        if !instance.is_active() {
            return Ok(StepOutcome::Idle(instance.stage));
        }

        let update = self.run_handler(&instance).await.based_on(instance.version);

        match self.apply(id, update).await {
            Ok((next, UpdateOutcome::Applied)) => Ok(StepOutcome::Advanced(next.stage)),
            Ok((_, UpdateOutcome::Replayed)) => Ok(StepOutcome::Replayed),
            Err(SkeinError::InvalidTransition { from, .. }) if from.is_terminal() => {
                debug!(instance_id = %id, stage = %from, "Discarding result of halted instance");
                Ok(StepOutcome::Discarded)
            }
            Err(e @ SkeinError::InvalidTransition { .. }) => {
                error!(instance_id = %id, error = %e, "Handler issued an invalid transition");
                let (next, _) = self.apply(id, SelfUpdate::fail(TaskFailure::from(&e))).await?;
                Ok(StepOutcome::Advanced(next.stage))
            }
            Err(e) => Err(e),
        }
    }

    /// Call the handler, re-running idempotent steps on retryable errors.
    /// Any other error becomes a failure update.
    async fn run_handler(&self, instance: &WorkflowInstance<W::Kind>) -> SelfUpdate<W::Kind> {
        let retryable_step = instance
            .sub_stage
            .as_ref()
            .is_some_and(|s| self.workflow.step_is_retryable(s));
        let mut attempt: u32 = 0;

        loop {
            match self.workflow.handle_sub_stage(instance).await {
                Ok(update) => return update,
                Err(e)
                    if e.is_retryable()
                        && retryable_step
                        && attempt < self.config.max_step_retries =>
                {
                    attempt += 1;
                    warn!(
                        instance_id = %instance.id,
                        sub_stage = ?instance.sub_stage,
                        attempt,
                        error = %e,
                        "Retrying step"
                    );
                    let backoff = self.config.retry_backoff_ms * attempt as u64;
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => {
                    warn!(
                        instance_id = %instance.id,
                        sub_stage = ?instance.sub_stage,
                        error = %e,
                        "Step failed"
                    );
                    return SelfUpdate::fail(TaskFailure::from(&e));
                }
            }
        }
    }

    /// Step an instance inline until it reaches a terminal stage
    pub async fn run_until_terminal(
        &self,
        id: &WorkflowInstanceId,
    ) -> SkeinResult<WorkflowInstance<W::Kind>> {
        loop {
            match self.step(id).await? {
                StepOutcome::Idle(stage) if stage.is_terminal() => return self.get(id).await,
                StepOutcome::Idle(_) => self.initialize(id).await?,
                StepOutcome::Busy => tokio::time::sleep(Duration::from_millis(5)).await,
                _ => {}
            }
        }
    }

    // ── Worker pool ──────────────────────────────────────────────────

    /// Spawn one worker per partition and resume this node's unfinished
    /// instances. Steps of one instance always land on the same worker.
    pub async fn start(self: &Arc<Self>) -> SkeinResult<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();
        {
            let mut senders = self.workers.write().await;
            if !senders.is_empty() {
                return Ok(handles);
            }
            for partition in 0..self.config.workers.max(1) {
                let (tx, mut rx) = mpsc::unbounded_channel::<WorkflowInstanceId>();
                senders.push(tx);
                let runtime = Arc::clone(self);
                handles.push(tokio::spawn(async move {
                    while let Some(id) = rx.recv().await {
                        if let Err(e) = runtime.step(&id).await {
                            error!(instance_id = %id, error = %e, "Worker step failed");
                        }
                    }
                    debug!(partition, "Worker stopped");
                }));
            }
        }

        info!(
            kind = <W::Kind as WorkflowKind>::KIND,
            workers = handles.len(),
            node = %self.node,
            "Workflow runtime started"
        );
        let resumed = self.resume().await?;
        if resumed > 0 {
            info!(resumed, "Resumed unfinished instances");
        }
        Ok(handles)
    }

    /// Close the worker queues; workers exit once drained
    pub async fn stop(&self) {
        self.workers.write().await.clear();
        info!(kind = <W::Kind as WorkflowKind>::KIND, "Workflow runtime stopped");
    }

    pub async fn is_running(&self) -> bool {
        !self.workers.read().await.is_empty()
    }

    async fn schedule(&self, id: &WorkflowInstanceId) {
        let workers = self.workers.read().await;
        if workers.is_empty() {
            return;
        }
        let index = partition(id.as_str(), workers.len());
        if workers[index].send(id.clone()).is_err() {
            warn!(instance_id = %id, partition = index, "Worker queue closed");
        }
    }

    /// Re-queue this node's `Created` and `Started` instances
    async fn resume(&self) -> SkeinResult<usize> {
        let mut resumed = 0;
        for stage in [TaskStage::Created, TaskStage::Started] {
            for instance in self.owned_in_stage(stage).await? {
                if stage == TaskStage::Created {
                    self.initialize(&instance.id).await?;
                } else {
                    self.schedule(&instance.id).await;
                }
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    async fn owned_in_stage(&self, stage: TaskStage) -> SkeinResult<Vec<WorkflowInstance<W::Kind>>> {
        let tree = QueryTree::kind(<W::Kind as WorkflowKind>::KIND)
            .and(QueryTree::term("stage", stage.as_str()))
            .and(QueryTree::term("owner", self.node.as_str()));
        self.store
            .query_all(QuerySpec::new(tree).with_page_size(100))
            .await?
            .iter()
            .map(transition::decode::<W::Kind>)
            .collect()
    }

    // ── Waiting ──────────────────────────────────────────────────────

    /// Wait until an instance reaches a terminal stage
    pub async fn wait_for_terminal(
        &self,
        id: &WorkflowInstanceId,
        timeout: Duration,
    ) -> SkeinResult<WorkflowInstance<W::Kind>> {
        let mut rx = self.events.subscribe();
        let instance = self.get(id).await?;
        if instance.is_terminal() {
            return Ok(instance);
        }

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(event) if &event.instance_id == id && event.is_terminal() => {
                        return self.get(id).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {
                        let instance = self.get(id).await?;
                        if instance.is_terminal() {
                            return Ok(instance);
                        }
                    }
                    Err(RecvError::Closed) => {
                        return Err(SkeinError::Store("event stream closed".into()));
                    }
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            SkeinError::Retryable(format!("timed out waiting for instance {}", id))
        })?
    }

    /// Submit and return the terminal instance, on the worker pool when it
    /// runs and inline otherwise
    pub async fn submit_and_wait(
        &self,
        input: InputOf<W>,
    ) -> SkeinResult<WorkflowInstance<W::Kind>> {
        let id = self.submit(input).await?;
        if self.is_running().await {
            let timeout = Duration::from_secs(self.config.wait_timeout_secs);
            self.wait_for_terminal(&id, timeout).await
        } else {
            self.run_until_terminal(&id).await
        }
    }

    /// Fail this node's `Started` instances whose expiration has passed
    pub(crate) async fn expire_started(&self, now: DateTime<Utc>) -> SkeinResult<usize> {
        let mut expired = 0;
        for instance in self.owned_in_stage(TaskStage::Started).await? {
            if !instance.is_expired_at(now) {
                continue;
            }
            match self.apply(&instance.id, SelfUpdate::fail(TaskFailure::expired())).await {
                Ok((_, UpdateOutcome::Applied)) => {
                    info!(instance_id = %instance.id, "Workflow instance expired");
                    expired += 1;
                }
                Ok(_) | Err(SkeinError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }
}

/// Marks an instance as being stepped; released on drop
struct InFlight {
    set: Arc<Mutex<HashSet<WorkflowInstanceId>>>,
    id: WorkflowInstanceId,
}

impl InFlight {
    fn claim(set: &Arc<Mutex<HashSet<WorkflowInstanceId>>>, id: &WorkflowInstanceId) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(id.clone()).then(|| Self {
            set: Arc::clone(set),
            id: id.clone(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut guard = self.set.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(&self.id);
    }
}
