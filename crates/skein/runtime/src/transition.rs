//! Persisting instances and committing self-updates
//!
//! An instance is one document at `/workflows/{kind}/{id}`. Every update
//! is applied to a freshly read copy and written back with a version
//! check, so the stored instance only moves through accepted transitions.

use chrono::{Duration, Utc};
use skein_store::{Document, DocumentStore, StoreError};
use skein_types::{
    Link, SelfUpdate, SkeinError, SkeinResult, UpdateOutcome, WorkflowInstance,
    WorkflowInstanceId, WorkflowKind,
};
use tracing::{debug, warn};

/// Version conflicts tolerated before a commit gives up
const MAX_COMMIT_CONFLICTS: usize = 8;

/// Store link of an instance
pub fn instance_link<K: WorkflowKind>(id: &WorkflowInstanceId) -> Link {
    Link::new(format!("/workflows/{}/{}", K::KIND, id))
}

/// Encode an instance as a document.
///
/// Only terminal instances get a store expiration; running ones are
/// failed by the runtime sweep first. A terminal instance stays readable
/// for at least `retention`.
pub(crate) fn encode<K: WorkflowKind>(
    instance: &WorkflowInstance<K>,
    retention: Duration,
) -> SkeinResult<Document> {
    let body = serde_json::to_value(instance)?;
    let expires_at = instance.is_terminal().then(|| {
        let floor = Utc::now() + retention;
        instance.expires_at.map_or(floor, |at| at.max(floor))
    });
    Ok(Document::from_value(instance_link::<K>(&instance.id), K::KIND, body).with_expiration(expires_at))
}

pub(crate) fn decode<K: WorkflowKind>(doc: &Document) -> SkeinResult<WorkflowInstance<K>> {
    Ok(serde_json::from_value(doc.body.clone())?)
}

/// Read an instance and the store version it was read at
pub(crate) async fn load<K: WorkflowKind>(
    store: &dyn DocumentStore,
    id: &WorkflowInstanceId,
) -> SkeinResult<(WorkflowInstance<K>, u64)> {
    let doc = store
        .get(&instance_link::<K>(id))
        .await?
        .ok_or_else(|| SkeinError::InstanceNotFound(id.clone()))?;
    Ok((decode(&doc)?, doc.version))
}

/// Apply `update` to the stored instance and persist the result
pub(crate) async fn commit<K: WorkflowKind>(
    store: &dyn DocumentStore,
    id: &WorkflowInstanceId,
    update: SelfUpdate<K>,
    retention: Duration,
) -> SkeinResult<(WorkflowInstance<K>, UpdateOutcome)> {
    for _ in 0..MAX_COMMIT_CONFLICTS {
        let (mut instance, doc_version) = load::<K>(store, id).await?;
        let from = instance.stage;

        match instance.apply_update(update.clone()) {
            Ok(UpdateOutcome::Replayed) => {
                debug!(instance_id = %id, stage = %from, "Update replayed");
                return Ok((instance, UpdateOutcome::Replayed));
            }
            Ok(UpdateOutcome::Applied) => {}
            Err(e) => {
                warn!(instance_id = %id, from = %from, to = %update.stage, "Rejected transition");
                return Err(e);
            }
        }

        match store.replace(encode(&instance, retention)?, doc_version).await {
            Ok(_) => {
                debug!(
                    instance_id = %id,
                    from = %from,
                    to = %instance.stage,
                    sub_stage = ?instance.sub_stage,
                    version = instance.version,
                    "Transition committed"
                );
                return Ok((instance, UpdateOutcome::Applied));
            }
            Err(StoreError::Conflict(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(SkeinError::Retryable(format!(
        "instance {} kept changing during commit",
        id
    )))
}
