//! Worklist items and the success/failure records they end up in

use crate::adapter::{ResourceKind, ResourceSpec};
use serde::{Deserialize, Serialize};
use skein_types::Link;
use std::collections::{BTreeMap, VecDeque};

/// Attempts per item before it is given up on
pub const MAX_ATTEMPTS: u32 = 3;

/// Side effects issued concurrently per batch
pub const SIDE_EFFECT_BATCH_SIZE: usize = 100;

pub const MAX_ATTEMPTS_REASON: &str = "max attempts reached";

/// A queued item and how often it has been tried
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorklistItem {
    pub spec: ResourceSpec,
    pub attempts_made: u32,
}

impl WorklistItem {
    pub fn new(spec: ResourceSpec) -> Self {
        Self {
            spec,
            attempts_made: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.name
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SideEffectStatus {
    Pending,
    Triggered,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideEffectOutcome {
    pub status: SideEffectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SideEffectOutcome {
    pub fn pending() -> Self {
        Self {
            status: SideEffectStatus::Pending,
            reason: None,
        }
    }

    pub fn triggered() -> Self {
        Self {
            status: SideEffectStatus::Triggered,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: SideEffectStatus::Failed,
            reason: Some(reason.into()),
        }
    }
}

/// An item whose resource was created
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessRecord {
    pub id: String,
    pub kind: ResourceKind,
    pub link: Link,
    pub attempts: u32,
    pub side_effect: SideEffectOutcome,
}

/// An item given up on
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub id: String,
    pub kind: ResourceKind,
    pub reason: String,
    pub attempts: u32,
}

/// Scratch state of a bulk instance
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkWork {
    pub worklist: VecDeque<WorklistItem>,
    pub successes: BTreeMap<String, SuccessRecord>,
    pub failures: BTreeMap<String, FailureRecord>,
    /// Successes whose side effect has not been issued yet
    pub side_effect_queue: VecDeque<String>,
}

impl BulkWork {
    pub fn new(items: impl IntoIterator<Item = ResourceSpec>) -> Self {
        Self {
            worklist: items.into_iter().map(WorklistItem::new).collect(),
            ..Self::default()
        }
    }

    /// Record a created item, replacing any earlier record for its id
    pub fn record_success(&mut self, item: &WorklistItem, link: Link) {
        let id = item.id().to_string();
        if !self.side_effect_queue.contains(&id) {
            self.side_effect_queue.push_back(id.clone());
        }
        self.failures.remove(&id);
        self.successes.insert(
            id.clone(),
            SuccessRecord {
                id,
                kind: item.spec.kind,
                link,
                attempts: item.attempts_made,
                side_effect: SideEffectOutcome::pending(),
            },
        );
    }

    pub fn record_failure(&mut self, item: &WorklistItem, reason: impl Into<String>) {
        let id = item.id().to_string();
        self.failures.insert(
            id.clone(),
            FailureRecord {
                id,
                kind: item.spec.kind,
                reason: reason.into(),
                attempts: item.attempts_made,
            },
        );
    }

    /// Take the next side-effect batch, in success order
    pub fn next_batch(&mut self, size: usize) -> Vec<SuccessRecord> {
        let mut batch = Vec::with_capacity(size.min(self.side_effect_queue.len()));
        while batch.len() < size {
            let Some(id) = self.side_effect_queue.pop_front() else {
                break;
            };
            if let Some(record) = self.successes.get(&id) {
                batch.push(record.clone());
            }
        }
        batch
    }

    pub fn report(&self) -> BulkReport {
        BulkReport {
            successes: self.successes.values().cloned().collect(),
            failures: self.failures.values().cloned().collect(),
        }
    }
}

/// Final partitioned outcome, each side sorted by id
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkReport {
    pub successes: Vec<SuccessRecord>,
    pub failures: Vec<FailureRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str) -> WorklistItem {
        WorklistItem::new(ResourceSpec::cloud_account(name, "aws", "acme"))
    }

    #[test]
    fn test_records_are_keyed_by_id() {
        let mut work = BulkWork::default();
        let a = item("a");
        work.record_success(&a, Link::new("/accounts/a"));
        work.record_success(&a, Link::new("/accounts/a"));
        assert_eq!(work.successes.len(), 1);
        assert_eq!(work.side_effect_queue.len(), 1);

        let b = item("b");
        work.record_failure(&b, "boom");
        work.record_failure(&b, "boom again");
        assert_eq!(work.failures.len(), 1);
        assert_eq!(work.failures["b"].reason, "boom again");
    }

    #[test]
    fn test_batches_drain_queue_in_order() {
        let mut work = BulkWork::default();
        for n in 0..5 {
            work.record_success(&item(&format!("i{}", n)), Link::new(format!("/accounts/i{}", n)));
        }
        let first: Vec<_> = work.next_batch(2).into_iter().map(|r| r.id).collect();
        assert_eq!(first, vec!["i0", "i1"]);
        assert_eq!(work.next_batch(10).len(), 3);
        assert!(work.next_batch(10).is_empty());
    }

    #[test]
    fn test_report_is_sorted() {
        let mut work = BulkWork::default();
        work.record_failure(&item("zeta"), "x");
        work.record_failure(&item("alpha"), "y");
        let report = work.report();
        assert_eq!(report.failures[0].id, "alpha");
        assert_eq!(report.failures[1].id, "zeta");
    }
}
