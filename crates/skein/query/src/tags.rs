//! Tag resolution
//!
//! Tag predicates are resolved into sets of tag links with one side query
//! per distinct tag key, all issued concurrently. Each required predicate
//! yields its own link set, which the primary query must intersect with.
//! OR-marked predicates are unioned into a single eligible set. Placed
//! predicates get one set per slot, substituted where the predicate sits
//! in the filter. A required predicate that matches no tag at all means
//! nothing can match, and the primary query is skipped.

use crate::model::{TagOrigin, KIND_TAG};
use crate::translate::DeferredPredicate;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use skein_store::{eval, Document, DocumentStore, QuerySpec};
use skein_types::{Link, MatchType, Occurrence, QueryTree, SkeinResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Account field holding tag links
pub const TAG_LINKS_FIELD: &str = "tagLinks";

/// Link sets produced by tag resolution
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagResolutionState {
    /// Each set is intersected with the primary query
    pub required_link_sets: Vec<BTreeSet<Link>>,
    /// Union of the OR-marked predicates; `None` when there were none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or_eligible_links: Option<BTreeSet<Link>>,
    /// Links of each placed predicate, by slot
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub placed_links: BTreeMap<u32, BTreeSet<Link>>,
}

impl TagResolutionState {
    /// AND the resolved link sets into `tree`
    pub fn apply(&self, mut tree: QueryTree) -> QueryTree {
        for links in &self.required_link_sets {
            tree = tree.and(QueryTree::any_of(TAG_LINKS_FIELD, links.iter().map(|l| l.0.clone())));
        }
        if let Some(links) = &self.or_eligible_links {
            tree = tree.and(QueryTree::any_of(TAG_LINKS_FIELD, links.iter().map(|l| l.0.clone())));
        }
        tree
    }
}

/// What tag resolution concluded
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum TagResolution {
    Resolved(TagResolutionState),
    /// A required predicate matched no tag; the result is empty
    ShortCircuit { key: String, value: String },
}

// ── Query builder ────────────────────────────────────────────────────

/// How a key's predicates feed the primary query
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Role {
    Required,
    Either,
    Placed,
}

/// Predicates on one tag key
#[derive(Debug)]
struct KeyGroup {
    key: String,
    role: Role,
    values: Vec<(MatchType, String)>,
    /// Slot → index into `values`
    slots: Vec<(u32, usize)>,
}

impl KeyGroup {
    fn value_clause(&self, (match_type, value): &(MatchType, String)) -> QueryTree {
        QueryTree::Term {
            field: "value".into(),
            value: value.clone(),
            match_type: *match_type,
            occurrence: Occurrence::Must,
            case_insensitive: false,
        }
    }

    /// One side query for the whole key: kind, key, any of the values,
    /// user-visible origin
    fn query(&self) -> QuerySpec {
        let values = self
            .values
            .iter()
            .map(|v| self.value_clause(v).with_occurrence(Occurrence::Should))
            .collect();
        let tree = QueryTree::kind(KIND_TAG)
            .and(QueryTree::term("key", self.key.clone()))
            .and(QueryTree::group(values))
            .and(QueryTree::any_of(
                "origins",
                [TagOrigin::Discovered.as_str(), TagOrigin::UserDefined.as_str()],
            ))
            .and(
                QueryTree::term("origins", TagOrigin::System.as_str())
                    .with_occurrence(Occurrence::MustNot),
            );
        QuerySpec::new(tree).with_page_size(500)
    }
}

/// Groups predicates by key until the side queries are built
#[derive(Debug, Default)]
struct TagQueryBuilder {
    groups: BTreeMap<(Role, String), KeyGroup>,
}

impl TagQueryBuilder {
    fn add(&mut self, predicate: &DeferredPredicate, or_marker: Occurrence) {
        let role = match predicate.slot {
            Some(_) => Role::Placed,
            None if predicate.occurrence == or_marker => Role::Either,
            None => Role::Required,
        };
        let group = self
            .groups
            .entry((role, predicate.key.clone()))
            .or_insert_with(|| KeyGroup {
                key: predicate.key.clone(),
                role,
                values: Vec::new(),
                slots: Vec::new(),
            });
        let value = (predicate.match_type, predicate.value.clone());
        let index = match group.values.iter().position(|v| *v == value) {
            Some(index) => index,
            None => {
                group.values.push(value);
                group.values.len() - 1
            }
        };
        if let Some(slot) = predicate.slot {
            group.slots.push((slot, index));
        }
    }

    fn finish(self) -> Vec<KeyGroup> {
        self.groups.into_values().collect()
    }
}

// ── Engine ───────────────────────────────────────────────────────────

/// Resolves deferred tag predicates against the store
#[derive(Clone)]
pub struct TagResolutionEngine {
    store: Arc<dyn DocumentStore>,
}

impl TagResolutionEngine {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Resolve `predicates`; unplaced ones whose occurrence equals
    /// `or_marker` form the OR group. Any failed side query fails the
    /// resolution.
    pub async fn resolve(
        &self,
        predicates: &[DeferredPredicate],
        or_marker: Occurrence,
    ) -> SkeinResult<TagResolution> {
        if predicates.is_empty() {
            return Ok(TagResolution::Resolved(TagResolutionState::default()));
        }

        let mut builder = TagQueryBuilder::default();
        for predicate in predicates {
            builder.add(predicate, or_marker);
        }
        let groups = builder.finish();

        let results = try_join_all(groups.iter().map(|group| {
            let store = Arc::clone(&self.store);
            let spec = group.query();
            async move { store.query_all(spec).await }
        }))
        .await?;

        let mut state = TagResolutionState::default();
        for (group, docs) in groups.iter().zip(results) {
            debug!(key = %group.key, role = ?group.role, tags = docs.len(), "Tag key resolved");

            match group.role {
                Role::Either => {
                    let eligible = state.or_eligible_links.get_or_insert_with(BTreeSet::new);
                    eligible.extend(docs.into_iter().map(|d| d.link));
                    continue;
                }
                Role::Placed => {
                    for (slot, index) in &group.slots {
                        let links = links_matching(&docs, &group.value_clause(&group.values[*index]));
                        state.placed_links.insert(*slot, links);
                    }
                    continue;
                }
                Role::Required => {}
            }

            for value in &group.values {
                let links = links_matching(&docs, &group.value_clause(value));
                if links.is_empty() {
                    debug!(key = %group.key, value = %value.1, "Required tag matched nothing");
                    return Ok(TagResolution::ShortCircuit {
                        key: group.key.clone(),
                        value: value.1.clone(),
                    });
                }
                state.required_link_sets.push(links);
            }
        }

        Ok(TagResolution::Resolved(state))
    }
}

fn links_matching(docs: &[Document], clause: &QueryTree) -> BTreeSet<Link> {
    docs.iter()
        .filter(|d| eval::matches(clause, d))
        .map(|d| d.link.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{tag_link, Tag};
    use skein_store::InMemoryDocumentStore;

    fn predicate(key: &str, value: &str, occurrence: Occurrence) -> DeferredPredicate {
        DeferredPredicate {
            key: key.into(),
            value: value.into(),
            match_type: MatchType::Term,
            occurrence,
            slot: None,
        }
    }

    async fn store_with_tags() -> Arc<InMemoryDocumentStore> {
        let store = Arc::new(InMemoryDocumentStore::new());
        let tags = [
            ("t-env-prod", Tag::new("env", "prod", TagOrigin::UserDefined)),
            ("t-env-dev", Tag::new("env", "dev", TagOrigin::Discovered)),
            ("t-team-a", Tag::new("team", "a", TagOrigin::UserDefined)),
            ("t-team-b", Tag::new("team", "b", TagOrigin::Discovered)),
            ("t-sys", Tag::new("env", "prod", TagOrigin::System)),
        ];
        for (id, tag) in tags {
            store
                .put(Document::new(tag_link(id), KIND_TAG, &tag).unwrap())
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_required_and_or_groups() {
        let store = store_with_tags().await;
        let engine = TagResolutionEngine::new(store);
        let predicates = [
            predicate("env", "prod", Occurrence::Must),
            predicate("team", "a", Occurrence::Should),
            predicate("team", "b", Occurrence::Should),
        ];

        let resolution = engine.resolve(&predicates, Occurrence::Should).await.unwrap();
        let TagResolution::Resolved(state) = resolution else {
            panic!("expected resolved state");
        };
        assert_eq!(
            state.required_link_sets,
            vec![BTreeSet::from([tag_link("t-env-prod")])]
        );
        assert_eq!(
            state.or_eligible_links,
            Some(BTreeSet::from([tag_link("t-team-a"), tag_link("t-team-b")]))
        );
    }

    #[tokio::test]
    async fn test_required_values_of_one_key_stay_separate() {
        let store = store_with_tags().await;
        let engine = TagResolutionEngine::new(store.clone());
        let predicates = [
            predicate("env", "prod", Occurrence::Must),
            predicate("env", "dev", Occurrence::Must),
        ];

        let TagResolution::Resolved(state) =
            engine.resolve(&predicates, Occurrence::Should).await.unwrap()
        else {
            panic!("expected resolved state");
        };
        assert_eq!(state.required_link_sets.len(), 2);
        // one side query for the key
        assert_eq!(store.issued_queries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_system_tags_are_excluded() {
        let store = store_with_tags().await;
        let engine = TagResolutionEngine::new(store);
        let TagResolution::Resolved(state) = engine
            .resolve(&[predicate("env", "prod", Occurrence::Must)], Occurrence::Should)
            .await
            .unwrap()
        else {
            panic!("expected resolved state");
        };
        assert!(!state.required_link_sets[0].contains(&tag_link("t-sys")));
    }

    #[tokio::test]
    async fn test_empty_required_key_short_circuits() {
        let store = store_with_tags().await;
        let engine = TagResolutionEngine::new(store);
        let resolution = engine
            .resolve(
                &[
                    predicate("env", "prod", Occurrence::Must),
                    predicate("owner", "nobody", Occurrence::Must),
                ],
                Occurrence::Should,
            )
            .await
            .unwrap();
        assert_eq!(
            resolution,
            TagResolution::ShortCircuit {
                key: "owner".into(),
                value: "nobody".into()
            }
        );
    }

    #[tokio::test]
    async fn test_empty_or_branch_does_not_zero_union() {
        let store = store_with_tags().await;
        let engine = TagResolutionEngine::new(store);
        let TagResolution::Resolved(state) = engine
            .resolve(
                &[
                    predicate("team", "a", Occurrence::Should),
                    predicate("owner", "nobody", Occurrence::Should),
                ],
                Occurrence::Should,
            )
            .await
            .unwrap()
        else {
            panic!("expected resolved state");
        };
        assert_eq!(
            state.or_eligible_links,
            Some(BTreeSet::from([tag_link("t-team-a")]))
        );
    }

    #[tokio::test]
    async fn test_placed_predicates_resolve_per_slot() {
        let store = store_with_tags().await;
        let engine = TagResolutionEngine::new(store.clone());
        let placed = |value: &str, slot| DeferredPredicate {
            slot: Some(slot),
            ..predicate("team", value, Occurrence::Should)
        };
        let predicates = [
            placed("a", 0),
            placed("b", 1),
            DeferredPredicate {
                slot: Some(2),
                ..predicate("owner", "nobody", Occurrence::Must)
            },
        ];

        let TagResolution::Resolved(state) =
            engine.resolve(&predicates, Occurrence::Should).await.unwrap()
        else {
            panic!("placed predicates never short-circuit");
        };
        assert!(state.required_link_sets.is_empty());
        assert!(state.or_eligible_links.is_none());
        assert_eq!(state.placed_links[&0], BTreeSet::from([tag_link("t-team-a")]));
        assert_eq!(state.placed_links[&1], BTreeSet::from([tag_link("t-team-b")]));
        assert!(state.placed_links[&2].is_empty());
        // one side query per key
        assert_eq!(store.issued_queries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_side_query_failure_fails_resolution() {
        let store = store_with_tags().await;
        store.fail_next_queries(1);
        let engine = TagResolutionEngine::new(store);
        let result = engine
            .resolve(&[predicate("env", "prod", Occurrence::Must)], Occurrence::Should)
            .await;
        assert!(result.unwrap_err().is_retryable());
    }

    #[test]
    fn test_apply_adds_one_clause_per_set() {
        let state = TagResolutionState {
            required_link_sets: vec![BTreeSet::from([tag_link("1")]), BTreeSet::from([tag_link("2")])],
            or_eligible_links: Some(BTreeSet::from([tag_link("3"), tag_link("4")])),
            placed_links: BTreeMap::new(),
        };
        let tree = state.apply(QueryTree::kind("cloud-account"));
        match tree {
            QueryTree::Group { clauses, .. } => assert_eq!(clauses.len(), 4),
            other => panic!("expected group, got {:?}", other),
        }
    }
}
