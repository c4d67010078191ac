//! Client filter → storage query translation
//!
//! Every leaf is rewritten to a storage-native clause through a
//! [`FieldMap`]. Tag leaves cannot be expressed against the account
//! document, so they become [`DeferredPredicate`]s for the tag resolution
//! engine.
//!
//! A tag leaf that every match must satisfy, and the first group made only
//! of SHOULD tag leaves, are lifted out of the tree entirely and ANDed back
//! in as link sets. Any other tag leaf is placed: it keeps its position as
//! a link-set clause on a numbered slot, filled from the side query result
//! by [`translate_resolved`]. Groups emptied by lifting are dropped.

use crate::model::{org_link, service_key};
use crate::tags::TAG_LINKS_FIELD;
use serde::{Deserialize, Serialize};
use skein_types::{
    FilterLeaf, FilterTree, Link, MatchType, Occurrence, QueryTree, SkeinError, SkeinResult,
    FIELD_SELF_LINK, TAGS_FIELD,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// How one client field maps onto stored documents
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldRule {
    /// Rename only
    Direct(String),
    /// Compare lower-cased
    CaseInsensitive(String),
    /// Organization id, matched as a prefix of the organization link
    OrgId(String),
    /// Service name, matched as a composite `service:<name>` key
    Service(String),
    /// Resolved by a side query instead of the primary one
    Deferred,
}

/// Client field name → rule
#[derive(Clone, Debug, Default)]
pub struct FieldMap {
    rules: HashMap<String, FieldRule>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, rule: FieldRule) -> Self {
        self.rules.insert(field.into(), rule);
        self
    }

    pub fn rule(&self, field: &str) -> Option<&FieldRule> {
        self.rules.get(field)
    }

    /// Fields a cloud account listing accepts
    pub fn cloud_accounts() -> Self {
        Self::new()
            .with("name", FieldRule::CaseInsensitive("name".into()))
            .with("type", FieldRule::Direct("endpointType".into()))
            .with("orgId", FieldRule::OrgId("orgLink".into()))
            .with("service", FieldRule::Service("serviceKeys".into()))
            .with("createdBy", FieldRule::Direct("createdBy".into()))
            .with("id", FieldRule::Direct(FIELD_SELF_LINK.into()))
            .with(TAGS_FIELD, FieldRule::Deferred)
    }
}

/// A `key=value` tag predicate awaiting resolution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredPredicate {
    pub key: String,
    pub value: String,
    pub match_type: MatchType,
    pub occurrence: Occurrence,
    /// Position in the tree for placed predicates; lifted ones have none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<u32>,
}

impl DeferredPredicate {
    fn parse(leaf: &FilterLeaf, slot: Option<u32>) -> SkeinResult<Self> {
        let (key, value) = leaf.value.split_once('=').ok_or_else(|| {
            SkeinError::Validation(format!("tag predicate '{}' is not key=value", leaf.value))
        })?;
        if key.is_empty() {
            return Err(SkeinError::Validation(format!(
                "tag predicate '{}' has an empty key",
                leaf.value
            )));
        }
        if leaf.occurrence == Occurrence::MustNot {
            return Err(SkeinError::Validation(format!(
                "negated tag predicate '{}' is not supported",
                leaf.value
            )));
        }
        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
            match_type: leaf.match_type,
            occurrence: leaf.occurrence,
            slot,
        })
    }
}

/// Result of translating one filter
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    /// Storage query; absent when every clause was deferred
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<QueryTree>,
    #[serde(default)]
    pub deferred: Vec<DeferredPredicate>,
}

/// Translate `filter` through `fields`.
///
/// Any field the map does not know fails the whole translation. Placed
/// tag clauses match nothing until resolved; see [`translate_resolved`].
pub fn translate(filter: &FilterTree, fields: &FieldMap) -> SkeinResult<Translation> {
    translate_resolved(filter, fields, &BTreeMap::new())
}

/// Translate `filter`, filling placed tag clauses from `placed`, the tag
/// links each slot resolved to.
pub fn translate_resolved(
    filter: &FilterTree,
    fields: &FieldMap,
    placed: &BTreeMap<u32, BTreeSet<Link>>,
) -> SkeinResult<Translation> {
    let mut translator = Translator {
        fields,
        placed,
        deferred: Vec::new(),
        or_group_lifted: false,
        next_slot: 0,
    };
    let tree = translator.node(filter, true)?;
    Ok(Translation {
        tree,
        deferred: translator.deferred,
    })
}

struct Translator<'a> {
    fields: &'a FieldMap,
    placed: &'a BTreeMap<u32, BTreeSet<Link>>,
    deferred: Vec<DeferredPredicate>,
    or_group_lifted: bool,
    next_slot: u32,
}

impl Translator<'_> {
    /// `required`: every enclosing group is MUST, up to the root
    fn node(&mut self, node: &FilterTree, required: bool) -> SkeinResult<Option<QueryTree>> {
        match node {
            FilterTree::Leaf(leaf) => self.leaf(leaf, required),
            FilterTree::Group {
                occurrence,
                clauses,
            } => {
                let required = required && *occurrence == Occurrence::Must;
                if required && !self.or_group_lifted && self.is_tag_or_group(clauses) {
                    self.or_group_lifted = true;
                    for leaf in clauses.iter().flat_map(|c| c.leaves()) {
                        self.deferred.push(DeferredPredicate::parse(leaf, None)?);
                    }
                    return Ok(None);
                }

                let mut translated = Vec::with_capacity(clauses.len());
                let mut lifted_must = false;
                for clause in clauses {
                    match self.node(clause, required)? {
                        Some(tree) => translated.push(tree),
                        None => lifted_must |= clause.occurrence() == Occurrence::Must,
                    }
                }
                // SHOULD clauses only constrain a group without MUST clauses
                if lifted_must && translated.iter().all(|c| c.occurrence() != Occurrence::Must) {
                    translated.retain(|c| c.occurrence() != Occurrence::Should);
                }
                if translated.is_empty() {
                    return Ok(None);
                }
                Ok(Some(QueryTree::Group {
                    occurrence: *occurrence,
                    clauses: translated,
                }))
            }
        }
    }

    fn is_tag_or_group(&self, clauses: &[FilterTree]) -> bool {
        !clauses.is_empty()
            && clauses.iter().all(|c| match c {
                FilterTree::Leaf(leaf) => {
                    leaf.occurrence == Occurrence::Should
                        && self.fields.rule(&leaf.field) == Some(&FieldRule::Deferred)
                }
                FilterTree::Group { .. } => false,
            })
    }

    fn leaf(&mut self, leaf: &FilterLeaf, required: bool) -> SkeinResult<Option<QueryTree>> {
        let fields = self.fields;
        let rule = fields
            .rule(&leaf.field)
            .ok_or_else(|| SkeinError::UnsupportedFilterField(leaf.field.clone()))?;

        let term = |field: &str, value: String, match_type: MatchType, case_insensitive: bool| {
            QueryTree::Term {
                field: field.to_string(),
                value,
                match_type,
                occurrence: leaf.occurrence,
                case_insensitive,
            }
        };

        let tree = match rule {
            FieldRule::Deferred if required && leaf.occurrence == Occurrence::Must => {
                self.deferred.push(DeferredPredicate::parse(leaf, None)?);
                return Ok(None);
            }
            FieldRule::Deferred => {
                let slot = self.next_slot;
                self.next_slot += 1;
                self.deferred.push(DeferredPredicate::parse(leaf, Some(slot))?);
                let links = self.placed.get(&slot).into_iter().flatten();
                QueryTree::any_of(TAG_LINKS_FIELD, links.map(|l| l.0.clone()))
                    .with_occurrence(leaf.occurrence)
            }
            FieldRule::Direct(field) => term(field, leaf.value.clone(), leaf.match_type, false),
            FieldRule::CaseInsensitive(field) => {
                term(field, leaf.value.to_lowercase(), leaf.match_type, true)
            }
            FieldRule::OrgId(field) => term(field, org_link(&leaf.value).0, MatchType::Prefix, false),
            FieldRule::Service(field) => term(field, service_key(&leaf.value), MatchType::Term, false),
        };
        Ok(Some(tree))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> FieldMap {
        FieldMap::cloud_accounts()
    }

    #[test]
    fn test_direct_field_is_renamed() {
        let t = translate(&FilterTree::term("type", "aws"), &map()).unwrap();
        assert_eq!(t.tree, Some(QueryTree::term("endpointType", "aws")));
        assert!(t.deferred.is_empty());
    }

    #[test]
    fn test_special_fields() {
        let t = translate(&FilterTree::term("orgId", "acme"), &map()).unwrap();
        assert_eq!(t.tree, Some(QueryTree::prefix("orgLink", "/orgs/acme")));

        let t = translate(&FilterTree::term("service", "EC2"), &map()).unwrap();
        assert_eq!(t.tree, Some(QueryTree::term("serviceKeys", "service:ec2")));

        let t = translate(&FilterTree::term("name", "Prod*").with_match_type(MatchType::Wildcard), &map())
            .unwrap();
        match t.tree {
            Some(QueryTree::Term {
                value,
                case_insensitive,
                match_type,
                ..
            }) => {
                assert_eq!(value, "prod*");
                assert!(case_insensitive);
                assert_eq!(match_type, MatchType::Wildcard);
            }
            other => panic!("expected term, got {:?}", other),
        }
    }

    #[test]
    fn test_tags_are_deferred_and_groups_pruned() {
        let filter = FilterTree::all(vec![
            FilterTree::term("type", "aws"),
            FilterTree::tag("env", "prod"),
            FilterTree::any(vec![FilterTree::tag("team", "a"), FilterTree::tag("team", "b")]),
        ]);
        let t = translate(&filter, &map()).unwrap();

        match t.tree {
            Some(QueryTree::Group { clauses, .. }) => assert_eq!(clauses.len(), 1),
            other => panic!("expected group, got {:?}", other),
        }
        assert_eq!(t.deferred.len(), 3);
        assert_eq!(t.deferred[0].key, "env");
        assert_eq!(t.deferred[0].occurrence, Occurrence::Must);
        assert_eq!(t.deferred[1].occurrence, Occurrence::Should);
    }

    #[test]
    fn test_tag_in_mixed_or_group_keeps_its_place() {
        let filter = FilterTree::any(vec![FilterTree::term("type", "aws"), FilterTree::tag("team", "a")]);
        let t = translate(&filter, &map()).unwrap();

        assert_eq!(t.deferred.len(), 1);
        assert_eq!(t.deferred[0].slot, Some(0));
        assert_eq!(t.deferred[0].occurrence, Occurrence::Should);
        match &t.tree {
            Some(QueryTree::Group { clauses, .. }) => {
                assert_eq!(clauses.len(), 2);
                assert_eq!(
                    clauses[1],
                    QueryTree::AnyOf {
                        field: TAG_LINKS_FIELD.into(),
                        values: BTreeSet::new(),
                        occurrence: Occurrence::Should,
                    }
                );
            }
            other => panic!("expected group, got {:?}", other),
        }

        let placed = BTreeMap::from([(0, BTreeSet::from([Link::new("/tags/team-a")]))]);
        let t = translate_resolved(&filter, &map(), &placed).unwrap();
        match t.tree {
            Some(QueryTree::Group { clauses, .. }) => match &clauses[1] {
                QueryTree::AnyOf { values, .. } => {
                    assert_eq!(values, &BTreeSet::from(["/tags/team-a".to_string()]))
                }
                other => panic!("expected link set, got {:?}", other),
            },
            other => panic!("expected group, got {:?}", other),
        }
    }

    #[test]
    fn test_only_first_tag_or_group_is_lifted() {
        let filter = FilterTree::all(vec![
            FilterTree::any(vec![FilterTree::tag("team", "a"), FilterTree::tag("team", "b")]),
            FilterTree::any(vec![FilterTree::tag("env", "prod"), FilterTree::tag("env", "dev")]),
        ]);
        let t = translate(&filter, &map()).unwrap();

        let slots: Vec<_> = t.deferred.iter().map(|d| d.slot).collect();
        assert_eq!(slots, vec![None, None, Some(0), Some(1)]);
        match t.tree {
            Some(QueryTree::Group { clauses, .. }) => {
                assert_eq!(clauses.len(), 1);
                assert_eq!(clauses[0].clause_count(), 3);
            }
            other => panic!("expected group, got {:?}", other),
        }
    }

    #[test]
    fn test_lifting_a_must_tag_drops_inert_should_siblings() {
        let filter = FilterTree::all(vec![
            FilterTree::tag("env", "prod"),
            FilterTree::term("type", "aws").with_occurrence(Occurrence::Should),
        ]);
        let t = translate(&filter, &map()).unwrap();
        assert!(t.tree.is_none());
        assert_eq!(t.deferred.len(), 1);
        assert_eq!(t.deferred[0].slot, None);
    }

    #[test]
    fn test_tags_only_filter_has_no_tree() {
        let t = translate(&FilterTree::tag("env", "prod"), &map()).unwrap();
        assert!(t.tree.is_none());
        assert_eq!(t.deferred.len(), 1);
    }

    #[test]
    fn test_unknown_field_fails_whole_translation() {
        let filter = FilterTree::all(vec![
            FilterTree::term("type", "aws"),
            FilterTree::term("color", "blue"),
        ]);
        let err = translate(&filter, &map()).unwrap_err();
        assert_eq!(err, SkeinError::UnsupportedFilterField("color".into()));
    }

    #[test]
    fn test_malformed_tag_predicates() {
        assert!(matches!(
            translate(&FilterTree::term("tags", "novalue"), &map()),
            Err(SkeinError::Validation(_))
        ));
        assert!(matches!(
            translate(
                &FilterTree::tag("env", "prod").with_occurrence(Occurrence::MustNot),
                &map()
            ),
            Err(SkeinError::Validation(_))
        ));
    }
}
