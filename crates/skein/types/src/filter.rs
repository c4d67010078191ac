//! Client-facing filters: boolean trees over entity fields
//!
//! A FilterTree is what a caller submits with a query. Leaf fields are
//! client names (`type`, `orgId`, `tags`, ...). Translation into a
//! storage-native [`QueryTree`](crate::QueryTree) happens in the query crate.

use serde::{Deserialize, Serialize};

/// How a clause participates in its enclosing group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Occurrence {
    /// Clause must match
    #[default]
    Must,
    /// Clause must not match
    MustNot,
    /// At least one SHOULD clause must match when the group has no MUST clause
    Should,
}

/// How a leaf value is compared
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    /// Exact match
    #[default]
    Term,
    /// Field value starts with the leaf value
    Prefix,
    /// `*` matches any run of characters, `?` any single character
    Wildcard,
}

/// A single `(field, matchType, value, occurrence)` predicate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterLeaf {
    pub field: String,
    #[serde(default)]
    pub match_type: MatchType,
    pub value: String,
    #[serde(default)]
    pub occurrence: Occurrence,
}

/// Client filter expression
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterTree {
    Group {
        #[serde(default)]
        occurrence: Occurrence,
        clauses: Vec<FilterTree>,
    },
    Leaf(FilterLeaf),
}

/// Client field name of tag predicates
pub const TAGS_FIELD: &str = "tags";

impl FilterTree {
    /// Exact-match leaf with MUST occurrence
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Leaf(FilterLeaf {
            field: field.into(),
            match_type: MatchType::Term,
            value: value.into(),
            occurrence: Occurrence::Must,
        })
    }

    /// Tag predicate `key=value`
    pub fn tag(key: &str, value: &str) -> Self {
        Self::term(TAGS_FIELD, format!("{}={}", key, value))
    }

    /// Group whose clauses must all match
    pub fn all(clauses: Vec<FilterTree>) -> Self {
        Self::Group {
            occurrence: Occurrence::Must,
            clauses,
        }
    }

    /// Clauses rewritten to SHOULD: at least one must match.
    ///
    /// The group itself is MUST so it constrains its parent.
    pub fn any(clauses: Vec<FilterTree>) -> Self {
        Self::Group {
            occurrence: Occurrence::Must,
            clauses: clauses
                .into_iter()
                .map(|c| c.with_occurrence(Occurrence::Should))
                .collect(),
        }
    }

    pub fn with_match_type(self, match_type: MatchType) -> Self {
        match self {
            Self::Leaf(leaf) => Self::Leaf(FilterLeaf { match_type, ..leaf }),
            group => group,
        }
    }

    pub fn with_occurrence(self, occurrence: Occurrence) -> Self {
        match self {
            Self::Leaf(leaf) => Self::Leaf(FilterLeaf { occurrence, ..leaf }),
            Self::Group { clauses, .. } => Self::Group {
                occurrence,
                clauses,
            },
        }
    }

    pub fn occurrence(&self) -> Occurrence {
        match self {
            Self::Leaf(leaf) => leaf.occurrence,
            Self::Group { occurrence, .. } => *occurrence,
        }
    }

    /// All leaves, depth first
    pub fn leaves(&self) -> Vec<&FilterLeaf> {
        match self {
            Self::Leaf(leaf) => vec![leaf],
            Self::Group { clauses, .. } => clauses.iter().flat_map(|c| c.leaves()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_filter() {
        let json = r#"{
            "clauses": [
                {"field": "type", "value": "aws"},
                {"field": "tags", "value": "env=prod"},
                {"occurrence": "MUST", "clauses": [
                    {"field": "tags", "value": "team=a", "occurrence": "SHOULD"},
                    {"field": "tags", "value": "team=b", "occurrence": "SHOULD"}
                ]}
            ]
        }"#;
        let tree: FilterTree = serde_json::from_str(json).unwrap();
        let leaves = tree.leaves();
        assert_eq!(leaves.len(), 4);
        assert_eq!(leaves[0].field, "type");
        assert_eq!(leaves[0].occurrence, Occurrence::Must);
        assert_eq!(leaves[3].occurrence, Occurrence::Should);
        assert_eq!(tree.occurrence(), Occurrence::Must);
    }

    #[test]
    fn test_builders() {
        let tree = FilterTree::all(vec![
            FilterTree::term("type", "aws"),
            FilterTree::any(vec![FilterTree::tag("team", "a"), FilterTree::tag("team", "b")]),
        ]);
        let leaves = tree.leaves();
        assert_eq!(leaves[1].value, "team=a");
        assert_eq!(leaves[1].occurrence, Occurrence::Should);
        assert_eq!(leaves[0].occurrence, Occurrence::Must);
    }

    #[test]
    fn test_match_type_only_applies_to_leaves() {
        let leaf = FilterTree::term("name", "prod-*").with_match_type(MatchType::Wildcard);
        assert_eq!(leaf.leaves()[0].match_type, MatchType::Wildcard);
    }
}
