//! Storage-native query trees
//!
//! Every leaf of a QueryTree names a field as it is stored in documents.
//! Link-set clauses (`AnyOf`) carry the results of resolved side queries.

use crate::{MatchType, Occurrence};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Document link: the durable key of a stored document
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Link(pub String);

impl Link {
    pub fn new(link: impl Into<String>) -> Self {
        Self(link.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, e.g. `prod` for `/orgs/prod`
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Link {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Virtual field holding a document's link
pub const FIELD_SELF_LINK: &str = "documentSelfLink";

/// Virtual field holding a document's kind
pub const FIELD_KIND: &str = "documentKind";

/// Query over stored documents
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QueryTree {
    /// Compare a field against one value
    #[serde(rename_all = "camelCase")]
    Term {
        field: String,
        value: String,
        match_type: MatchType,
        occurrence: Occurrence,
        /// Compare lower-cased field values; `value` is already lower case
        case_insensitive: bool,
    },
    /// Field (or any element of an array field) is one of `values`
    AnyOf {
        field: String,
        values: BTreeSet<String>,
        occurrence: Occurrence,
    },
    Group {
        occurrence: Occurrence,
        clauses: Vec<QueryTree>,
    },
}

impl QueryTree {
    /// Exact-match MUST clause
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
            match_type: MatchType::Term,
            occurrence: Occurrence::Must,
            case_insensitive: false,
        }
    }

    /// Prefix MUST clause
    pub fn prefix(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
            match_type: MatchType::Prefix,
            occurrence: Occurrence::Must,
            case_insensitive: false,
        }
    }

    /// Restrict to one document kind
    pub fn kind(kind: &str) -> Self {
        Self::term(FIELD_KIND, kind)
    }

    /// MUST clause over a set of values, typically resolved links
    pub fn any_of<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AnyOf {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
            occurrence: Occurrence::Must,
        }
    }

    /// Group whose clauses keep their own occurrence
    pub fn group(clauses: Vec<QueryTree>) -> Self {
        Self::Group {
            occurrence: Occurrence::Must,
            clauses,
        }
    }

    pub fn occurrence(&self) -> Occurrence {
        match self {
            Self::Term { occurrence, .. }
            | Self::AnyOf { occurrence, .. }
            | Self::Group { occurrence, .. } => *occurrence,
        }
    }

    pub fn with_occurrence(mut self, occ: Occurrence) -> Self {
        match &mut self {
            Self::Term { occurrence, .. }
            | Self::AnyOf { occurrence, .. }
            | Self::Group { occurrence, .. } => *occurrence = occ,
        }
        self
    }

    /// AND another clause into this tree
    pub fn and(self, clause: QueryTree) -> Self {
        match self {
            Self::Group {
                occurrence: Occurrence::Must,
                mut clauses,
            } => {
                clauses.push(clause);
                Self::group(clauses)
            }
            other => Self::group(vec![other, clause]),
        }
    }

    /// Number of clauses in the tree, groups included
    pub fn clause_count(&self) -> usize {
        match self {
            Self::Group { clauses, .. } => 1 + clauses.iter().map(|c| c.clause_count()).sum::<usize>(),
            _ => 1,
        }
    }

    /// Whether any clause in the tree references `field`
    pub fn references(&self, field: &str) -> bool {
        match self {
            Self::Term { field: f, .. } | Self::AnyOf { field: f, .. } => f == field,
            Self::Group { clauses, .. } => clauses.iter().any(|c| c.references(field)),
        }
    }
}

/// Sort order of query results
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortSpec {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }
}
