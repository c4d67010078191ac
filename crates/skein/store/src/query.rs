//! Query specifications and result pages

use crate::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skein_types::{Link, QueryTree, SortSpec};
use std::collections::BTreeMap;

/// Default number of documents per page
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// A query over stored documents
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    pub tree: QueryTree,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
    pub page_size: usize,
    /// Link-valued fields whose target documents are pre-fetched per page
    #[serde(default)]
    pub expand: Vec<String>,
    /// When the result snapshot and its pages stop being readable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl QuerySpec {
    pub fn new(tree: QueryTree) -> Self {
        Self {
            tree,
            sort: None,
            page_size: DEFAULT_PAGE_SIZE,
            expand: Vec::new(),
            expires_at: None,
        }
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn expanding(mut self, field: impl Into<String>) -> Self {
        self.expand.push(field.into());
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Address of one page of a query result
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageLink(pub String);

impl PageLink {
    const PREFIX: &'static str = "/pages/";

    pub fn for_page(snapshot: &str, index: usize) -> Self {
        Self(format!("{}{}/{}", Self::PREFIX, snapshot, index))
    }

    /// Split into snapshot id and page index
    pub(crate) fn parse(&self) -> Option<(&str, usize)> {
        let rest = self.0.strip_prefix(Self::PREFIX)?;
        let (snapshot, index) = rest.rsplit_once('/')?;
        Some((snapshot, index.parse().ok()?))
    }
}

impl std::fmt::Display for PageLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of issuing a query
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub document_count: u64,
    /// Absent when nothing matched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_page: Option<PageLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            document_count: 0,
            first_page: None,
            expires_at: None,
        }
    }
}

/// One page of raw documents
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePage {
    pub link: PageLink,
    pub documents: Vec<Document>,
    /// Pre-fetched targets of the query's expanded link fields
    #[serde(default)]
    pub selected: BTreeMap<Link, Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<PageLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<PageLink>,
    /// Size of the whole result set
    pub document_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}
