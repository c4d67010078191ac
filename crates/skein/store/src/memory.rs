//! In-memory document store

use crate::eval;
use crate::query::PageLink;
use crate::{Document, DocumentStore, QueryResult, QuerySpec, StoreError, StorePage, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use skein_types::{Link, SortSpec};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Page snapshots live this long unless the query names an expiration
const DEFAULT_PAGE_TTL_SECS: i64 = 600;

/// Frozen membership of one query result
#[derive(Debug, Clone)]
struct Snapshot {
    links: Vec<Link>,
    page_size: usize,
    expand: Vec<String>,
    expires_at: DateTime<Utc>,
}

impl Snapshot {
    fn page_count(&self) -> usize {
        self.links.len().div_ceil(self.page_size)
    }
}

/// In-memory store for development and testing
#[derive(Debug, Clone)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<HashMap<Link, Document>>>,
    snapshots: Arc<RwLock<HashMap<String, Snapshot>>>,
    query_log: Arc<RwLock<Vec<QuerySpec>>>,
    failing_queries: Arc<AtomicUsize>,
    page_ttl: Duration,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            query_log: Arc::new(RwLock::new(Vec::new())),
            failing_queries: Arc::new(AtomicUsize::new(0)),
            page_ttl: Duration::seconds(DEFAULT_PAGE_TTL_SECS),
        }
    }

    /// Lifetime of page snapshots for queries without an expiration
    pub fn with_page_ttl(mut self, ttl: Duration) -> Self {
        self.page_ttl = ttl;
        self
    }

    /// Every query issued so far, in order
    pub async fn issued_queries(&self) -> Vec<QuerySpec> {
        self.query_log.read().await.clone()
    }

    /// Make the next `count` queries fail with `Unavailable`
    pub fn fail_next_queries(&self, count: usize) {
        self.failing_queries.store(count, Ordering::SeqCst);
    }

    /// Number of live documents
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        let documents = self.documents.read().await;
        documents.values().filter(|d| !d.is_expired_at(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn stamp(mut doc: Document, previous: Option<&Document>) -> Document {
        doc.version = previous.map_or(1, |p| p.version + 1);
        doc.updated_at = Utc::now();
        doc
    }
}

fn compare(a: &Document, b: &Document, sort: Option<&SortSpec>) -> CmpOrdering {
    let by_field = match sort {
        Some(sort) => {
            let ord = a
                .field_values(&sort.field)
                .first()
                .cmp(&b.field_values(&sort.field).first());
            if sort.descending {
                ord.reverse()
            } else {
                ord
            }
        }
        None => CmpOrdering::Equal,
    };
    by_field.then_with(|| a.link.cmp(&b.link))
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn put(&self, doc: Document) -> StoreResult<Document> {
        let mut documents = self.documents.write().await;
        let now = Utc::now();
        let previous = documents.get(&doc.link).filter(|d| !d.is_expired_at(now));
        let stored = Self::stamp(doc, previous);
        documents.insert(stored.link.clone(), stored.clone());
        Ok(stored)
    }

    async fn create(&self, doc: Document) -> StoreResult<Document> {
        let mut documents = self.documents.write().await;
        let now = Utc::now();
        if documents.get(&doc.link).is_some_and(|d| !d.is_expired_at(now)) {
            return Err(StoreError::Conflict(doc.link.to_string()));
        }
        let stored = Self::stamp(doc, None);
        documents.insert(stored.link.clone(), stored.clone());
        Ok(stored)
    }

    async fn replace(&self, doc: Document, expected_version: u64) -> StoreResult<Document> {
        let mut documents = self.documents.write().await;
        let current = documents
            .get(&doc.link)
            .ok_or_else(|| StoreError::NotFound(doc.link.to_string()))?;
        if current.version != expected_version {
            return Err(StoreError::Conflict(format!(
                "{} is at version {}, expected {}",
                doc.link, current.version, expected_version
            )));
        }
        let stored = Self::stamp(doc, Some(current));
        documents.insert(stored.link.clone(), stored.clone());
        Ok(stored)
    }

    async fn get(&self, link: &Link) -> StoreResult<Option<Document>> {
        let now = Utc::now();
        let documents = self.documents.read().await;
        Ok(documents.get(link).filter(|d| !d.is_expired_at(now)).cloned())
    }

    async fn get_many(&self, links: &[Link]) -> StoreResult<Vec<Document>> {
        let now = Utc::now();
        let documents = self.documents.read().await;
        Ok(links
            .iter()
            .filter_map(|l| documents.get(l))
            .filter(|d| !d.is_expired_at(now))
            .cloned()
            .collect())
    }

    async fn delete(&self, link: &Link) -> StoreResult<bool> {
        let mut documents = self.documents.write().await;
        Ok(documents.remove(link).is_some())
    }

    async fn query(&self, spec: QuerySpec) -> StoreResult<QueryResult> {
        self.query_log.write().await.push(spec.clone());
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected query failure".into()));
        }

        let now = Utc::now();
        let mut hits: Vec<Document> = {
            let documents = self.documents.read().await;
            documents
                .values()
                .filter(|d| !d.is_expired_at(now) && eval::matches(&spec.tree, d))
                .cloned()
                .collect()
        };
        hits.sort_by(|a, b| compare(a, b, spec.sort.as_ref()));

        let document_count = hits.len() as u64;
        debug!(
            clauses = spec.tree.clause_count(),
            document_count, "Query evaluated"
        );
        if hits.is_empty() {
            return Ok(QueryResult::empty());
        }

        let expires_at = spec.expires_at.unwrap_or(now + self.page_ttl);
        let snapshot_id = uuid::Uuid::new_v4().to_string();
        let snapshot = Snapshot {
            links: hits.into_iter().map(|d| d.link).collect(),
            page_size: spec.page_size.max(1),
            expand: spec.expand,
            expires_at,
        };
        self.snapshots
            .write()
            .await
            .insert(snapshot_id.clone(), snapshot);

        Ok(QueryResult {
            document_count,
            first_page: Some(PageLink::for_page(&snapshot_id, 0)),
            expires_at: Some(expires_at),
        })
    }

    async fn get_page(&self, link: &PageLink) -> StoreResult<StorePage> {
        let (snapshot_id, index) = link
            .parse()
            .ok_or_else(|| StoreError::NotFound(link.to_string()))?;

        let now = Utc::now();
        let snapshot = {
            let snapshots = self.snapshots.read().await;
            snapshots
                .get(snapshot_id)
                .filter(|s| now < s.expires_at)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(link.to_string()))?
        };

        let page_count = snapshot.page_count();
        if index >= page_count {
            return Err(StoreError::NotFound(link.to_string()));
        }

        let start = index * snapshot.page_size;
        let end = (start + snapshot.page_size).min(snapshot.links.len());
        let documents = self.get_many(&snapshot.links[start..end]).await?;

        let mut selected = BTreeMap::new();
        if !snapshot.expand.is_empty() {
            let targets: Vec<Link> = documents
                .iter()
                .flat_map(|d| snapshot.expand.iter().flat_map(|f| d.field_values(f)))
                .map(Link)
                .collect();
            for doc in self.get_many(&targets).await? {
                selected.insert(doc.link.clone(), doc);
            }
        }

        Ok(StorePage {
            link: link.clone(),
            documents,
            selected,
            next: (index + 1 < page_count).then(|| PageLink::for_page(snapshot_id, index + 1)),
            prev: (index > 0).then(|| PageLink::for_page(snapshot_id, index - 1)),
            document_count: snapshot.links.len() as u64,
            expires_at: Some(snapshot.expires_at),
        })
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut removed = 0;
        {
            let mut documents = self.documents.write().await;
            let before = documents.len();
            documents.retain(|_, d| !d.is_expired_at(now));
            removed += before - documents.len();
        }
        {
            let mut snapshots = self.snapshots.write().await;
            let before = snapshots.len();
            snapshots.retain(|_, s| now < s.expires_at);
            removed += before - snapshots.len();
        }
        if removed > 0 {
            debug!(removed, "Swept expired documents and snapshots");
        }
        Ok(removed)
    }
}
