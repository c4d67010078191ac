//! Document store trait

use crate::{Document, PageLink, QueryResult, QuerySpec, StorePage, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skein_types::Link;

/// Durable document storage with paginated queries
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or overwrite a document, returning the stored version
    async fn put(&self, doc: Document) -> StoreResult<Document>;

    /// Create a document; fails with `Conflict` when the link is taken
    async fn create(&self, doc: Document) -> StoreResult<Document>;

    /// Overwrite a document only if its stored version is `expected_version`
    async fn replace(&self, doc: Document, expected_version: u64) -> StoreResult<Document>;

    /// Get a document by link
    async fn get(&self, link: &Link) -> StoreResult<Option<Document>>;

    /// Get several documents; missing links are skipped
    async fn get_many(&self, links: &[Link]) -> StoreResult<Vec<Document>>;

    /// Delete a document by link
    async fn delete(&self, link: &Link) -> StoreResult<bool>;

    /// Run a query, freezing its result set behind page links
    async fn query(&self, spec: QuerySpec) -> StoreResult<QueryResult>;

    /// Fetch one page of a previous query
    async fn get_page(&self, link: &PageLink) -> StoreResult<StorePage>;

    /// Remove documents and page snapshots that expired before `now`
    async fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<usize>;

    /// Run a query and walk every page
    async fn query_all(&self, spec: QuerySpec) -> StoreResult<Vec<Document>> {
        let result = self.query(spec).await?;
        let mut documents = Vec::with_capacity(result.document_count as usize);
        let mut next = result.first_page;
        while let Some(link) = next {
            let page = self.get_page(&link).await?;
            documents.extend(page.documents);
            next = page.next;
        }
        Ok(documents)
    }
}
