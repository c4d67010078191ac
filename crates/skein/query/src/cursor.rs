//! Page cursors
//!
//! A cursor is a TTL'd document naming one backing store page and the
//! tenant it was issued to. Fetching it materializes that page into
//! views and creates the cursors of the neighbouring pages, which expire
//! together with the originating query. Cursor keys derive from the
//! backing page, so fetching a page twice hands out the same neighbours.

use crate::lookup::LookupResolver;
use crate::model::{TenantScope, KIND_CURSOR};
use crate::view::{assemble_page, decode_accounts, readable, CloudAccountView};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skein_store::{Document, DocumentStore, PageLink, StoreError, StorePage};
use skein_types::{Link, PageCursorId, ResultPage, SkeinError, SkeinResult};
use std::sync::Arc;
use tracing::debug;

/// Persisted cursor document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCursor {
    pub id: PageCursorId,
    pub backing_page: PageLink,
    /// Caller the page is materialized for
    pub tenant: TenantScope,
    pub expires_at: DateTime<Utc>,
}

pub fn cursor_link(id: &PageCursorId) -> Link {
    Link::new(format!("/cursors/{}", id))
}

fn cursor_id(backing_page: &PageLink, tenant: &TenantScope) -> PageCursorId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(backing_page.0.as_bytes());
    hasher.update(&[0]);
    hasher.update(tenant.principal.as_bytes());
    hasher.update(&[0]);
    hasher.update(tenant.org_id.as_bytes());
    let hex = hasher.finalize().to_hex();
    PageCursorId::new(&hex.as_str()[..32])
}

/// Creates, reads and materializes page cursors
#[derive(Clone)]
pub struct PageCursorService {
    store: Arc<dyn DocumentStore>,
    lookups: LookupResolver,
}

impl PageCursorService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            lookups: LookupResolver::new(Arc::clone(&store)),
            store,
        }
    }

    /// Persist a cursor for `backing_page`; an existing one is reused
    pub async fn create(
        &self,
        backing_page: &PageLink,
        tenant: &TenantScope,
        expires_at: DateTime<Utc>,
    ) -> SkeinResult<PageCursorId> {
        let cursor = PageCursor {
            id: cursor_id(backing_page, tenant),
            backing_page: backing_page.clone(),
            tenant: tenant.clone(),
            expires_at,
        };
        let doc = Document::new(cursor_link(&cursor.id), KIND_CURSOR, &cursor)?
            .with_expiration(Some(expires_at));

        match self.store.create(doc).await {
            Ok(_) => debug!(cursor = %cursor.id, page = %backing_page, "Page cursor created"),
            Err(StoreError::Conflict(_)) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(cursor.id)
    }

    /// Read a live cursor
    pub async fn get(&self, id: &PageCursorId) -> SkeinResult<PageCursor> {
        let doc = self
            .store
            .get(&cursor_link(id))
            .await?
            .ok_or_else(|| SkeinError::NotFound(format!("page cursor {}", id)))?;
        Ok(doc.decode()?)
    }

    /// Fetch the page behind a cursor
    pub async fn fetch(&self, id: &PageCursorId) -> SkeinResult<ResultPage<CloudAccountView>> {
        let cursor = self.get(id).await?;
        if Utc::now() >= cursor.expires_at {
            return Err(SkeinError::NotFound(format!("page cursor {}", id)));
        }
        let page = self.store.get_page(&cursor.backing_page).await?;
        self.materialize(&page, &cursor.tenant, cursor.expires_at).await
    }

    /// Turn a store page into views, creating neighbour cursors that
    /// expire at `expires_at`
    pub async fn materialize(
        &self,
        page: &StorePage,
        tenant: &TenantScope,
        expires_at: DateTime<Utc>,
    ) -> SkeinResult<ResultPage<CloudAccountView>> {
        let entries = decode_accounts(page);
        let lookups = self
            .lookups
            .resolve(page, &readable(&entries), tenant)
            .await?;
        let items = assemble_page(&entries, &lookups);

        let next_cursor = match &page.next {
            Some(link) => Some(self.create(link, tenant, expires_at).await?),
            None => None,
        };
        let prev_cursor = match &page.prev {
            Some(link) => Some(self.create(link, tenant, expires_at).await?),
            None => None,
        };

        Ok(ResultPage {
            items,
            next_cursor,
            prev_cursor,
            total_count: page.document_count,
        })
    }
}
