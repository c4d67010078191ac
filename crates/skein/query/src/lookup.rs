//! Batched secondary lookups for one result page

use crate::model::{user_link, CloudAccount, Credential, Organization, Tag, UserProfile};
use crate::view::MASKED_SECRET;
use crate::TenantScope;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use skein_store::{Document, DocumentStore, StorePage};
use skein_types::{Link, SkeinResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Entities joined onto one page of accounts
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLookups {
    pub organizations: BTreeMap<Link, Organization>,
    pub credentials: BTreeMap<Link, Credential>,
    pub tags: BTreeMap<Link, Tag>,
    /// Whether the caller may read credential secrets
    pub privileged: bool,
}

/// Resolves the organizations, credentials and tags a page refers to
#[derive(Clone)]
pub struct LookupResolver {
    store: Arc<dyn DocumentStore>,
}

impl LookupResolver {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// One batch per entity kind, plus one permission lookup per page.
    /// Credentials and tags come from the page's pre-fetched documents
    /// when present.
    pub async fn resolve(
        &self,
        page: &StorePage,
        accounts: &[(Link, CloudAccount)],
        tenant: &TenantScope,
    ) -> SkeinResult<PageLookups> {
        let org_links: BTreeSet<Link> = accounts.iter().map(|(_, a)| a.org_link.clone()).collect();
        let credential_links: BTreeSet<Link> = accounts
            .iter()
            .filter_map(|(_, a)| a.credential_link.clone())
            .collect();
        let tag_links: BTreeSet<Link> = accounts
            .iter()
            .flat_map(|(_, a)| a.tag_links.iter().cloned())
            .collect();

        let org_docs = self.fetch(&org_links).await?;

        let mut missing: Vec<Link> = credential_links
            .iter()
            .chain(tag_links.iter())
            .filter(|l| !page.selected.contains_key(*l))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        let mut joined: BTreeMap<Link, Document> = page.selected.clone();
        if !missing.is_empty() {
            debug!(missing = missing.len(), "Fetching joined documents absent from page");
            for doc in self.store.get_many(&missing).await? {
                joined.insert(doc.link.clone(), doc);
            }
        }

        let privileged = self.is_privileged(tenant).await?;
        let mut credentials: BTreeMap<Link, Credential> =
            decode_all(credential_links.iter().filter_map(|l| joined.get(l)));
        if !privileged {
            // masked before anything downstream can persist them
            for credential in credentials.values_mut() {
                credential.private_key = MASKED_SECRET.to_string();
            }
        }

        Ok(PageLookups {
            organizations: decode_all(org_docs.iter()),
            credentials,
            tags: decode_all(tag_links.iter().filter_map(|l| joined.get(l))),
            privileged,
        })
    }

    async fn fetch(&self, links: &BTreeSet<Link>) -> SkeinResult<Vec<Document>> {
        if links.is_empty() {
            return Ok(Vec::new());
        }
        let links: Vec<Link> = links.iter().cloned().collect();
        Ok(self.store.get_many(&links).await?)
    }

    async fn is_privileged(&self, tenant: &TenantScope) -> SkeinResult<bool> {
        let Some(doc) = self.store.get(&user_link(&tenant.principal)).await? else {
            return Ok(false);
        };
        Ok(doc.decode::<UserProfile>().map(|p| p.is_admin()).unwrap_or(false))
    }
}

/// Decode documents, dropping the ones that do not parse
fn decode_all<'a, T, I>(docs: I) -> BTreeMap<Link, T>
where
    T: DeserializeOwned,
    I: Iterator<Item = &'a Document>,
{
    docs.filter_map(|doc| match doc.decode::<T>() {
        Ok(value) => Some((doc.link.clone(), value)),
        Err(e) => {
            warn!(link = %doc.link, error = %e, "Skipping undecodable document");
            None
        }
    })
    .collect()
}
