//! API-shaped views of cloud accounts

use crate::lookup::PageLookups;
use crate::model::CloudAccount;
use serde::{Deserialize, Serialize};
use skein_store::StorePage;
use skein_types::Link;
use tracing::warn;

/// Placeholder shown instead of a credential secret
pub const MASKED_SECRET: &str = "********";

/// Entity name of primary documents in errors
const ACCOUNT_ENTITY: &str = "cloud account";

/// One primary document of a page, decoded or not
pub type AccountEntry = (Link, Result<CloudAccount, EntityError>);

/// A joined entity that could not be resolved
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityError {
    pub link: Link,
    pub entity: String,
    pub message: String,
}

impl EntityError {
    fn missing(link: &Link, entity: &str) -> Self {
        Self {
            link: link.clone(),
            entity: entity.to_string(),
            message: format!("{} {} not found", entity, link),
        }
    }

    fn unreadable(link: &Link, entity: &str, reason: impl std::fmt::Display) -> Self {
        Self {
            link: link.clone(),
            entity: entity.to_string(),
            message: format!("{} {} is unreadable: {}", entity, link, reason),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationView {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialView {
    pub link: Link,
    pub private_key_id: String,
    pub private_key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagView {
    pub key: String,
    pub value: String,
}

/// One cloud account with its joins resolved
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudAccountView {
    pub id: String,
    pub link: Link,
    pub name: String,
    #[serde(rename = "type")]
    pub endpoint_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<OrganizationView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialView>,
    #[serde(default)]
    pub tags: Vec<TagView>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// Joins that failed; the view is still returned
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<EntityError>,
}

impl CloudAccountView {
    /// Stand-in for a primary document that could not be decoded
    pub fn unreadable(link: &Link, error: EntityError) -> Self {
        Self {
            id: link.id().to_string(),
            link: link.clone(),
            name: String::new(),
            endpoint_type: String::new(),
            organization: None,
            credential: None,
            tags: Vec::new(),
            services: Vec::new(),
            created_by: None,
            errors: vec![error],
        }
    }
}

/// Decode the accounts of a page, keeping undecodable ones in place
pub fn decode_accounts(page: &StorePage) -> Vec<AccountEntry> {
    page.documents
        .iter()
        .map(|doc| {
            let account = doc.decode::<CloudAccount>().map_err(|e| {
                warn!(link = %doc.link, error = %e, "Undecodable account on page");
                EntityError::unreadable(&doc.link, ACCOUNT_ENTITY, e)
            });
            (doc.link.clone(), account)
        })
        .collect()
}

/// The decoded accounts only, for batched lookups
pub fn readable(entries: &[AccountEntry]) -> Vec<(Link, CloudAccount)> {
    entries
        .iter()
        .filter_map(|(link, account)| account.as_ref().ok().map(|a| (link.clone(), a.clone())))
        .collect()
}

/// One view per entry, in page order
pub fn assemble_page(entries: &[AccountEntry], lookups: &PageLookups) -> Vec<CloudAccountView> {
    entries
        .iter()
        .map(|(link, account)| match account {
            Ok(account) => assemble(link, account, lookups),
            Err(error) => CloudAccountView::unreadable(link, error.clone()),
        })
        .collect()
}

/// Build the view of one account from the page's lookups
pub fn assemble(link: &Link, account: &CloudAccount, lookups: &PageLookups) -> CloudAccountView {
    let mut errors = Vec::new();

    let organization = match lookups.organizations.get(&account.org_link) {
        Some(org) => Some(OrganizationView {
            id: org.id.clone(),
            name: org.name.clone(),
        }),
        None => {
            errors.push(EntityError::missing(&account.org_link, "organization"));
            None
        }
    };

    let credential = account.credential_link.as_ref().and_then(|cred_link| {
        match lookups.credentials.get(cred_link) {
            Some(cred) => Some(CredentialView {
                link: cred_link.clone(),
                private_key_id: cred.private_key_id.clone(),
                private_key: if lookups.privileged {
                    cred.private_key.clone()
                } else {
                    MASKED_SECRET.to_string()
                },
            }),
            None => {
                errors.push(EntityError::missing(cred_link, "credential"));
                None
            }
        }
    });

    let mut tags = Vec::with_capacity(account.tag_links.len());
    for tag_link in &account.tag_links {
        match lookups.tags.get(tag_link) {
            Some(tag) => tags.push(TagView {
                key: tag.key.clone(),
                value: tag.value.clone(),
            }),
            None => errors.push(EntityError::missing(tag_link, "tag")),
        }
    }

    CloudAccountView {
        id: link.id().to_string(),
        link: link.clone(),
        name: account.name.clone(),
        endpoint_type: account.endpoint_type.clone(),
        organization,
        credential,
        tags,
        services: account
            .service_keys
            .iter()
            .map(|k| k.strip_prefix("service:").unwrap_or(k).to_string())
            .collect(),
        created_by: account.created_by.clone(),
        errors,
    }
}
