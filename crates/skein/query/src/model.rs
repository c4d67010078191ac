//! Documents the query engine reads
//!
//! Cloud accounts are the primary entity. Organizations, credentials,
//! tags and user profiles are joined onto each result page.

use serde::{Deserialize, Serialize};
use skein_types::Link;
use std::collections::BTreeSet;

// ── Document kinds ───────────────────────────────────────────────────

pub const KIND_ACCOUNT: &str = "cloud-account";
pub const KIND_ORGANIZATION: &str = "organization";
pub const KIND_CREDENTIAL: &str = "credential";
pub const KIND_TAG: &str = "tag";
pub const KIND_USER: &str = "user-profile";
pub const KIND_CURSOR: &str = "page-cursor";

/// Role that may read credential secrets
pub const ROLE_ADMIN: &str = "admin";

pub fn account_link(id: &str) -> Link {
    Link::new(format!("/accounts/{}", id))
}

pub fn org_link(id: &str) -> Link {
    Link::new(format!("/orgs/{}", id))
}

pub fn credential_link(id: &str) -> Link {
    Link::new(format!("/credentials/{}", id))
}

pub fn tag_link(id: &str) -> Link {
    Link::new(format!("/tags/{}", id))
}

pub fn user_link(principal: &str) -> Link {
    Link::new(format!("/users/{}", principal))
}

/// Composite key stored in `serviceKeys`
pub fn service_key(service: &str) -> String {
    format!("service:{}", service.to_lowercase())
}

// ── Entities ─────────────────────────────────────────────────────────

/// A registered cloud endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudAccount {
    pub name: String,
    /// Provider type, e.g. `aws`, `azure`, `gcp`
    pub endpoint_type: String,
    pub org_link: Link,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_link: Option<Link>,
    #[serde(default)]
    pub tag_links: Vec<Link>,
    #[serde(default)]
    pub service_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl CloudAccount {
    pub fn new(name: impl Into<String>, endpoint_type: impl Into<String>, org_id: &str) -> Self {
        Self {
            name: name.into(),
            endpoint_type: endpoint_type.into(),
            org_link: org_link(org_id),
            credential_link: None,
            tag_links: Vec::new(),
            service_keys: Vec::new(),
            created_by: None,
        }
    }

    pub fn with_credential(mut self, link: Link) -> Self {
        self.credential_link = Some(link);
        self
    }

    pub fn with_tag(mut self, link: Link) -> Self {
        self.tag_links.push(link);
        self
    }

    pub fn with_service(mut self, service: &str) -> Self {
        self.service_keys.push(service_key(service));
        self
    }

    pub fn created_by(mut self, principal: impl Into<String>) -> Self {
        self.created_by = Some(principal.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub private_key_id: String,
    /// Secret; masked in views unless the caller is privileged
    pub private_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
}

/// Where a tag came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagOrigin {
    /// Read from the provider during enumeration
    Discovered,
    /// Assigned by a user
    UserDefined,
    /// Internal bookkeeping; never matched by tag filters
    System,
}

impl TagOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "DISCOVERED",
            Self::UserDefined => "USER_DEFINED",
            Self::System => "SYSTEM",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub origins: BTreeSet<TagOrigin>,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>, origin: TagOrigin) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            origins: BTreeSet::from([origin]),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub principal: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserProfile {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ROLE_ADMIN)
    }
}

/// Who is asking, and within which organization.
///
/// Carries no privilege of its own: whether the principal may read
/// credential secrets is looked up from its stored [`UserProfile`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantScope {
    pub org_id: String,
    pub principal: String,
}

impl TenantScope {
    pub fn new(org_id: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            principal: principal.into(),
        }
    }
}
