//! Cloud provider adapter boundary

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use skein_query::{account_link, credential_link, tag_link, CloudAccount, KIND_ACCOUNT};
use skein_store::{Document, DocumentStore, StoreError};
use skein_types::Link;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Document kind of a recorded enumeration request
pub const KIND_ENUMERATION_REQUEST: &str = "enumeration-request";

/// Kinds of resource an adapter can create
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    #[default]
    CloudAccount,
    VirtualMachine,
    Disk,
    Network,
    SecurityGroup,
    LoadBalancer,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CloudAccount => "cloud_account",
            Self::VirtualMachine => "virtual_machine",
            Self::Disk => "disk",
            Self::Network => "network",
            Self::SecurityGroup => "security_group",
            Self::LoadBalancer => "load_balancer",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resource to create
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default)]
    pub kind: ResourceKind,
    /// Natural identifier; unique within one worklist
    pub name: String,
    #[serde(default)]
    pub properties: Value,
}

impl ResourceSpec {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            properties: Value::Null,
        }
    }

    pub fn cloud_account(name: impl Into<String>, endpoint_type: &str, org_id: &str) -> Self {
        Self::new(ResourceKind::CloudAccount, name)
            .with_properties(json!({ "type": endpoint_type, "orgId": org_id }))
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Adapter failure classification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Network, availability or quota; the item may be attempted again
    #[error("retryable: {0}")]
    Retryable(String),

    /// Duplicate or permanent rejection
    #[error("terminal: {0}")]
    Terminal(String),

    #[error("invalid resource: {0}")]
    Validation(String),
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Retryable(r) | Self::Terminal(r) | Self::Validation(r) => r,
        }
    }
}

impl From<StoreError> for AdapterError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::Retryable(msg),
            StoreError::InvalidData(msg) => Self::Validation(msg),
            other => Self::Terminal(other.to_string()),
        }
    }
}

/// Creates resources of one provider and triggers their follow-up work
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    /// Create the resource, returning its link
    async fn create_resource(&self, spec: &ResourceSpec) -> Result<Link, AdapterError>;

    /// Follow-up operation on a created resource (e.g. start enumeration)
    async fn trigger_side_effect(&self, kind: ResourceKind, link: &Link) -> Result<(), AdapterError>;
}

/// Adapters by resource kind
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ResourceKind, Arc<dyn ResourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ResourceKind, adapter: Arc<dyn ResourceAdapter>) -> Self {
        self.adapters.insert(kind, adapter);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Result<&Arc<dyn ResourceAdapter>, AdapterError> {
        self.adapters
            .get(&kind)
            .ok_or_else(|| AdapterError::Validation(format!("no adapter for {}", kind)))
    }

    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<_> = self.adapters.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

// ── Store-backed cloud accounts ──────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountProperties {
    #[serde(rename = "type")]
    endpoint_type: String,
    org_id: String,
    #[serde(default)]
    credential: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    services: Vec<String>,
    #[serde(default)]
    created_by: Option<String>,
}

/// Turn a display name into a link-safe id
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Writes cloud accounts into the document store
pub struct StoreAccountAdapter {
    store: Arc<dyn DocumentStore>,
}

impl StoreAccountAdapter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResourceAdapter for StoreAccountAdapter {
    async fn create_resource(&self, spec: &ResourceSpec) -> Result<Link, AdapterError> {
        if spec.kind != ResourceKind::CloudAccount {
            return Err(AdapterError::Validation(format!(
                "cannot create {} as a cloud account",
                spec.kind
            )));
        }
        let props: AccountProperties = serde_json::from_value(spec.properties.clone())
            .map_err(|e| AdapterError::Validation(format!("{}: {}", spec.name, e)))?;
        let id = slug(&spec.name);
        if id.is_empty() {
            return Err(AdapterError::Validation(format!("unusable name {:?}", spec.name)));
        }

        let mut account = CloudAccount::new(spec.name.clone(), props.endpoint_type, &props.org_id);
        if let Some(credential) = &props.credential {
            account = account.with_credential(credential_link(credential));
        }
        for tag in &props.tags {
            account = account.with_tag(tag_link(tag));
        }
        for service in &props.services {
            account = account.with_service(service);
        }
        if let Some(principal) = props.created_by {
            account = account.created_by(principal);
        }

        let link = account_link(&id);
        let doc = Document::new(link.clone(), KIND_ACCOUNT, &account)?;
        match self.store.create(doc).await {
            Ok(_) => Ok(link),
            Err(StoreError::Conflict(_)) => Err(AdapterError::Terminal(format!(
                "cloud account {} already exists",
                spec.name
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn trigger_side_effect(&self, kind: ResourceKind, link: &Link) -> Result<(), AdapterError> {
        let request = json!({
            "resourceKind": kind,
            "resourceLink": link,
            "requestedAt": Utc::now(),
        });
        let doc = Document::from_value(
            Link::new(format!("/enumeration-requests/{}", link.id())),
            KIND_ENUMERATION_REQUEST,
            request,
        );
        self.store.put(doc).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_store::InMemoryDocumentStore;

    #[test]
    fn test_slug() {
        assert_eq!(slug("  Prod AWS / us-east-1 "), "prod-aws-us-east-1");
        assert_eq!(slug("***"), "");
    }

    #[tokio::test]
    async fn test_creates_account_document() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let adapter = StoreAccountAdapter::new(store.clone());
        let spec = ResourceSpec::cloud_account("Prod AWS", "aws", "acme").with_properties(json!({
            "type": "aws",
            "orgId": "acme",
            "credential": "c1",
            "tags": ["env-prod"],
            "services": ["EC2"],
        }));

        let link = adapter.create_resource(&spec).await.unwrap();
        assert_eq!(link, account_link("prod-aws"));

        let account: CloudAccount = store.get(&link).await.unwrap().unwrap().decode().unwrap();
        assert_eq!(account.endpoint_type, "aws");
        assert_eq!(account.credential_link, Some(credential_link("c1")));
        assert_eq!(account.service_keys, vec!["service:ec2"]);
    }

    #[tokio::test]
    async fn test_duplicate_is_terminal() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let adapter = StoreAccountAdapter::new(store);
        let spec = ResourceSpec::cloud_account("dup", "aws", "acme");
        adapter.create_resource(&spec).await.unwrap();

        let err = adapter.create_resource(&spec).await.unwrap_err();
        assert!(matches!(err, AdapterError::Terminal(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_bad_properties_are_validation_errors() {
        let adapter = StoreAccountAdapter::new(Arc::new(InMemoryDocumentStore::new()));
        let spec = ResourceSpec::new(ResourceKind::CloudAccount, "x").with_properties(json!({ "type": "aws" }));
        assert!(matches!(adapter.create_resource(&spec).await, Err(AdapterError::Validation(_))));

        let spec = ResourceSpec::new(ResourceKind::Disk, "d");
        assert!(matches!(adapter.create_resource(&spec).await, Err(AdapterError::Validation(_))));
    }

    #[tokio::test]
    async fn test_side_effect_records_request() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let adapter = StoreAccountAdapter::new(store.clone());
        adapter
            .trigger_side_effect(ResourceKind::CloudAccount, &account_link("a1"))
            .await
            .unwrap();
        let doc = store
            .get(&Link::new("/enumeration-requests/a1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.kind, KIND_ENUMERATION_REQUEST);
        assert_eq!(doc.body["resourceLink"], "/accounts/a1");
    }

    #[test]
    fn test_registry_rejects_unknown_kind() {
        let registry = AdapterRegistry::new();
        assert!(matches!(registry.get(ResourceKind::Network), Err(AdapterError::Validation(_))));
    }
}
