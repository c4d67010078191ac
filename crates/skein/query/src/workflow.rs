//! The query workflow
//!
//! ```text
//! ResolveTags ─► QueryPrimary ─► ResolveLookups ─► AssembleViews ─► EmitResult
//!      │               │
//!      └───────────────┴──── empty result ──────────────────────────►┘
//! ```
//!
//! Every step reads the store only, so each is safe to re-run.

use crate::cursor::PageCursorService;
use crate::lookup::{LookupResolver, PageLookups};
use crate::model::{org_link, TenantScope, KIND_ACCOUNT};
use crate::tags::{TagResolution, TagResolutionEngine, TagResolutionState, TAG_LINKS_FIELD};
use crate::translate::{translate, translate_resolved, FieldMap};
use crate::view::{assemble_page, decode_accounts, readable, CloudAccountView};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skein_runtime::Workflow;
use skein_store::{DocumentStore, PageLink, QuerySpec, StorePage};
use skein_types::{
    FilterTree, Occurrence, QueryTree, ResultPage, SelfUpdate, SkeinError, SkeinResult,
    SortSpec, WorkflowInstance, WorkflowKind,
};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 500;

// ── Kind ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct QueryKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStage {
    ResolveTags,
    QueryPrimary,
    ResolveLookups,
    AssembleViews,
    EmitResult,
}

/// A cloud account listing request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterTree>,
    #[serde(alias = "tenantScope")]
    pub tenant: TenantScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
}

impl QueryInput {
    pub fn new(tenant: TenantScope) -> Self {
        Self {
            filter: None,
            tenant,
            page_size: None,
        }
    }

    pub fn with_filter(mut self, filter: FilterTree) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// Scratch state carried between steps
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryWork {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TagResolutionState>,
    pub document_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_page_link: Option<PageLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_page: Option<StorePage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookups: Option<PageLookups>,
    #[serde(default)]
    pub views: Vec<CloudAccountView>,
}

/// Result of a finished query
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutput {
    pub document_count: u64,
    pub results: ResultPage<CloudAccountView>,
}

impl WorkflowKind for QueryKind {
    const KIND: &'static str = "query";
    type SubStage = QueryStage;
    type Input = QueryInput;
    type Work = QueryWork;
    type Output = QueryOutput;
}

type Instance = WorkflowInstance<QueryKind>;
type Update = SelfUpdate<QueryKind>;

// ── Workflow ─────────────────────────────────────────────────────────

/// Federated cloud account query
pub struct QueryWorkflow {
    store: Arc<dyn DocumentStore>,
    fields: FieldMap,
    tags: TagResolutionEngine,
    lookups: LookupResolver,
    cursors: PageCursorService,
    default_page_size: usize,
    max_page_size: usize,
}

impl QueryWorkflow {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            fields: FieldMap::cloud_accounts(),
            tags: TagResolutionEngine::new(Arc::clone(&store)),
            lookups: LookupResolver::new(Arc::clone(&store)),
            cursors: PageCursorService::new(Arc::clone(&store)),
            store,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }

    pub fn with_page_sizes(mut self, default_page_size: usize, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size.max(1);
        self.default_page_size = default_page_size.clamp(1, self.max_page_size);
        self
    }

    pub fn with_fields(mut self, fields: FieldMap) -> Self {
        self.fields = fields;
        self
    }

    pub fn cursors(&self) -> &PageCursorService {
        &self.cursors
    }

    fn page_size(&self, input: &QueryInput) -> usize {
        input
            .page_size
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }

    fn expires_at(instance: &Instance) -> SkeinResult<DateTime<Utc>> {
        instance.expires_at.ok_or_else(|| {
            SkeinError::Validation(format!("query {} has no expiration", instance.id))
        })
    }

    /// The tenant scope, the translated filter and the resolved tag sets
    fn primary_tree(&self, instance: &Instance) -> SkeinResult<QueryTree> {
        let input = &instance.input;
        let mut tree = QueryTree::kind(KIND_ACCOUNT)
            .and(QueryTree::term("orgLink", org_link(&input.tenant.org_id).0));
        if let Some(filter) = &input.filter {
            let placed = instance
                .work
                .tags
                .as_ref()
                .map(|t| t.placed_links.clone())
                .unwrap_or_default();
            if let Some(translated) = translate_resolved(filter, &self.fields, &placed)?.tree {
                // a Should root is optional within the filter, not next to the scope
                tree = tree.and(QueryTree::group(vec![translated]));
            }
        }
        if let Some(tags) = &instance.work.tags {
            tree = tags.apply(tree);
        }
        Ok(tree)
    }

    // ── Steps ────────────────────────────────────────────────────────

    async fn resolve_tags(&self, instance: &Instance) -> SkeinResult<Update> {
        let mut work = instance.work.clone();
        let deferred = match &instance.input.filter {
            Some(filter) => translate(filter, &self.fields)?.deferred,
            None => Vec::new(),
        };

        match self.tags.resolve(&deferred, Occurrence::Should).await? {
            TagResolution::Resolved(state) => {
                work.tags = Some(state);
                Ok(Update::proceed(QueryStage::QueryPrimary, work))
            }
            TagResolution::ShortCircuit { key, value } => {
                info!(
                    instance_id = %instance.id,
                    tag = %format!("{}={}", key, value),
                    "Required tag matched nothing, skipping primary query"
                );
                work.document_count = 0;
                Ok(Update::proceed(QueryStage::EmitResult, work))
            }
        }
    }

    async fn query_primary(&self, instance: &Instance) -> SkeinResult<Update> {
        let spec = QuerySpec::new(self.primary_tree(instance)?)
            .with_sort(SortSpec::ascending("name"))
            .with_page_size(self.page_size(&instance.input))
            .expanding("credentialLink")
            .expanding(TAG_LINKS_FIELD)
            .expiring_at(Self::expires_at(instance)?);
        let result = self.store.query(spec).await?;
        debug!(instance_id = %instance.id, document_count = result.document_count, "Primary query issued");

        let mut work = instance.work.clone();
        work.document_count = result.document_count;
        work.first_page_link = result.first_page;
        let next = if work.first_page_link.is_some() {
            QueryStage::ResolveLookups
        } else {
            QueryStage::EmitResult
        };
        Ok(Update::proceed(next, work))
    }

    async fn resolve_lookups(&self, instance: &Instance) -> SkeinResult<Update> {
        let mut work = instance.work.clone();
        let link = work
            .first_page_link
            .clone()
            .ok_or_else(|| SkeinError::Validation("no first page to resolve".into()))?;
        let mut page = self.store.get_page(&link).await?;
        let accounts = readable(&decode_accounts(&page));
        work.lookups = Some(
            self.lookups
                .resolve(&page, &accounts, &instance.input.tenant)
                .await?,
        );
        // joined documents live on in the masked lookups only
        page.selected.clear();
        work.first_page = Some(page);
        Ok(Update::proceed(QueryStage::AssembleViews, work))
    }

    fn assemble_views(&self, instance: &Instance) -> SkeinResult<Update> {
        let mut work = instance.work.clone();
        let (Some(page), Some(lookups)) = (&work.first_page, &work.lookups) else {
            return Err(SkeinError::Validation("lookups not resolved".into()));
        };
        work.views = assemble_page(&decode_accounts(page), lookups);
        Ok(Update::proceed(QueryStage::EmitResult, work))
    }

    async fn emit_result(&self, instance: &Instance) -> SkeinResult<Update> {
        let work = &instance.work;
        let expires_at = Self::expires_at(instance)?;
        let next_cursor = match work.first_page.as_ref().and_then(|p| p.next.as_ref()) {
            Some(link) => Some(
                self.cursors
                    .create(link, &instance.input.tenant, expires_at)
                    .await?,
            ),
            None => None,
        };

        Ok(Update::finish(QueryOutput {
            document_count: work.document_count,
            results: ResultPage {
                items: work.views.clone(),
                next_cursor,
                prev_cursor: None,
                total_count: work.document_count,
            },
        }))
    }
}

#[async_trait]
impl Workflow for QueryWorkflow {
    type Kind = QueryKind;

    fn entry_sub_stage(&self) -> QueryStage {
        QueryStage::ResolveTags
    }

    fn validate(&self, input: &QueryInput) -> SkeinResult<()> {
        if input.tenant.org_id.is_empty() {
            return Err(SkeinError::Validation("tenant org id is required".into()));
        }
        if input.page_size == Some(0) {
            return Err(SkeinError::Validation("page size must be positive".into()));
        }
        if let Some(filter) = &input.filter {
            translate(filter, &self.fields)?;
        }
        Ok(())
    }

    async fn handle_sub_stage(&self, instance: &Instance) -> SkeinResult<Update> {
        match instance.sub_stage {
            Some(QueryStage::ResolveTags) | None => self.resolve_tags(instance).await,
            Some(QueryStage::QueryPrimary) => self.query_primary(instance).await,
            Some(QueryStage::ResolveLookups) => self.resolve_lookups(instance).await,
            Some(QueryStage::AssembleViews) => self.assemble_views(instance),
            Some(QueryStage::EmitResult) => self.emit_result(instance).await,
        }
    }

    fn step_is_retryable(&self, _sub_stage: &QueryStage) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::view::MASKED_SECRET;
    use skein_runtime::{RuntimeConfig, WorkflowRuntime};
    use skein_store::{Document, InMemoryDocumentStore};
    use skein_types::{Link, TaskStage};

    async fn put<T: Serialize>(store: &InMemoryDocumentStore, link: Link, kind: &str, body: &T) {
        store.put(Document::new(link, kind, body).unwrap()).await.unwrap();
    }

    async fn seeded() -> Arc<InMemoryDocumentStore> {
        let store = Arc::new(InMemoryDocumentStore::new());
        put(&store, tag_link("env-prod"), KIND_TAG, &Tag::new("env", "prod", TagOrigin::UserDefined)).await;
        put(&store, tag_link("team-a"), KIND_TAG, &Tag::new("team", "a", TagOrigin::UserDefined)).await;
        put(&store, tag_link("team-b"), KIND_TAG, &Tag::new("team", "b", TagOrigin::Discovered)).await;

        let accounts = [
            ("a1", CloudAccount::new("alpha", "aws", "acme").with_tag(tag_link("env-prod")).with_tag(tag_link("team-a"))),
            ("a2", CloudAccount::new("beta", "aws", "acme").with_tag(tag_link("env-prod")).with_tag(tag_link("team-b"))),
            ("a3", CloudAccount::new("gamma", "aws", "acme").with_tag(tag_link("team-a"))),
            ("a4", CloudAccount::new("delta", "azure", "acme").with_tag(tag_link("env-prod"))),
            ("x1", CloudAccount::new("other", "aws", "globex").with_tag(tag_link("env-prod"))),
        ];
        for (id, account) in accounts {
            put(&store, account_link(id), KIND_ACCOUNT, &account).await;
        }
        store
    }

    fn runtime(store: Arc<InMemoryDocumentStore>) -> WorkflowRuntime<QueryWorkflow> {
        let config = RuntimeConfig {
            retry_backoff_ms: 1,
            ..RuntimeConfig::default()
        };
        WorkflowRuntime::new(QueryWorkflow::new(store.clone()), store, config)
    }

    fn input(filter: FilterTree) -> QueryInput {
        QueryInput::new(TenantScope::new("acme", "alice")).with_filter(filter)
    }

    fn names(output: &QueryOutput) -> Vec<String> {
        output.results.items.iter().map(|v| v.name.clone()).collect()
    }

    #[tokio::test]
    async fn test_tag_and_semantics() {
        let store = seeded().await;
        let rt = runtime(store);
        let instance = rt
            .submit_and_wait(input(FilterTree::all(vec![
                FilterTree::term("type", "aws"),
                FilterTree::tag("env", "prod"),
            ])))
            .await
            .unwrap();

        assert_eq!(instance.stage, TaskStage::Finished);
        let output = instance.result.unwrap();
        assert_eq!(output.document_count, 2);
        assert_eq!(names(&output), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_tag_or_semantics() {
        let store = seeded().await;
        let rt = runtime(store);
        let filter = FilterTree::all(vec![
            FilterTree::tag("env", "prod"),
            FilterTree::any(vec![FilterTree::tag("team", "a"), FilterTree::tag("team", "b")]),
        ]);
        let output = rt.submit_and_wait(input(filter)).await.unwrap().result.unwrap();
        assert_eq!(names(&output), vec!["alpha", "beta"]);

        let filter = FilterTree::any(vec![FilterTree::tag("team", "a"), FilterTree::tag("team", "b")]);
        let output = rt.submit_and_wait(input(filter)).await.unwrap().result.unwrap();
        assert_eq!(names(&output), vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_should_root_filter_still_restricts() {
        let store = seeded().await;
        let rt = runtime(store);
        let filter = FilterTree::term("type", "aws").with_occurrence(Occurrence::Should);
        let output = rt.submit_and_wait(input(filter)).await.unwrap().result.unwrap();
        assert_eq!(output.document_count, 3);
        assert_eq!(names(&output), vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_persisted_work_holds_no_secret() {
        let store = seeded().await;
        let credential = Credential {
            private_key_id: "AKIA".into(),
            private_key: "hunter2-secret".into(),
            auth_type: None,
        };
        put(&store, credential_link("c1"), KIND_CREDENTIAL, &credential).await;
        let account = CloudAccount::new("epsilon", "aws", "acme").with_credential(credential_link("c1"));
        put(&store, account_link("a5"), KIND_ACCOUNT, &account).await;

        let rt = runtime(store);
        let instance = rt
            .submit_and_wait(input(FilterTree::term("name", "epsilon")))
            .await
            .unwrap();
        let stored = rt.get(&instance.id).await.unwrap();

        let view = &stored.result.as_ref().unwrap().results.items[0];
        assert_eq!(view.credential.as_ref().unwrap().private_key, MASKED_SECRET);
        let persisted = serde_json::to_string(&stored).unwrap();
        assert!(!persisted.contains("hunter2-secret"));
    }

    #[tokio::test]
    async fn test_undecodable_account_is_reported_not_dropped() {
        let store = seeded().await;
        let broken = serde_json::json!({ "name": "aardvark", "orgLink": "/orgs/acme" });
        store
            .put(Document::from_value(account_link("bad"), KIND_ACCOUNT, broken))
            .await
            .unwrap();

        let rt = runtime(store);
        let output = rt
            .submit_and_wait(QueryInput::new(TenantScope::new("acme", "alice")))
            .await
            .unwrap()
            .result
            .unwrap();

        assert_eq!(output.results.total_count, 5);
        assert_eq!(output.results.items.len(), 5);
        let first = &output.results.items[0];
        assert_eq!(first.id, "bad");
        assert_eq!(first.errors.len(), 1);
        assert_eq!(first.errors[0].entity, "cloud account");
        assert!(output.results.items[1..]
            .iter()
            .all(|v| v.errors.iter().all(|e| e.entity != "cloud account")));
    }

    #[tokio::test]
    async fn test_tag_or_type_matches_either() {
        let store = seeded().await;
        let rt = runtime(store);
        let filter = FilterTree::any(vec![FilterTree::term("type", "azure"), FilterTree::tag("team", "b")]);
        let output = rt.submit_and_wait(input(filter)).await.unwrap().result.unwrap();
        assert_eq!(names(&output), vec!["beta", "delta"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_primary_query() {
        let store = seeded().await;
        let rt = runtime(store.clone());
        let filter = FilterTree::all(vec![
            FilterTree::term("type", "aws"),
            FilterTree::tag("env", "staging"),
        ]);
        let output = rt.submit_and_wait(input(filter)).await.unwrap().result.unwrap();

        assert_eq!(output.document_count, 0);
        assert!(output.results.items.is_empty());
        let issued = store.issued_queries().await;
        assert!(issued.iter().all(|q| !q.tree.references("orgLink")));
    }

    #[tokio::test]
    async fn test_tenant_scope_always_applies() {
        let store = seeded().await;
        let rt = runtime(store);
        let output = rt
            .submit_and_wait(QueryInput::new(TenantScope::new("globex", "bob")))
            .await
            .unwrap()
            .result
            .unwrap();
        assert_eq!(names(&output), vec!["other"]);
    }

    #[tokio::test]
    async fn test_unsupported_field_rejected_at_submit() {
        let store = seeded().await;
        let rt = runtime(store);
        let err = rt
            .submit(input(FilterTree::term("color", "blue")))
            .await
            .unwrap_err();
        assert_eq!(err, SkeinError::UnsupportedFilterField("color".into()));
    }

    #[tokio::test]
    async fn test_first_page_links_to_next_cursor() {
        let store = seeded().await;
        let rt = runtime(store);
        let output = rt
            .submit_and_wait(input(FilterTree::term("type", "aws")).with_page_size(2))
            .await
            .unwrap()
            .result
            .unwrap();
        assert_eq!(output.document_count, 3);
        assert_eq!(output.results.items.len(), 2);

        let cursor = output.results.next_cursor.unwrap();
        let page = rt.workflow().cursors().fetch(&cursor).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.next_cursor.is_none());
        assert!(page.prev_cursor.is_some());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = seeded().await;
        let rt = runtime(store.clone());
        let id = rt.submit(input(FilterTree::term("type", "aws"))).await.unwrap();
        store.fail_next_queries(1);

        let instance = rt.run_until_terminal(&id).await.unwrap();
        assert_eq!(instance.stage, TaskStage::Finished);
        assert_eq!(instance.result.unwrap().document_count, 3);
    }

    #[tokio::test]
    async fn test_persistent_failure_fails_with_reason() {
        let store = seeded().await;
        let rt = runtime(store.clone());
        let id = rt.submit(input(FilterTree::term("type", "aws"))).await.unwrap();
        store.fail_next_queries(10);

        let instance = rt.run_until_terminal(&id).await.unwrap();
        assert_eq!(instance.stage, TaskStage::Failed);
        assert!(instance.failure_reason().unwrap().contains("injected query failure"));
    }
}
