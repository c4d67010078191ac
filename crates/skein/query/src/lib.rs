//! # Skein Query
//!
//! Federated, paginated cloud account listing built on the workflow
//! runtime.
//!
//! ```text
//! FilterTree ──translate──► QueryTree + deferred tag predicates
//!                                 │              │
//!                                 │     TagResolutionEngine (one side
//!                                 │     query per tag key, concurrent)
//!                                 ▼              ▼
//!                        primary query ◄── tag link sets
//!                                 │
//!                                 ▼
//!           first page ─► LookupResolver ─► views ─► PageCursor chain
//! ```
//!
//! Every step of [`QueryWorkflow`] only reads the store, so a node
//! restarting mid-query re-runs the current step and converges on the
//! same result.

pub mod cursor;
pub mod lookup;
pub mod model;
pub mod tags;
pub mod translate;
pub mod view;
pub mod workflow;

pub use cursor::{cursor_link, PageCursor, PageCursorService};
pub use lookup::{LookupResolver, PageLookups};
pub use model::{
    account_link, credential_link, org_link, service_key, tag_link, user_link, CloudAccount,
    Credential, Organization, Tag, TagOrigin, TenantScope, UserProfile, KIND_ACCOUNT,
    KIND_CREDENTIAL, KIND_CURSOR, KIND_ORGANIZATION, KIND_TAG, KIND_USER, ROLE_ADMIN,
};
pub use tags::{TagResolution, TagResolutionEngine, TagResolutionState, TAG_LINKS_FIELD};
pub use translate::{translate, translate_resolved, DeferredPredicate, FieldMap, FieldRule, Translation};
pub use view::{
    assemble, assemble_page, decode_accounts, AccountEntry, CloudAccountView, CredentialView,
    EntityError, OrganizationView, TagView, MASKED_SECRET,
};
pub use workflow::{
    QueryInput, QueryKind, QueryOutput, QueryStage, QueryWork, QueryWorkflow, DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE,
};
