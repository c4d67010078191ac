//! Result pages handed to API callers

use serde::{Deserialize, Serialize};

/// Identifier of a page cursor
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursorId(pub String);

impl PageCursorId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PageCursorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One page of a paginated result set
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPage<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<PageCursorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_cursor: Option<PageCursorId>,
    /// Size of the whole result set, not of this page
    pub total_count: u64,
}

impl<T> ResultPage<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            prev_cursor: None,
            total_count: 0,
        }
    }

    pub fn has_next(&self) -> bool {
        self.next_cursor.is_some()
    }
}
