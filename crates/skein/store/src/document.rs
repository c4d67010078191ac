//! Stored documents

use crate::StoreResult;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skein_types::{Link, FIELD_KIND, FIELD_SELF_LINK};

/// A JSON document and its store metadata
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub link: Link,
    pub kind: String,
    pub body: Value,
    /// Incremented by the store on every put
    #[serde(default)]
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    /// Hidden from reads and removed by the sweep once passed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Serialize `body` into a new document
    pub fn new<T: Serialize>(link: Link, kind: impl Into<String>, body: &T) -> StoreResult<Self> {
        Ok(Self::from_value(link, kind, serde_json::to_value(body)?))
    }

    pub fn from_value(link: Link, kind: impl Into<String>, body: Value) -> Self {
        Self {
            link,
            kind: kind.into(),
            body,
            version: 0,
            updated_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_expiration(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Deserialize the body
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// String forms of a field, for matching and sorting.
    ///
    /// `path` is dot separated. Array fields yield one entry per scalar
    /// element; missing and null fields yield nothing. The virtual fields
    /// `documentSelfLink` and `documentKind` resolve to store metadata.
    pub fn field_values(&self, path: &str) -> Vec<String> {
        match path {
            FIELD_SELF_LINK => return vec![self.link.0.clone()],
            FIELD_KIND => return vec![self.kind.clone()],
            _ => {}
        }

        let mut current = &self.body;
        for segment in path.split('.') {
            match current.get(segment) {
                Some(next) => current = next,
                None => return Vec::new(),
            }
        }

        match current {
            Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
            other => scalar_string(other).into_iter().collect(),
        }
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
