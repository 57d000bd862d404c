//! Narrow contract over the per-tenant document store.
//!
//! The pipeline only needs get/find/create/update/delete on schemaless
//! documents. Schema validation and the full permission model live behind
//! this seam and are not reimplemented here.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {id} not found in {collection}")]
    NotFound { collection: String, id: String },

    #[error("not authorized to write {id} in {collection}")]
    Unauthorized { collection: String, id: String },

    #[error("document {id} already exists in {collection}")]
    Conflict { collection: String, id: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        StoreError::Database(error.to_string())
    }
}

/// Role granting access to every caller.
pub const ROLE_ANY: &str = "any";

/// Capability for system-level access that bypasses document permissions.
///
/// Only the worker mints one; components that write system-managed records
/// take it in their constructor instead of flipping a global switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElevatedToken {
    _private: (),
}

impl ElevatedToken {
    pub fn system() -> Self {
        Self { _private: () }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authorization {
    Caller,
    Elevated(ElevatedToken),
}

impl Authorization {
    pub fn is_elevated(&self) -> bool {
        matches!(self, Authorization::Elevated(_))
    }
}

impl From<ElevatedToken> for Authorization {
    fn from(token: ElevatedToken) -> Self {
        Authorization::Elevated(token)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "$id", default)]
    pub id: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Copies every key of a JSON object onto this document.
    pub fn merge(&mut self, value: Value) {
        if let Value::Object(map) = value {
            for (key, value) in map {
                if key != "$id" {
                    self.attributes.insert(key, value);
                }
            }
        }
    }

    /// `true` when the role list stored under `field` grants everyone.
    pub fn grants_any(&self, field: &str) -> bool {
        self.get(field)
            .and_then(Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|role| role == ROLE_ANY || role == "role:all")
            })
            .unwrap_or(false)
    }

    pub fn readable_by(&self, auth: Authorization) -> bool {
        auth.is_elevated() || self.grants_any("$read")
    }

    pub fn writable_by(&self, auth: Authorization) -> bool {
        auth.is_elevated() || self.grants_any("$write")
    }

    pub fn to_typed<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }

    pub fn from_typed<T: Serialize>(value: &T) -> StoreResult<Self> {
        Ok(serde_json::from_value(serde_json::to_value(value)?)?)
    }
}

/// Equality filter on a top-level attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        if self.field == "$id" {
            return self.value.as_str() == Some(document.id.as_str());
        }
        document.get(&self.field) == Some(&self.value)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Unreadable documents are reported as absent.
    async fn get(&self, auth: Authorization, collection: &str, id: &str)
        -> StoreResult<Option<Document>>;

    async fn find_one(
        &self,
        auth: Authorization,
        collection: &str,
        filters: &[Filter],
    ) -> StoreResult<Option<Document>>;

    /// An empty id is replaced with a generated one.
    async fn create(&self, auth: Authorization, collection: &str, document: Document)
        -> StoreResult<Document>;

    async fn update(&self, auth: Authorization, collection: &str, document: &Document)
        -> StoreResult<Document>;

    /// Returns whether a document was removed.
    async fn delete(&self, auth: Authorization, collection: &str, id: &str) -> StoreResult<bool>;
}

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_permissions() {
        let open = Document::new("a").with("$read", json!(["any"]));
        let closed = Document::new("b").with("$read", json!(["user:42"]));
        let elevated = Authorization::from(ElevatedToken::system());

        assert!(open.readable_by(Authorization::Caller));
        assert!(!closed.readable_by(Authorization::Caller));
        assert!(closed.readable_by(elevated));
        assert!(!open.writable_by(Authorization::Caller));
    }

    #[test]
    fn test_merge_keeps_id() {
        let mut doc = Document::new("video1").with("bucketId", "b1");
        doc.merge(json!({"$id": "other", "width": 1920, "bucketId": "b2"}));

        assert_eq!(doc.id, "video1");
        assert_eq!(doc.get("width"), Some(&json!(1920)));
        assert_eq!(doc.get_str("bucketId"), Some("b2"));
    }

    #[test]
    fn test_filter_matches_id_and_attributes() {
        let doc = Document::new("r1").with("videoId", "v1");
        assert!(Filter::equal("$id", "r1").matches(&doc));
        assert!(Filter::equal("videoId", "v1").matches(&doc));
        assert!(!Filter::equal("videoId", "v2").matches(&doc));
        assert!(!Filter::equal("profileId", "p1").matches(&doc));
    }

    #[test]
    fn test_document_serializes_with_dollar_id() {
        let doc = Document::new("abc").with("name", "x");
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value, json!({"$id": "abc", "name": "x"}));
    }
}
