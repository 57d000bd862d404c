//! In-process document store. Keeps a journal of every write so callers can
//! inspect the exact sequence of record mutations.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;

use super::document::{
    generate_id, Authorization, Document, DocumentStore, Filter, StoreError, StoreResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub op: WriteOp,
    pub collection: String,
    pub document: Document,
    pub elevated: bool,
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, (u64, Document)>>>,
    journal: Mutex<Vec<JournalEntry>>,
    sequence: Mutex<u64>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_sequence(&self) -> u64 {
        let mut sequence = self.sequence.lock().unwrap_or_else(|e| e.into_inner());
        *sequence += 1;
        *sequence
    }

    fn record(&self, op: WriteOp, collection: &str, document: &Document, auth: Authorization) {
        self.journal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(JournalEntry {
                op,
                collection: collection.to_string(),
                document: document.clone(),
                elevated: auth.is_elevated(),
            });
    }

    /// Stores a document as-is, bypassing permissions and the journal.
    pub fn seed(&self, collection: &str, document: Document) {
        let sequence = self.next_sequence();
        self.collections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(collection.to_string())
            .or_default()
            .insert(document.id.clone(), (sequence, document));
    }

    /// Documents of a collection in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        let mut documents: Vec<(u64, Document)> = collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default();
        documents.sort_by_key(|(sequence, _)| *sequence);
        documents.into_iter().map(|(_, doc)| doc).collect()
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.journal.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn writes_to(&self, collection: &str) -> Vec<JournalEntry> {
        self.journal()
            .into_iter()
            .filter(|entry| entry.collection == collection)
            .collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(
        &self,
        auth: Authorization,
        collection: &str,
        id: &str,
    ) -> StoreResult<Option<Document>> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|(_, doc)| doc.clone())
            .filter(|doc| doc.readable_by(auth)))
    }

    async fn find_one(
        &self,
        auth: Authorization,
        collection: &str,
        filters: &[Filter],
    ) -> StoreResult<Option<Document>> {
        Ok(self
            .documents(collection)
            .into_iter()
            .filter(|doc| doc.readable_by(auth))
            .find(|doc| filters.iter().all(|filter| filter.matches(doc))))
    }

    async fn create(
        &self,
        auth: Authorization,
        collection: &str,
        mut document: Document,
    ) -> StoreResult<Document> {
        if document.id.is_empty() {
            document.id = generate_id();
        }
        if !auth.is_elevated() {
            return Err(StoreError::Unauthorized {
                collection: collection.to_string(),
                id: document.id,
            });
        }

        let sequence = self.next_sequence();
        {
            let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
            let docs = collections.entry(collection.to_string()).or_default();
            if docs.contains_key(&document.id) {
                return Err(StoreError::Conflict {
                    collection: collection.to_string(),
                    id: document.id,
                });
            }
            docs.insert(document.id.clone(), (sequence, document.clone()));
        }

        self.record(WriteOp::Create, collection, &document, auth);
        Ok(document)
    }

    async fn update(
        &self,
        auth: Authorization,
        collection: &str,
        document: &Document,
    ) -> StoreResult<Document> {
        {
            let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
            let slot = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(&document.id))
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.to_string(),
                    id: document.id.clone(),
                })?;
            if !slot.1.writable_by(auth) {
                return Err(StoreError::Unauthorized {
                    collection: collection.to_string(),
                    id: document.id.clone(),
                });
            }
            slot.1 = document.clone();
        }

        self.record(WriteOp::Update, collection, document, auth);
        Ok(document.clone())
    }

    async fn delete(&self, auth: Authorization, collection: &str, id: &str) -> StoreResult<bool> {
        let removed = {
            let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
            let Some(docs) = collections.get_mut(collection) else {
                return Ok(false);
            };
            let writable = match docs.get(id) {
                Some((_, doc)) => doc.writable_by(auth),
                None => return Ok(false),
            };
            if !writable {
                return Err(StoreError::Unauthorized {
                    collection: collection.to_string(),
                    id: id.to_string(),
                });
            }
            docs.remove(id).map(|(_, doc)| doc)
        };

        match removed {
            Some(document) => {
                self.record(WriteOp::Delete, collection, &document, auth);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::db::document::ElevatedToken;
    use serde_json::json;

    fn elevated() -> Authorization {
        ElevatedToken::system().into()
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_journals() {
        let store = MemoryDocumentStore::new();
        let created = store
            .create(elevated(), "video_renditions", Document::default().with("name", "x"))
            .await
            .unwrap();

        assert!(!created.id.is_empty());
        assert_eq!(store.documents("video_renditions").len(), 1);
        let journal = store.journal();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].op, WriteOp::Create);
        assert!(journal[0].elevated);
    }

    #[tokio::test]
    async fn test_caller_cannot_read_restricted_documents() {
        let store = MemoryDocumentStore::new();
        store.seed("files", Document::new("open").with("$read", json!(["any"])));
        store.seed("files", Document::new("closed").with("$read", json!(["team:1"])));

        assert!(store.get(Authorization::Caller, "files", "open").await.unwrap().is_some());
        assert!(store.get(Authorization::Caller, "files", "closed").await.unwrap().is_none());
        assert!(store.get(elevated(), "files", "closed").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_caller_writes_are_rejected() {
        let store = MemoryDocumentStore::new();
        store.seed("videos", Document::new("v1"));

        let err = store
            .update(Authorization::Caller, "videos", &Document::new("v1").with("width", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized { .. }));

        let err = store
            .create(Authorization::Caller, "videos", Document::new("v2"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_find_one_returns_first_match_in_insertion_order() {
        let store = MemoryDocumentStore::new();
        store.seed("r", Document::new("zz").with("videoId", "v1"));
        store.seed("r", Document::new("aa").with("videoId", "v1"));

        let found = store
            .find_one(elevated(), "r", &[Filter::equal("videoId", "v1")])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "zz");
    }

    #[tokio::test]
    async fn test_delete_missing_is_false() {
        let store = MemoryDocumentStore::new();
        assert!(!store.delete(elevated(), "r", "nope").await.unwrap());
        assert!(store.journal().is_empty());
    }
}
