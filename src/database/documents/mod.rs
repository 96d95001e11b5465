
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::Result;

/// Uploaded document metadata. Immutable once stored; there is no update
/// path, only insert and remove.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, document: Document) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Document>>;
    async fn list(&self) -> Result<Vec<Document>>;
    /// Returns whether a document with that id existed.
    async fn remove(&self, id: &str) -> Result<bool>;
}

/// In-memory document store. Suitable for tests and single-process
/// deployments; durable stores implement the same trait.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<String, Document>>,
}

impl MemoryDocumentStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    #[inline]
    async fn insert(&self, document: Document) -> Result<()> {
        let mut documents = self.documents.lock().expect("document store mutex poisoned");
        documents.insert(document.id.clone(), document);
        Ok(())
    }

    #[inline]
    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let documents = self.documents.lock().expect("document store mutex poisoned");
        Ok(documents.get(id).cloned())
    }

    #[inline]
    async fn list(&self) -> Result<Vec<Document>> {
        let documents = self.documents.lock().expect("document store mutex poisoned");
        let mut list: Vec<Document> = documents.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(list)
    }

    #[inline]
    async fn remove(&self, id: &str) -> Result<bool> {
        let mut documents = self.documents.lock().expect("document store mutex poisoned");
        Ok(documents.remove(id).is_some())
    }
}
