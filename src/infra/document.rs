//! Document storage for responses kept as documents instead of inline bodies.

use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};

use super::transport::BoxFuture;
use crate::error::{HttpClientError, Result};

/// Handle to a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentReference {
    pub document_id: String,
    pub content_type: Option<String>,
    pub size: usize,
}

/// External document store.
pub trait DocumentStore: Send + Sync {
    fn store(&self, content: Bytes, content_type: Option<String>) -> BoxFuture<'_, Result<DocumentReference>>;
}

/// Process-local store, used by the remote endpoint and tests.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: Mutex<HashMap<String, (Bytes, Option<String>)>>,
    next_id: AtomicU64,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, document_id: &str) -> Option<Bytes> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .map(|(content, _)| content.clone())
    }

    pub fn len(&self) -> usize {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn store(&self, content: Bytes, content_type: Option<String>) -> BoxFuture<'_, Result<DocumentReference>> {
        Box::pin(async move {
            if content.is_empty() {
                return Err(HttpClientError::Document(
                    "Cannot store an empty response body".to_string(),
                ));
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            let document_id = format!("doc-{}", id);
            let reference = DocumentReference {
                document_id: document_id.clone(),
                content_type: content_type.clone(),
                size: content.len(),
            };
            self.documents
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(document_id, (content, content_type));

            tracing::debug!(document_id = %reference.document_id, size = reference.size, "Stored response document");
            Ok(reference)
        })
    }
}
