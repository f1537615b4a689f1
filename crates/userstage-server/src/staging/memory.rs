use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use userstage_common::types::{StagingDocument, StagingId, UserRecord};

use super::{StagingError, StagingStore};

/// In-process staging store
#[derive(Default, Clone)]
pub struct MemoryStagingStore {
    documents: Arc<RwLock<HashMap<StagingId, StagingDocument>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the store were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Place a document directly, bypassing `stage`
    pub async fn insert(&self, document: StagingDocument) {
        self.documents
            .write()
            .await
            .insert(document.staging_id.clone(), document);
    }

    /// Drop a document, as a retention policy would
    pub async fn remove(&self, id: &StagingId) -> Option<StagingDocument> {
        self.documents.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    fn check_available(&self) -> Result<(), StagingError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StagingError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
    async fn stage(&self, records: &[UserRecord]) -> Result<StagingId, StagingError> {
        self.check_available()?;
        let id = StagingId::generate();
        self.insert(StagingDocument::new(id.clone(), records.to_vec()))
            .await;
        Ok(id)
    }

    async fn fetch(&self, id: &StagingId) -> Result<StagingDocument, StagingError> {
        self.check_available()?;
        self.documents
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StagingError::NotFound(id.clone()))
    }

    async fn contains(&self, id: &StagingId) -> Result<bool, StagingError> {
        self.check_available()?;
        Ok(self.documents.read().await.contains_key(id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_returns_staged_batch() {
        let store = MemoryStagingStore::new();
        let records = vec![
            UserRecord::new("Ana", "ana@example.com", 35),
            UserRecord::new("Bruno", "bruno@example.com", 28),
        ];

        let id = store.stage(&records).await.unwrap();
        let first = store.fetch(&id).await.unwrap();
        let second = store.fetch(&id).await.unwrap();

        assert_eq!(first.records, records);
        assert_eq!(first, second);
        assert!(store.contains(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_document() {
        let store = MemoryStagingStore::new();
        let id = StagingId::generate();
        assert!(matches!(store.fetch(&id).await, Err(StagingError::NotFound(_))));
        assert!(!store.contains(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_stages_nothing() {
        let store = MemoryStagingStore::new();
        store.set_unavailable(true);
        let result = store.stage(&[UserRecord::new("Ana", "a@b", 1)]).await;
        assert!(matches!(result, Err(StagingError::Unavailable(_))));
        store.set_unavailable(false);
        assert!(store.is_empty().await);
    }
}
