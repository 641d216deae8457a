use crate::domain::{
    DomainError, DomainResult, ProcessedLogKey, ProcessedLogRepository, ProcessingRecord,
};
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory tenant store keyed by `(tenant_id, log_id)`.
///
/// Create-if-absent is atomic because the check and the insert happen under
/// one write lock. State is per process, so this is only a valid dedup store
/// for single-instance deployments and tests.
#[derive(Clone)]
pub struct InMemoryProcessedLogRepository {
    documents: Arc<RwLock<HashMap<ProcessedLogKey, ProcessingRecord>>>,
}

impl InMemoryProcessedLogRepository {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn count(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Number of records stored for one tenant
    pub async fn count_for_tenant(&self, tenant_id: &str) -> usize {
        self.documents
            .read()
            .await
            .keys()
            .filter(|key| key.tenant_id == tenant_id)
            .count()
    }
}

impl Default for InMemoryProcessedLogRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessedLogRepository for InMemoryProcessedLogRepository {
    async fn get_processed_log(
        &self,
        key: &ProcessedLogKey,
    ) -> DomainResult<Option<ProcessingRecord>> {
        let documents = self.documents.read().await;
        Ok(documents.get(key).cloned())
    }

    async fn create_processed_log(&self, record: &ProcessingRecord) -> DomainResult<()> {
        let key = record.key();
        let mut documents = self.documents.write().await;

        match documents.entry(key) {
            Entry::Occupied(existing) => Err(DomainError::ProcessedLogAlreadyExists(
                existing.key().document_path(),
            )),
            Entry::Vacant(slot) => {
                debug!(document_path = %slot.key().document_path(), "storing processed log in memory");
                slot.insert(record.clone());
                Ok(())
            }
        }
    }
}
