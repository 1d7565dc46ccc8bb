// src/load/memory.rs
//! Process-local store used for dry runs and tests.

use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use tracing::info;

use super::{DocumentStore, StoreConnector, StoreTarget, UpsertOutcome};
use crate::errors::{ConnectError, StoreError};
use crate::schema::{CanonicalDocument, NaturalKey};

#[derive(Debug, Default)]
struct MemoryState {
    docs: BTreeMap<NaturalKey, CanonicalDocument>,
    unique_index: bool,
    closes: usize,
}

/// Documents keyed by natural key. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &NaturalKey) -> Option<CanonicalDocument> {
        self.lock().docs.get(key).cloned()
    }

    pub fn has_unique_index(&self) -> bool {
        self.lock().unique_index
    }

    /// How many times a handle to this store was closed.
    pub fn closes(&self) -> usize {
        self.lock().closes
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.lock().unique_index = true;
        Ok(())
    }

    async fn upsert(&self, doc: &CanonicalDocument) -> Result<UpsertOutcome, StoreError> {
        match self.lock().docs.insert(doc.key(), doc.clone()) {
            Some(_) => Ok(UpsertOutcome::Updated),
            None => Ok(UpsertOutcome::Inserted),
        }
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.lock().docs.len() as u64)
    }

    async fn count_by_metric(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let mut counts = BTreeMap::new();
        for key in self.lock().docs.keys() {
            *counts.entry(key.metric.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn find_all(&self) -> Result<Vec<CanonicalDocument>, StoreError> {
        Ok(self.lock().docs.values().cloned().collect())
    }

    async fn close(&self) {
        self.lock().closes += 1;
    }
}

/// Hands out handles to one shared `MemoryStore`, or a fixed connection error.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    store: MemoryStore,
    failure: Option<ConnectError>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            ..Self::default()
        }
    }

    /// A connector whose every attempt fails with `error`.
    pub fn failing(error: ConnectError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, target: &StoreTarget) -> Result<Box<dyn DocumentStore>, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        info!(collection = %target.collection, "using in-memory store");
        Ok(Box::new(self.store.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn target() -> StoreTarget {
        StoreTarget {
            uri: String::new(),
            database: "db".into(),
            collection: "energy_metrics".into(),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn handles_share_contents() {
        let connector = MemoryConnector::new(MemoryStore::default());
        let handle = connector.connect(&target()).await.unwrap();
        handle.ensure_indexes().await.unwrap();
        handle.close().await;

        assert_eq!(connector.attempts(), 1);
        assert!(connector.store().has_unique_index());
        assert_eq!(connector.store().closes(), 1);
    }

    #[tokio::test]
    async fn failing_connector_counts_attempts() {
        let connector = MemoryConnector::failing(ConnectError::Network("refused".into()));
        let err = connector.connect(&target()).await.err().unwrap();
        assert!(matches!(err, ConnectError::Network(_)));
        assert_eq!(connector.attempts(), 1);
    }
}
