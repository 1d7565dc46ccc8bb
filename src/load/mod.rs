// src/load/mod.rs
//! Persistence of validated documents. The pipeline talks to storage only
//! through `StoreConnector` and `DocumentStore`, so the MongoDB backend and
//! the in-memory backend are interchangeable.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use serde::Serialize;
use std::{collections::BTreeMap, future::Future, time::Duration};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::errors::{ConnectError, StoreError};
use crate::schema::{CanonicalDocument, NaturalKey};

pub use memory::{MemoryConnector, MemoryStore};
pub use mongo::{MongoConnector, MongoStore};

/// Documents written per batch.
pub const BATCH_SIZE: usize = 50;

/// Slack on top of the configured timeout before a handshake is abandoned.
/// The MongoDB driver reports its own selection timeout within the configured bound.
pub const CONNECT_GRACE: Duration = Duration::from_secs(2);

/// Await a store call for at most `limit`.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    timeout(limit, call)
        .await
        .unwrap_or(Err(StoreError::Timeout(limit)))
}

/// Open a store handle, giving up with `ConnectError::Timeout` once the
/// target's timeout plus `CONNECT_GRACE` has passed.
pub async fn connect_bounded(
    connector: &dyn StoreConnector,
    target: &StoreTarget,
) -> Result<Box<dyn DocumentStore>, ConnectError> {
    timeout(target.timeout + CONNECT_GRACE, connector.connect(target))
        .await
        .unwrap_or(Err(ConnectError::Timeout(target.timeout)))
}

/// Close `store`, abandoning the close after `limit`.
pub async fn close_bounded(store: &dyn DocumentStore, limit: Duration) {
    if timeout(limit, store.close()).await.is_err() {
        warn!(?limit, "closing the document store timed out");
    }
}

/// Where to connect, fully resolved by the orchestrator.
#[derive(Debug, Clone)]
pub struct StoreTarget {
    pub uri: String,
    pub database: String,
    pub collection: String,
    /// Bound on server selection and the initial handshake.
    pub timeout: Duration,
}

/// Result of an upsert keyed on `(country, metric)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the unique `(country, metric)` index and the secondary indexes.
    /// Safe to call on every run.
    async fn ensure_indexes(&self) -> Result<(), StoreError>;

    /// Replace the document with the same natural key, or insert it.
    async fn upsert(&self, doc: &CanonicalDocument) -> Result<UpsertOutcome, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    async fn count_by_metric(&self) -> Result<BTreeMap<String, u64>, StoreError>;

    async fn find_all(&self) -> Result<Vec<CanonicalDocument>, StoreError>;

    /// Release the connection.
    async fn close(&self);
}

#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Open and verify a store handle.
    async fn connect(&self, target: &StoreTarget) -> Result<Box<dyn DocumentStore>, ConnectError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteFailure {
    pub key: NaturalKey,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub inserted: usize,
    pub updated: usize,
    pub failures: Vec<WriteFailure>,
}

impl LoadReport {
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Writes documents through a `DocumentStore`, bounding every write.
pub struct Loader<'a> {
    store: &'a dyn DocumentStore,
    write_timeout: Duration,
}

impl<'a> Loader<'a> {
    pub fn new(store: &'a dyn DocumentStore, write_timeout: Duration) -> Self {
        Self {
            store,
            write_timeout,
        }
    }

    /// Upsert every document in batches. A failed or timed-out write is
    /// recorded under the document's key and the remaining documents are
    /// still written.
    #[tracing::instrument(level = "info", skip(self, docs), fields(docs = docs.len()))]
    pub async fn load(&self, docs: &[CanonicalDocument]) -> LoadReport {
        let mut report = LoadReport::default();
        let start = Instant::now();

        for (batch_idx, batch) in docs.chunks(BATCH_SIZE).enumerate() {
            for doc in batch {
                match bounded(self.write_timeout, self.store.upsert(doc)).await {
                    Ok(UpsertOutcome::Inserted) => report.inserted += 1,
                    Ok(UpsertOutcome::Updated) => report.updated += 1,
                    Err(err) => {
                        let key = doc.key();
                        warn!(key = %key, error = %err, "write failed");
                        report.failures.push(WriteFailure {
                            key,
                            reason: err.to_string(),
                        });
                    }
                }
            }
            debug!(batch = batch_idx, size = batch.len(), "wrote batch");
        }

        info!(
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failures.len(),
            elapsed = ?start.elapsed(),
            "load complete"
        );
        report
    }
}
