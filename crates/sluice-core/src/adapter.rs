//! Client-facing layer: the store seam and queued submission helpers.
//!
//! The queue itself never talks to IPFS; callers hand it closures. This
//! module is the conventional way to build those closures: a `StoreClient`
//! trait the real client (or a mock) implements, and a `QueuedStore` that
//! submits each call with the priority and operation type it should carry.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{OpError, OpType, Priority};
use crate::queue::{QueueManager, Ticket};
use crate::status::QueueSnapshot;

/// Default priority for a batch upload. Batches carry user-visible work,
/// so they outrank maintenance operations.
pub const BATCH_PRIORITY: Priority = Priority::new(2);
pub const PIN_PRIORITY: Priority = Priority::new(3);
pub const GET_PRIORITY: Priority = Priority::new(4);
pub const CHECK_PRIORITY: Priority = Priority::new(5);

/// Priority for a single upload: smaller files go first.
///
/// One priority step per 5 MiB, clamped to [1, 10].
pub fn upload_priority(size_bytes: u64) -> Priority {
    let mib = size_bytes as f64 / (1024.0 * 1024.0);
    Priority::new((mib / 5.0).ceil().clamp(1.0, 10.0) as u8)
}

/// Result of adding content to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddResult {
    pub cid: String,
    pub size: u64,
    pub path: String,
}

/// What a queued store operation resolves with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutput {
    Added(AddResult),
    AddedMany(Vec<AddResult>),
    Pinned,
    Bytes(Vec<u8>),
    Present(bool),
}

/// The IPFS client seam.
///
/// Implementations are responsible for producing classified errors: wrap a
/// raw client message with [`OpError::classify`], or construct the kind
/// directly when the client reports structured failures.
#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn add(&self, name: &str, data: Vec<u8>) -> Result<AddResult, OpError>;
    async fn pin(&self, cid: &str) -> Result<(), OpError>;
    async fn cat(&self, cid: &str) -> Result<Vec<u8>, OpError>;
    async fn stat(&self, cid: &str) -> Result<bool, OpError>;
}

/// A store client whose every call is arbitrated by the queue.
pub struct QueuedStore<C> {
    client: Arc<C>,
    queue: Arc<QueueManager<OpOutput>>,
}

impl<C: StoreClient + 'static> QueuedStore<C> {
    pub fn new(client: Arc<C>, queue: Arc<QueueManager<OpOutput>>) -> Self {
        Self { client, queue }
    }

    /// Upload one blob. Priority follows size: small files jump the line.
    pub async fn add(&self, name: impl Into<String>, data: Vec<u8>) -> Ticket<OpOutput> {
        let priority = upload_priority(data.len() as u64);
        let client = Arc::clone(&self.client);
        let name = name.into();
        self.queue
            .enqueue(
                move || {
                    let client = Arc::clone(&client);
                    let name = name.clone();
                    let data = data.clone();
                    async move { client.add(&name, data).await.map(OpOutput::Added) }
                },
                priority,
                OpType::Upload,
            )
            .await
    }

    /// Upload a set of blobs as one queued operation, sequentially, so a
    /// batch occupies a single concurrency slot.
    pub async fn add_many(&self, files: Vec<(String, Vec<u8>)>) -> Ticket<OpOutput> {
        let client = Arc::clone(&self.client);
        self.queue
            .enqueue(
                move || {
                    let client = Arc::clone(&client);
                    let files = files.clone();
                    async move {
                        let mut results = Vec::with_capacity(files.len());
                        for (name, data) in files {
                            results.push(client.add(&name, data).await?);
                        }
                        Ok(OpOutput::AddedMany(results))
                    }
                },
                BATCH_PRIORITY,
                OpType::UploadBatch,
            )
            .await
    }

    pub async fn pin(&self, cid: impl Into<String>) -> Ticket<OpOutput> {
        let client = Arc::clone(&self.client);
        let cid = cid.into();
        self.queue
            .enqueue(
                move || {
                    let client = Arc::clone(&client);
                    let cid = cid.clone();
                    async move { client.pin(&cid).await.map(|_| OpOutput::Pinned) }
                },
                PIN_PRIORITY,
                OpType::Pin,
            )
            .await
    }

    pub async fn cat(&self, cid: impl Into<String>) -> Ticket<OpOutput> {
        let client = Arc::clone(&self.client);
        let cid = cid.into();
        self.queue
            .enqueue(
                move || {
                    let client = Arc::clone(&client);
                    let cid = cid.clone();
                    async move { client.cat(&cid).await.map(OpOutput::Bytes) }
                },
                GET_PRIORITY,
                OpType::Get,
            )
            .await
    }

    pub async fn stat(&self, cid: impl Into<String>) -> Ticket<OpOutput> {
        let client = Arc::clone(&self.client);
        let cid = cid.into();
        self.queue
            .enqueue(
                move || {
                    let client = Arc::clone(&client);
                    let cid = cid.clone();
                    async move { client.stat(&cid).await.map(OpOutput::Present) }
                },
                CHECK_PRIORITY,
                OpType::Check,
            )
            .await
    }

    /// Queue health, for the same dashboard that shows upload progress.
    pub async fn status(&self) -> QueueSnapshot {
        self.queue.snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueConfig;
    use rstest::rstest;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[rstest]
    #[case(0, 1)]
    #[case(1024, 1)]
    #[case(5 * 1024 * 1024, 1)]
    #[case(6 * 1024 * 1024, 2)]
    #[case(12 * 1024 * 1024, 3)]
    #[case(48 * 1024 * 1024, 10)]
    #[case(500 * 1024 * 1024, 10)]
    fn upload_priority_follows_size(#[case] bytes: u64, #[case] expect: u8) {
        assert_eq!(upload_priority(bytes), Priority::new(expect));
    }

    /// In-memory store for wiring tests.
    #[derive(Default)]
    struct MemStore {
        blobs: StdMutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl StoreClient for MemStore {
        async fn add(&self, name: &str, data: Vec<u8>) -> Result<AddResult, OpError> {
            let cid = format!("cid-{name}");
            let size = data.len() as u64;
            self.blobs.lock().unwrap().insert(cid.clone(), data);
            Ok(AddResult {
                cid,
                size,
                path: name.to_string(),
            })
        }

        async fn pin(&self, cid: &str) -> Result<(), OpError> {
            if self.blobs.lock().unwrap().contains_key(cid) {
                Ok(())
            } else {
                Err(OpError::Other(format!("unknown cid {cid}")))
            }
        }

        async fn cat(&self, cid: &str) -> Result<Vec<u8>, OpError> {
            self.blobs
                .lock()
                .unwrap()
                .get(cid)
                .cloned()
                .ok_or_else(|| OpError::Other(format!("unknown cid {cid}")))
        }

        async fn stat(&self, cid: &str) -> Result<bool, OpError> {
            Ok(self.blobs.lock().unwrap().contains_key(cid))
        }
    }

    fn store() -> QueuedStore<MemStore> {
        let queue = Arc::new(QueueManager::new(QueueConfig {
            adaptive: false,
            ..QueueConfig::default()
        }));
        QueuedStore::new(Arc::new(MemStore::default()), queue)
    }

    #[tokio::test]
    async fn add_then_cat_round_trips_through_the_queue() {
        let store = store();

        let added = store.add("notes.txt", b"pinned data".to_vec()).await;
        let Ok(OpOutput::Added(result)) = added.outcome().await else {
            panic!("expected Added");
        };
        assert_eq!(result.path, "notes.txt");
        assert_eq!(result.size, 11);

        let bytes = store.cat(result.cid.clone()).await.outcome().await;
        assert_eq!(bytes, Ok(OpOutput::Bytes(b"pinned data".to_vec())));

        let present = store.stat(result.cid).await.outcome().await;
        assert_eq!(present, Ok(OpOutput::Present(true)));
    }

    #[tokio::test]
    async fn batch_uploads_resolve_with_every_result() {
        let store = store();

        let batch = store
            .add_many(vec![
                ("a".to_string(), vec![1, 2, 3]),
                ("b".to_string(), vec![4, 5]),
            ])
            .await;
        let Ok(OpOutput::AddedMany(results)) = batch.outcome().await else {
            panic!("expected AddedMany");
        };
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].cid, "cid-a");
        assert_eq!(results[1].size, 2);
    }

    #[tokio::test]
    async fn pinning_an_unknown_cid_fails_without_retries() {
        let store = store();
        let err = store.pin("cid-missing").await.outcome().await.unwrap_err();
        assert!(!err.is_transient());
    }
}
