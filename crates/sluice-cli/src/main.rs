use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::Rng;
use tokio::time::{Duration, sleep};
use tracing::info;

use sluice_core::adapter::{AddResult, OpOutput, QueuedStore, StoreClient};
use sluice_core::domain::OpError;
use sluice_core::queue::{QueueConfig, QueueManager};

/// In-memory store whose first few adds fail with a transient error, so
/// the demo exercises the retry path end to end.
struct FlakyStore {
    remaining_failures: AtomicU32,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
            blobs: Mutex::new(HashMap::new()),
        }
    }

    /// Not a real multihash; stable and unique enough for a demo.
    fn fake_cid(data: &[u8]) -> String {
        let mut acc: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in data {
            acc = (acc ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3);
        }
        format!("bafk{acc:016x}")
    }

    async fn simulated_latency(&self) {
        let ms = rand::thread_rng().gen_range(10..60);
        sleep(Duration::from_millis(ms)).await;
    }
}

#[async_trait]
impl StoreClient for FlakyStore {
    async fn add(&self, name: &str, data: Vec<u8>) -> Result<AddResult, OpError> {
        self.simulated_latency().await;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(OpError::classify("No lowest priority node found"));
        }

        let cid = Self::fake_cid(&data);
        let size = data.len() as u64;
        self.blobs.lock().unwrap().insert(cid.clone(), data);
        Ok(AddResult {
            cid,
            size,
            path: name.to_string(),
        })
    }

    async fn pin(&self, cid: &str) -> Result<(), OpError> {
        self.simulated_latency().await;
        if self.blobs.lock().unwrap().contains_key(cid) {
            Ok(())
        } else {
            Err(OpError::Other(format!("unknown cid {cid}")))
        }
    }

    async fn cat(&self, cid: &str) -> Result<Vec<u8>, OpError> {
        self.simulated_latency().await;
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

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    info!("sluice demo: two transient node failures are injected up front");

    let queue = Arc::new(QueueManager::new(QueueConfig::default()));
    let store = QueuedStore::new(Arc::new(FlakyStore::new(2)), Arc::clone(&queue));

    // A mixed workload: small and large uploads plus one batch. The small
    // file gets the best priority; the injected failures back off and retry.
    let small = store.add("notes.txt", b"hello from sluice".to_vec()).await;
    let large = store.add("video.mp4", vec![0u8; 12 * 1024 * 1024]).await;
    let batch = store
        .add_many(vec![
            ("a.json".to_string(), br#"{"n":1}"#.to_vec()),
            ("b.json".to_string(), br#"{"n":2}"#.to_vec()),
        ])
        .await;

    // Watch the queue while the work is in flight.
    for _ in 0..3 {
        let snapshot = store.status().await;
        println!("{}", serde_json::to_string_pretty(&snapshot).unwrap());
        sleep(Duration::from_millis(300)).await;
    }

    let small = small.outcome().await;
    println!("small upload: {small:?}");

    if let Ok(OpOutput::Added(result)) = &small {
        let cid = result.cid.clone();
        println!("pin {cid}: {:?}", store.pin(cid.clone()).await.outcome().await);
        println!("cat {cid}: {:?}", store.cat(cid.clone()).await.outcome().await);
        println!("stat {cid}: {:?}", store.stat(cid.clone()).await.outcome().await);
    }

    println!("large upload: {:?}", large.outcome().await);
    println!("batch upload: {:?}", batch.outcome().await);

    println!("remaining tracked: {:?}", queue.counts_by_state().await);

    drop(store);
    if let Ok(queue) = Arc::try_unwrap(queue) {
        queue.shutdown_and_join().await;
    }
}
