//! sluice-core
//!
//! An adaptive admission queue for IPFS operations: priority-ordered
//! scheduling, a concurrency ceiling that tracks memory pressure, and
//! retry with exponential backoff for the transient errors overloaded
//! nodes are known to produce.
//!
//! # Module map
//! - **domain**: ids, operation types and priorities, typed operation errors
//! - **queue**: the engine — `QueueManager`, records, retry policy, the
//!   pressure probe seam
//! - **status**: serializable views for health endpoints
//! - **adapter**: the client-facing layer — the `StoreClient` seam,
//!   size-based upload priorities, and `QueuedStore`

pub mod adapter;
pub mod domain;
pub mod queue;
pub mod status;
