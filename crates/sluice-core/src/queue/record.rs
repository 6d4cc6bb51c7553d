//! Request record: per-request metadata and transitions.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use super::RequestState;
use crate::domain::{OpType, Priority, RequestId};

/// Metadata for one request, from enqueue to its terminal state.
///
/// Design:
/// - This is the single source of truth for request state. The pending
///   queue holds `RequestId`s only.
/// - The operation closure and its completion channel travel separately,
///   so records stay cheap to clone for status snapshots.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub id: RequestId,
    pub op_type: OpType,
    pub priority: Priority,
    pub state: RequestState,

    /// Retries attempted so far (0 on the first attempt).
    pub retry_count: u32,

    /// Last error message, kept for status snapshots.
    pub last_error: Option<String>,

    /// Wall-clock enqueue time, for dashboards.
    pub enqueued_at: DateTime<Utc>,

    /// Monotonic timestamps for latency accounting.
    pub enqueued: Instant,
    pub started: Option<Instant>,
    pub ended: Option<Instant>,
}

impl RequestRecord {
    pub fn new(id: RequestId, op_type: OpType, priority: Priority) -> Self {
        Self {
            id,
            op_type,
            priority,
            state: RequestState::Queued,
            retry_count: 0,
            last_error: None,
            enqueued_at: Utc::now(),
            enqueued: Instant::now(),
            started: None,
            ended: None,
        }
    }

    /// Admitted: the operation starts now.
    pub fn start(&mut self) {
        self.state = RequestState::Processing;
        self.started = Some(Instant::now());
    }

    pub fn complete(&mut self) {
        self.state = RequestState::Completed;
        self.ended = Some(Instant::now());
    }

    pub fn fail(&mut self, error: String) {
        self.state = RequestState::Failed;
        self.last_error = Some(error);
        self.ended = Some(Instant::now());
    }

    /// A transient failure: the request waits out its backoff.
    pub fn requeue_pending(&mut self, error: String) {
        self.state = RequestState::Requeued;
        self.retry_count += 1;
        self.last_error = Some(error);
    }

    /// Backoff elapsed: back into the pending queue, one step more urgent.
    pub fn requeue(&mut self) {
        self.state = RequestState::Queued;
        self.priority = self.priority.raise();
    }

    pub fn cancel(&mut self) {
        self.state = RequestState::Cancelled;
        self.ended = Some(Instant::now());
    }

    /// Time spent waiting for admission; still growing while queued.
    pub fn wait_time(&self) -> Duration {
        match self.started {
            Some(started) => started.duration_since(self.enqueued),
            None => self.enqueued.elapsed(),
        }
    }

    /// Time spent executing, once finished.
    pub fn process_time(&self) -> Option<Duration> {
        match (self.started, self.ended) {
            (Some(started), Some(ended)) => Some(ended.duration_since(started)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> RequestRecord {
        RequestRecord::new(RequestId::generate(), OpType::Upload, Priority::new(5))
    }

    #[test]
    fn new_records_are_queued() {
        let rec = record();
        assert_eq!(rec.state, RequestState::Queued);
        assert_eq!(rec.retry_count, 0);
        assert!(rec.process_time().is_none());
    }

    #[test]
    fn requeue_raises_priority_and_counts_the_retry() {
        let mut rec = record();
        rec.start();
        rec.requeue_pending("stream ended unexpectedly".into());
        assert_eq!(rec.state, RequestState::Requeued);
        assert_eq!(rec.retry_count, 1);

        rec.requeue();
        assert_eq!(rec.state, RequestState::Queued);
        assert_eq!(rec.priority, Priority::new(4));
    }

    #[test]
    fn process_time_needs_both_ends() {
        let mut rec = record();
        rec.start();
        assert!(rec.process_time().is_none());
        rec.complete();
        assert!(rec.process_time().is_some());
    }
}
