//! Serializable status views, for health endpoints and dashboards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::OpType;
use crate::queue::{RequestRecord, RequestState};

/// Point-in-time view of one live request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStatusView {
    pub id: String,
    pub op_type: OpType,
    pub priority: u8,
    pub state: RequestState,
    pub enqueued_at: DateTime<Utc>,

    /// Time spent waiting for admission; still growing while queued.
    pub wait_ms: u64,

    /// Execution time, once the request has both started and finished.
    pub process_ms: Option<u64>,

    pub retry_count: u32,
}

impl RequestStatusView {
    pub fn of(record: &RequestRecord) -> Self {
        Self {
            id: record.id.to_string(),
            op_type: record.op_type.clone(),
            priority: record.priority.get(),
            state: record.state,
            enqueued_at: record.enqueued_at,
            wait_ms: record.wait_time().as_millis() as u64,
            process_ms: record.process_time().map(|d| d.as_millis() as u64),
            retry_count: record.retry_count,
        }
    }
}

/// Live request tally by state. Terminal states never appear here; their
/// records are dropped at settlement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub processing: usize,
    pub requeued: usize,
}

/// Aggregate queue health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub queue_len: usize,
    pub active: usize,
    pub memory_pressure: f64,
    pub max_concurrent: usize,
    pub requests: Vec<RequestStatusView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, RequestId};

    #[test]
    fn view_of_a_fresh_record() {
        let record = RequestRecord::new(RequestId::generate(), OpType::Upload, Priority::new(3));
        let view = RequestStatusView::of(&record);

        assert!(view.id.starts_with("req-"));
        assert_eq!(view.priority, 3);
        assert_eq!(view.state, RequestState::Queued);
        assert!(view.process_ms.is_none());
        assert_eq!(view.retry_count, 0);
    }

    #[test]
    fn views_serialize_with_lowercase_states() {
        let record = RequestRecord::new(RequestId::generate(), OpType::Pin, Priority::default());
        let json = serde_json::to_value(RequestStatusView::of(&record)).unwrap();

        assert_eq!(json["state"], "queued");
        assert_eq!(json["op_type"], "pin");
    }
}
