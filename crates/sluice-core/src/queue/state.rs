//! Request state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a queued request.
///
/// Transitions:
/// - Queued -> Processing -> Completed
/// - Queued -> Processing -> Requeued -> Queued (until the retry cap)
/// - Queued -> Processing -> Failed (non-transient error or cap exceeded)
/// - Queued -> Cancelled (cleared before admission)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    /// In the pending queue, eligible for admission.
    Queued,

    /// Admitted; the operation is in flight.
    Processing,

    /// Finished successfully.
    Completed,

    /// Finished with an error the caller has been handed.
    Failed,

    /// Waiting out a retry backoff before re-entering the queue.
    Requeued,

    /// Cleared from the pending queue before it ever started.
    Cancelled,
}

impl RequestState {
    /// Terminal states leave the tracking map.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Failed | RequestState::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RequestState::Queued, false)]
    #[case(RequestState::Processing, false)]
    #[case(RequestState::Requeued, false)]
    #[case(RequestState::Completed, true)]
    #[case(RequestState::Failed, true)]
    #[case(RequestState::Cancelled, true)]
    fn terminal_states(#[case] state: RequestState, #[case] terminal: bool) {
        assert_eq!(state.is_terminal(), terminal);
    }

    #[test]
    fn states_serialize_lowercase() {
        let json = serde_json::to_string(&RequestState::Requeued).unwrap();
        assert_eq!(json, "\"requeued\"");
    }
}
