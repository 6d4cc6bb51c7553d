//! Operation errors and their retry classification.

use thiserror::Error;

/// Error produced by an IPFS operation, classified by kind.
///
/// The scheduler only ever switches on [`OpError::is_transient`]; adapters
/// that receive free-text errors from an IPFS client can wrap them with
/// [`OpError::classify`], which recognizes the known transient message
/// shapes. Adapters with structured errors should construct the kinds
/// directly instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpError {
    /// The node's internal priority queue refused the request. Recoverable.
    #[error("{0}")]
    TransientNode(String),

    /// The transfer stream died mid-flight. Recoverable.
    #[error("{0}")]
    StreamCorruption(String),

    /// The node ran out of buffer space. Recoverable.
    #[error("{0}")]
    BufferExhausted(String),

    /// The request was cancelled before it started.
    #[error("operation cancelled")]
    Cancelled,

    /// Anything else. Not retried.
    #[error("{0}")]
    Other(String),
}

impl OpError {
    /// Classify a raw client error message.
    ///
    /// The three patterns are the message shapes observed from go-ipfs nodes
    /// under load; the full message is preserved verbatim for the caller.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("No lowest priority node found") {
            OpError::TransientNode(message)
        } else if message.contains("stream ended unexpectedly") {
            OpError::StreamCorruption(message)
        } else if message.contains("buffer") {
            OpError::BufferExhausted(message)
        } else {
            OpError::Other(message)
        }
    }

    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OpError::TransientNode(_) | OpError::StreamCorruption(_) | OpError::BufferExhausted(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("No lowest priority node found", true)]
    #[case("ipfs add: No lowest priority node found (node overloaded)", true)]
    #[case("stream ended unexpectedly", true)]
    #[case("could not grow buffer", true)]
    #[case("disk full", false)]
    #[case("connection refused", false)]
    fn classification_matches_known_transients(#[case] message: &str, #[case] transient: bool) {
        assert_eq!(OpError::classify(message).is_transient(), transient);
    }

    #[test]
    fn classified_errors_keep_the_original_message() {
        let err = OpError::classify("ipfs add: No lowest priority node found");
        assert_eq!(err.to_string(), "ipfs add: No lowest priority node found");
    }

    #[test]
    fn cancellation_is_not_transient() {
        assert!(!OpError::Cancelled.is_transient());
    }
}
