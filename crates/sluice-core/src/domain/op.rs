//! Operation types, priorities, and the deferred operation closure.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::errors::OpError;

/// Kind of IPFS operation a request performs.
///
/// The tag matters to the scheduler in one place only: bulk uploads
/// (`UploadBatch`, `UploadLarge`) are skipped over when memory pressure is
/// high, so smaller jobs drain first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpType {
    Upload,
    UploadBatch,
    UploadLarge,
    Pin,
    Get,
    Check,
    Custom(String),
}

impl OpType {
    pub fn as_str(&self) -> &str {
        match self {
            OpType::Upload => "upload",
            OpType::UploadBatch => "upload-batch",
            OpType::UploadLarge => "upload-large",
            OpType::Pin => "pin",
            OpType::Get => "get",
            OpType::Check => "check",
            OpType::Custom(s) => s.as_str(),
        }
    }

    /// Bulk operations are deprioritized under high memory pressure.
    pub fn is_bulk(&self) -> bool {
        matches!(self, OpType::UploadBatch | OpType::UploadLarge)
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Lower value = more urgent.
///
/// Retries raise priority one step at a time, never past `Priority::URGENT`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(u8);

impl Priority {
    /// Highest priority a request can reach.
    pub const URGENT: Priority = Priority(1);

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// One step more urgent, floored at `URGENT`.
    pub fn raise(self) -> Self {
        Self(self.0.saturating_sub(1).max(Self::URGENT.0))
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(5)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Future produced by one invocation of an operation closure.
pub type OpFuture<T> = Pin<Box<dyn Future<Output = Result<T, OpError>> + Send>>;

/// The deferred unit of work.
///
/// `Fn`, not `FnOnce`: a retry re-invokes the closure for a fresh attempt.
pub type OpFn<T> = Arc<dyn Fn() -> OpFuture<T> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_floors_at_urgent() {
        let p = Priority::new(2);
        assert_eq!(p.raise(), Priority::URGENT);
        assert_eq!(Priority::URGENT.raise(), Priority::URGENT);
    }

    #[test]
    fn bulk_types_are_flagged() {
        assert!(OpType::UploadBatch.is_bulk());
        assert!(OpType::UploadLarge.is_bulk());
        assert!(!OpType::Upload.is_bulk());
        assert!(!OpType::Custom("upload-batch".into()).is_bulk());
    }

    #[test]
    fn custom_tag_displays_verbatim() {
        assert_eq!(OpType::Custom("repin".into()).to_string(), "repin");
        assert_eq!(OpType::UploadBatch.to_string(), "upload-batch");
    }
}
