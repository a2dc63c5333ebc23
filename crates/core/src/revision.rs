//! Optimistic-lock revision checks.

use crate::error::{EngineError, EngineResult};

/// Optimistic concurrency expectation for a stored entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedRevision {
    /// Skip revision checking.
    Any,
    /// Require the stored entity to be at an exact revision.
    Exact(u64),
}

impl ExpectedRevision {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedRevision::Any => true,
            ExpectedRevision::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> EngineResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(EngineError::concurrency(format!(
                "revision check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}
