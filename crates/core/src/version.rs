//! Row versioning for optimistic concurrency.

use crate::error::{DomainError, DomainResult};

/// A record whose state carries a monotonically increasing version.
///
/// Every committed mutation of the record bumps the version by one, so a
/// writer that read version `n` can detect that someone else committed in
/// between.
pub trait Versioned {
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for a versioned record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (capacity and stock are still re-validated).
    Any,
    /// Require the record to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_every_version() {
        assert!(ExpectedVersion::Any.matches(0));
        assert!(ExpectedVersion::Any.matches(42));
    }

    #[test]
    fn exact_rejects_stale_version() {
        assert!(ExpectedVersion::Exact(3).check(3).is_ok());
        match ExpectedVersion::Exact(3).check(4) {
            Err(DomainError::Conflict(msg)) => assert!(msg.contains("actual: 4")),
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
