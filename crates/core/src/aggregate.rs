//! Aggregate identity and optimistic concurrency.

use crate::error::{DomainError, DomainResult};
use crate::id::AggregateId;

/// A persisted entity that owns a consistency boundary.
///
/// `AGGREGATE_TYPE` plus `aggregate_id()` identify the aggregate's event stream
/// (e.g. `("profile", <uuid>)`).
pub trait AggregateRoot {
    /// Stable aggregate type name, used to tag raised events.
    const AGGREGATE_TYPE: &'static str;

    fn aggregate_id(&self) -> AggregateId;

    /// Monotonically increasing version of the aggregate's persisted state.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for a write.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (migrations, bootstrap seeding).
    Any,
    /// Require the record to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn check(self, actual: u64) -> DomainResult<()> {
        match self {
            ExpectedVersion::Exact(expected) if expected != actual => {
                Err(DomainError::VersionConflict { expected, actual })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_every_version() {
        assert!(ExpectedVersion::Any.check(0).is_ok());
        assert!(ExpectedVersion::Any.check(42).is_ok());
    }

    #[test]
    fn exact_mismatch_reports_both_versions() {
        let err = ExpectedVersion::Exact(3).check(4).unwrap_err();
        assert_eq!(err, DomainError::VersionConflict { expected: 3, actual: 4 });
    }
}
