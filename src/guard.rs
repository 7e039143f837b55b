//! Idempotency guard — decides whether a dataset can be skipped
//!
//! Pure decision function over the externally-owned audit history: a dataset
//! is skippable only when its most recent event for the operation kind
//! recorded a success. Failures are always retried, and `--force` bypasses
//! the history entirely.

use crate::audit::{AuditError, AuditLog, AuditOutcome, OperationKind};

/// Skip decision over an injected audit history.
///
/// Holds only a borrow of the log; safe to consult concurrently since it
/// never writes.
pub struct IdempotencyGuard<'a> {
    log: &'a dyn AuditLog,
}

impl<'a> IdempotencyGuard<'a> {
    pub fn new(log: &'a dyn AuditLog) -> Self {
        Self { log }
    }

    /// Whether processing of `entity` for `kind` may be skipped.
    ///
    /// `force` always produces `false`. An unreachable audit history is an
    /// error, not a "no record": silently re-running possibly destructive
    /// work is the one wrong answer here.
    pub fn should_skip(
        &self,
        entity: &str,
        kind: OperationKind,
        force: bool,
    ) -> Result<bool, AuditError> {
        if force {
            return Ok(false);
        }
        let latest = self.log.find_latest(entity, kind)?;
        Ok(matches!(
            latest,
            Some(record) if record.outcome == AuditOutcome::Success
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditRecord;
    use std::sync::Mutex;

    /// In-memory audit history for guard tests
    struct MemLog {
        records: Mutex<Vec<AuditRecord>>,
        fail: bool,
    }

    impl MemLog {
        fn new() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    impl AuditLog for MemLog {
        fn find_latest(
            &self,
            entity: &str,
            kind: OperationKind,
        ) -> Result<Option<AuditRecord>, AuditError> {
            if self.fail {
                return Err(AuditError::Unavailable(std::io::Error::other("down")));
            }
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.entity == entity && r.kind == kind)
                .last()
                .cloned())
        }

        fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    #[test]
    fn no_record_means_run() {
        let log = MemLog::new();
        let guard = IdempotencyGuard::new(&log);
        assert!(!guard.should_skip("a", OperationKind::Refresh, false).unwrap());
    }

    #[test]
    fn prior_success_means_skip() {
        let log = MemLog::new();
        log.append(AuditRecord::now("a", OperationKind::Refresh, AuditOutcome::Success, None))
            .unwrap();
        let guard = IdempotencyGuard::new(&log);
        assert!(guard.should_skip("a", OperationKind::Refresh, false).unwrap());
        // Different kind is a different decision
        assert!(!guard.should_skip("a", OperationKind::Verify, false).unwrap());
    }

    #[test]
    fn prior_failure_is_retried() {
        let log = MemLog::new();
        log.append(AuditRecord::now("a", OperationKind::Refresh, AuditOutcome::Failure, None))
            .unwrap();
        let guard = IdempotencyGuard::new(&log);
        assert!(!guard.should_skip("a", OperationKind::Refresh, false).unwrap());
    }

    #[test]
    fn failure_after_success_is_retried() {
        let log = MemLog::new();
        log.append(AuditRecord::now("a", OperationKind::Refresh, AuditOutcome::Success, None))
            .unwrap();
        log.append(AuditRecord::now("a", OperationKind::Refresh, AuditOutcome::Failure, None))
            .unwrap();
        let guard = IdempotencyGuard::new(&log);
        assert!(!guard.should_skip("a", OperationKind::Refresh, false).unwrap());
    }

    #[test]
    fn force_never_skips() {
        let log = MemLog::new();
        log.append(AuditRecord::now("a", OperationKind::Refresh, AuditOutcome::Success, None))
            .unwrap();
        let guard = IdempotencyGuard::new(&log);
        assert!(!guard.should_skip("a", OperationKind::Refresh, true).unwrap());
    }

    #[test]
    fn unreachable_history_is_fatal() {
        let log = MemLog::failing();
        let guard = IdempotencyGuard::new(&log);
        assert!(guard.should_skip("a", OperationKind::Refresh, false).is_err());
        // but force never consults the history at all
        assert!(!guard.should_skip("a", OperationKind::Refresh, true).unwrap());
    }
}
