//! Bounded-parallel batch dispatcher
//!
//! Runs one operation over a collection of work items on a fixed-size worker
//! pool. Per item: consult the idempotency guard, dispatch unless skippable,
//! convert any failure (error return or panic) into an error outcome, and
//! append the result to the audit history. One item's failure never aborts
//! its siblings; the executor drains the whole collection unless interrupted.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::bounded;

use crate::audit::{AuditError, AuditLog, AuditOutcome, AuditRecord, OperationKind};
use crate::batch::outcome::{BatchSummary, OutcomeStatus, ProcessingOutcome, ResultCollector, WorkItem};
use crate::guard::IdempotencyGuard;

/// Observer invoked after each outcome is recorded (progress bars, per-item
/// log lines). Called from worker threads.
pub type OutcomeReporter<'a> = &'a (dyn Fn(&ProcessingOutcome) + Sync);

/// Batch dispatcher over an injected audit history.
///
/// ```no_run
/// use herd::audit::{FileAuditLog, OperationKind};
/// use herd::batch::{BatchExecutor, WorkItem};
///
/// # fn main() -> anyhow::Result<()> {
/// let audit = FileAuditLog::for_data_root(std::path::Path::new("/data"))?;
/// let summary = BatchExecutor::new(&audit, OperationKind::Refresh)
///     .concurrency(4)
///     .run(vec![WorkItem::dataset("GSE123")], |item| {
///         Ok(format!("processed {}", item.id))
///     })?;
/// assert_eq!(summary.items.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct BatchExecutor<'a> {
    audit: &'a dyn AuditLog,
    kind: OperationKind,
    concurrency: usize,
    force: bool,
    interrupt: Option<&'a AtomicBool>,
    reporter: Option<OutcomeReporter<'a>>,
}

impl<'a> BatchExecutor<'a> {
    /// Strictly sequential executor; opt into a pool with [`concurrency`](Self::concurrency).
    pub fn new(audit: &'a dyn AuditLog, kind: OperationKind) -> Self {
        Self {
            audit,
            kind,
            concurrency: 1,
            force: false,
            interrupt: None,
            reporter: None,
        }
    }

    /// Bound on in-flight operation invocations (>= 1).
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Bypass the idempotency guard: every item is dispatched.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Cooperative stop flag. Once set, in-flight items finish but nothing
    /// new is dispatched, and the summary is marked interrupted.
    pub fn interrupt_flag(mut self, flag: &'a AtomicBool) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Observe outcomes as they are recorded (completion order, not input order).
    pub fn reporter(mut self, reporter: OutcomeReporter<'a>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Apply `op` to every item, aggregating per-item outcomes.
    ///
    /// Only an unreachable audit history fails the whole batch; operation
    /// failures surface as error outcomes in the summary.
    pub fn run<F>(&self, items: Vec<WorkItem>, op: F) -> Result<BatchSummary, AuditError>
    where
        F: Fn(&WorkItem) -> anyhow::Result<String> + Sync,
    {
        let collector = ResultCollector::new(items.len());
        let guard = IdempotencyGuard::new(self.audit);

        // Skip decisions happen up front, before any worker starts, so a
        // guard failure aborts the batch before side effects begin.
        let mut pending = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            if guard.should_skip(&item.id, self.kind, self.force)? {
                let outcome = ProcessingOutcome::skipped(
                    item,
                    format!("{} already succeeded, use --force to redo", self.kind),
                );
                self.report(&outcome);
                collector.record(index, outcome);
            } else {
                pending.push((index, item));
            }
        }

        let workers = self.concurrency.min(pending.len()).max(1);
        let mut interrupted = false;

        std::thread::scope(|scope| {
            // Rendezvous channel: a send hands the item directly to an idle
            // worker, so an interrupt observed between sends leaves nothing
            // queued behind in-flight work.
            let (tx, rx) = bounded::<(usize, WorkItem)>(0);
            for _ in 0..workers {
                let rx = rx.clone();
                let collector = &collector;
                let op = &op;
                scope.spawn(move || {
                    for (index, item) in rx.iter() {
                        let outcome = self.run_one(item, op);
                        self.report(&outcome);
                        collector.record(index, outcome);
                    }
                });
            }
            drop(rx);

            for (index, item) in pending {
                if self.is_interrupted() {
                    tracing::info!("interrupt requested, not dispatching further items");
                    interrupted = true;
                    break;
                }
                // Workers only disconnect by panicking; treat that as fatal
                if tx.send((index, item)).is_err() {
                    break;
                }
            }
            drop(tx);
        });

        Ok(collector.into_summary(interrupted))
    }

    /// Run the operation for one item and translate the result into an
    /// outcome, recording it in the audit history.
    fn run_one<F>(&self, item: WorkItem, op: &F) -> ProcessingOutcome
    where
        F: Fn(&WorkItem) -> anyhow::Result<String> + Sync,
    {
        // AssertUnwindSafe: the operation only borrows Sync state; a panic
        // is converted to an error outcome and the worker keeps going.
        let outcome = match catch_unwind(AssertUnwindSafe(|| op(&item))) {
            Ok(Ok(message)) => ProcessingOutcome::success(item, message),
            Ok(Err(e)) => {
                let message = e.to_string();
                let chain = format!("{e:#}");
                let cause = (chain != message).then_some(chain);
                ProcessingOutcome::error(item, message, cause)
            }
            Err(panic) => {
                let cause = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned());
                ProcessingOutcome::error(item, "operation panicked", cause)
            }
        };

        let audit_outcome = match outcome.status {
            OutcomeStatus::Success => AuditOutcome::Success,
            _ => AuditOutcome::Failure,
        };
        let note = match outcome.status {
            OutcomeStatus::Success if outcome.message.is_empty() => None,
            OutcomeStatus::Success => Some(outcome.message.clone()),
            _ => Some(outcome.cause.clone().unwrap_or_else(|| outcome.message.clone())),
        };
        // A history we cannot append to means the next run redoes this item,
        // which is the safe direction; warn and keep going.
        if let Err(e) = self.audit.append(AuditRecord::now(
            &outcome.item.id,
            self.kind,
            audit_outcome,
            note,
        )) {
            tracing::warn!(item = %outcome.item, error = %e, "failed to record audit event");
        }
        outcome
    }

    fn report(&self, outcome: &ProcessingOutcome) {
        if let Some(reporter) = self.reporter {
            reporter(outcome);
        }
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}
