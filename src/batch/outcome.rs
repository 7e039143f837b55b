//! Per-item outcomes and their thread-safe collection
//!
//! Workers complete in whatever order the pool schedules them; the collector
//! writes each outcome into a slot keyed by the item's input position so the
//! final report is deterministic across runs.

use std::fmt;
use std::sync::Mutex;

/// One unit of batch input: an opaque id plus the entity type it names.
///
/// The entity itself is owned by the persistence layer; the batch core only
/// carries the identity for dispatch and reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub entity_type: String,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
        }
    }

    /// Shorthand for the common case
    pub fn dataset(id: impl Into<String>) -> Self {
        Self::new(id, "dataset")
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.entity_type, self.id)
    }
}

/// How one item's processing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Skipped,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Skipped => "skipped",
            OutcomeStatus::Error => "error",
        }
    }
}

/// Result for exactly one input item.
#[derive(Debug, Clone)]
pub struct ProcessingOutcome {
    pub item: WorkItem,
    pub status: OutcomeStatus,
    pub message: String,
    /// Underlying cause chain for errors
    pub cause: Option<String>,
}

impl ProcessingOutcome {
    pub fn success(item: WorkItem, message: impl Into<String>) -> Self {
        Self {
            item,
            status: OutcomeStatus::Success,
            message: message.into(),
            cause: None,
        }
    }

    pub fn skipped(item: WorkItem, message: impl Into<String>) -> Self {
        Self {
            item,
            status: OutcomeStatus::Skipped,
            message: message.into(),
            cause: None,
        }
    }

    pub fn error(item: WorkItem, message: impl Into<String>, cause: Option<String>) -> Self {
        Self {
            item,
            status: OutcomeStatus::Error,
            message: message.into(),
            cause,
        }
    }
}

/// Aggregated result of one batch invocation.
#[derive(Debug)]
pub struct BatchSummary {
    /// Outcomes in original input order, independent of completion order
    pub items: Vec<ProcessingOutcome>,
    /// True when dispatch stopped early on an interrupt; `items` then holds
    /// only the outcomes decided before the stop
    pub interrupted: bool,
}

impl BatchSummary {
    pub fn success_count(&self) -> usize {
        self.count(OutcomeStatus::Success)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(OutcomeStatus::Skipped)
    }

    pub fn error_count(&self) -> usize {
        self.count(OutcomeStatus::Error)
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    fn count(&self, status: OutcomeStatus) -> usize {
        self.items.iter().filter(|o| o.status == status).count()
    }
}

/// Thread-safe, order-preserving outcome store.
///
/// Sized up front to the input length; `record` never blocks on anything but
/// the slot vector's mutex and never panics on a poisoned lock (a worker that
/// panicked mid-record must not take the rest of the batch down with it).
pub struct ResultCollector {
    slots: Mutex<Vec<Option<ProcessingOutcome>>>,
}

impl ResultCollector {
    pub fn new(len: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; len]),
        }
    }

    /// Store the outcome for the item at input position `index`.
    pub fn record(&self, index: usize, outcome: ProcessingOutcome) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        debug_assert!(slots[index].is_none(), "outcome recorded twice for index {index}");
        slots[index] = Some(outcome);
    }

    /// Consume the collector, producing input-ordered outcomes.
    ///
    /// Empty slots (items never dispatched because of an interrupt) are
    /// dropped; a completed run has none.
    pub fn into_summary(self, interrupted: bool) -> BatchSummary {
        let slots = self.slots.into_inner().unwrap_or_else(|e| e.into_inner());
        BatchSummary {
            items: slots.into_iter().flatten().collect(),
            interrupted,
        }
    }
}
