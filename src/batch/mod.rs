//! Batch orchestration — executor, per-item outcomes, ordered collection
//!
//! ## Module Structure
//!
//! - `executor` - Worker-pool dispatch with guard consultation and failure isolation
//! - `outcome` - Work items, per-item outcomes, and the order-preserving collector

mod executor;
mod outcome;

pub use executor::{BatchExecutor, OutcomeReporter};
pub use outcome::{BatchSummary, OutcomeStatus, ProcessingOutcome, ResultCollector, WorkItem};
