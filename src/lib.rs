//! # herd - Batch maintenance for shared dataset archives
//!
//! Applies an operation across many dataset directories with bounded
//! parallelism, skips datasets whose audit history already records a
//! success, and coordinates concurrent invocations — possibly on different
//! hosts sharing a network filesystem — through crash-tolerant lock files.
//!
//! ## Core pieces
//!
//! - **Batch orchestration**: [`batch::BatchExecutor`] dispatches a per-item
//!   operation over a worker pool, consults the [`guard::IdempotencyGuard`],
//!   isolates per-item failures, and aggregates outcomes in input order.
//! - **File lock registry**: [`lock::LockRegistry`] persists one sidecar
//!   file per lock holder, reclaims orphans by heartbeat TTL, and lists
//!   every holder under a root for operator inspection.
//! - **Audit history**: [`audit::FileAuditLog`] records each operation's
//!   outcome so the next run knows what is already done.
//!
//! ## Quick Start
//!
//! ```no_run
//! use herd::audit::{FileAuditLog, OperationKind};
//! use herd::batch::{BatchExecutor, WorkItem};
//! use herd::lock::{LockMode, LockRegistry};
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let audit = FileAuditLog::for_data_root(Path::new("/srv/archive"))?;
//! let registry = LockRegistry::with_default_ttl();
//!
//! let summary = BatchExecutor::new(&audit, OperationKind::Refresh)
//!     .concurrency(4)
//!     .run(vec![WorkItem::dataset("GSE123")], |item| {
//!         let manifest = Path::new("/srv/archive").join(&item.id).join("MANIFEST.tsv");
//!         let lock = registry.acquire(&manifest, LockMode::Exclusive, "refresh")?;
//!         // ... mutate the manifest ...
//!         lock.release()?;
//!         Ok("refreshed".to_string())
//!     })?;
//! assert_eq!(summary.items.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod guard;
pub mod lock;
pub mod manifest;

pub use audit::{AuditLog, FileAuditLog, OperationKind};
pub use batch::{BatchExecutor, BatchSummary, ProcessingOutcome, WorkItem};
pub use guard::IdempotencyGuard;
pub use lock::{LockInfo, LockMode, LockRegistry};
