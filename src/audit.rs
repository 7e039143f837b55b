//! Audit history of past batch operations
//!
//! Every dataset operation that completes is recorded as an append-only
//! event, keyed by (entity id, operation kind). The idempotency guard reads
//! the latest event per key to decide whether a dataset can be skipped on
//! the next run.
//!
//! The on-disk implementation is JSONL under the workspace state directory
//! (`.herd/audit.jsonl`) so the history survives across CLI invocations and
//! stays greppable without tooling.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of processing an audit event describes.
///
/// Used as the event discriminator: the guard only considers events of the
/// same kind when deciding whether a dataset was already processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Manifest recomputation (`herd refresh`)
    Refresh,
    /// Manifest verification (`herd verify`)
    Verify,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Refresh => "refresh",
            OperationKind::Verify => "verify",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded in an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// One append-only audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Entity (dataset) id the operation ran against
    pub entity: String,
    pub kind: OperationKind,
    pub outcome: AuditOutcome,
    pub at: DateTime<Utc>,
    /// Free-form detail (success message or failure cause)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AuditRecord {
    pub fn now(entity: &str, kind: OperationKind, outcome: AuditOutcome, note: Option<String>) -> Self {
        Self {
            entity: entity.to_string(),
            kind,
            outcome,
            at: Utc::now(),
            note,
        }
    }
}

/// Errors reaching or reading the audit history.
///
/// These are fatal for a whole batch: if the history cannot be consulted,
/// treating that as "no record" would silently re-run work that may be
/// destructive.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit history unavailable: {0}")]
    Unavailable(#[from] std::io::Error),
    #[error("audit history corrupt at {path}:{line}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
}

/// Read/append access to the audit history.
///
/// Injected into the guard and executor rather than reached through a
/// global, so tests can substitute an in-memory history.
pub trait AuditLog: Send + Sync {
    /// Most recent record for (entity, kind), if any.
    ///
    /// Must be safe to call concurrently for different entities (read-only).
    fn find_latest(&self, entity: &str, kind: OperationKind) -> Result<Option<AuditRecord>, AuditError>;

    /// Append a record to the history.
    fn append(&self, record: AuditRecord) -> Result<(), AuditError>;
}

/// JSONL-backed audit history.
///
/// One JSON object per line, appended under an in-process mutex. Reads scan
/// the whole file; batch sizes here are hundreds of datasets, not millions
/// of events, so a scan beats maintaining an index.
pub struct FileAuditLog {
    path: PathBuf,
    // Serializes appends from worker threads so lines never interleave
    write: Mutex<()>,
}

impl FileAuditLog {
    /// Open (creating parent directories if needed) the log at `path`.
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            write: Mutex::new(()),
        })
    }

    /// Conventional location under a data root: `<root>/.herd/audit.jsonl`.
    pub fn for_data_root(root: &Path) -> Result<Self, AuditError> {
        Self::open(&root.join(".herd").join("audit.jsonl"))
    }

    /// All records for one entity, oldest first. Used by `herd history`.
    pub fn records_for(&self, entity: &str) -> Result<Vec<AuditRecord>, AuditError> {
        let mut out = Vec::new();
        self.scan(|record| {
            if record.entity == entity {
                out.push(record);
            }
        })?;
        Ok(out)
    }

    fn scan(&self, mut visit: impl FnMut(AuditRecord)) -> Result<(), AuditError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            // No file yet means an empty history, not an error
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|source| AuditError::Corrupt {
                path: self.path.clone(),
                line: lineno + 1,
                source,
            })?;
            visit(record);
        }
        Ok(())
    }
}

impl AuditLog for FileAuditLog {
    fn find_latest(&self, entity: &str, kind: OperationKind) -> Result<Option<AuditRecord>, AuditError> {
        let mut latest: Option<AuditRecord> = None;
        self.scan(|record| {
            if record.entity == entity && record.kind == kind {
                // Appends are chronological, but compare timestamps anyway in
                // case the file was merged or hand-edited
                match &latest {
                    Some(cur) if cur.at > record.at => {}
                    _ => latest = Some(record),
                }
            }
        })?;
        Ok(latest)
    }

    fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let _guard = self.write.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let line = serde_json::to_string(&record).expect("audit record serialization is infallible");
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
