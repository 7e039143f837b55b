//! Common test fixtures and helpers
//!
//! Usage in test files:
//! ```ignore
//! mod common;
//! use common::TestArchive;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use herd::audit::{AuditError, AuditLog, AuditRecord, OperationKind};
use tempfile::TempDir;

/// A data root with dataset directories, with automatic cleanup.
pub struct TestArchive {
    dir: TempDir,
}

#[allow(dead_code)]
impl TestArchive {
    /// Create an archive with the given dataset ids, each holding two small
    /// data files.
    pub fn with_datasets(ids: &[&str]) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        for id in ids {
            let ds = dir.path().join(id);
            std::fs::create_dir(&ds).expect("Failed to create dataset dir");
            std::fs::write(ds.join("data.tsv"), format!("{id}\t1\t2\n")).unwrap();
            std::fs::write(ds.join("meta.txt"), format!("dataset {id}\n")).unwrap();
        }
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn dataset_dir(&self, id: &str) -> PathBuf {
        self.dir.path().join(id)
    }

    pub fn audit_log(&self) -> herd::FileAuditLog {
        herd::FileAuditLog::for_data_root(self.root()).expect("open audit log")
    }
}

/// In-memory audit history with an optional injected outage.
#[allow(dead_code)]
pub struct MemAuditLog {
    records: Mutex<Vec<AuditRecord>>,
    unavailable: bool,
}

#[allow(dead_code)]
impl MemAuditLog {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            unavailable: false,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            unavailable: true,
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl AuditLog for MemAuditLog {
    fn find_latest(
        &self,
        entity: &str,
        kind: OperationKind,
    ) -> Result<Option<AuditRecord>, AuditError> {
        if self.unavailable {
            return Err(AuditError::Unavailable(std::io::Error::other(
                "audit service down",
            )));
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
        if self.unavailable {
            return Err(AuditError::Unavailable(std::io::Error::other(
                "audit service down",
            )));
        }
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}
