//! Lock discovery by bounded directory traversal
//!
//! A fresh walk per call — no cached state, so every listing reflects the
//! sidecars present at walk time. Unreadable or mid-write sidecars are
//! logged as warnings and skipped; a concurrent writer must never abort an
//! operator's listing.

use std::path::Path;

use walkdir::WalkDir;

use crate::lock::info::LockInfo;

/// Lazy iterator over every parseable lock sidecar under a root.
pub struct LockWalk {
    inner: walkdir::IntoIter,
}

/// Walk `root` up to `max_depth` levels. Depth 0 means files directly under
/// `root`; walkdir counts the root itself as depth 0, hence the +1.
pub(crate) fn walk(root: &Path, max_depth: usize) -> LockWalk {
    LockWalk {
        inner: WalkDir::new(root)
            .max_depth(max_depth.saturating_add(1))
            .into_iter(),
    }
}

impl Iterator for LockWalk {
    type Item = LockInfo;

    fn next(&mut self) -> Option<LockInfo> {
        for entry in self.inner.by_ref() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry during lock walk");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if !entry.file_name().to_string_lossy().ends_with(".lock") {
                continue;
            }
            let content = match std::fs::read_to_string(entry.path()) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(sidecar = %entry.path().display(), error = %e, "skipping unreadable lock sidecar");
                    continue;
                }
            };
            match LockInfo::parse(&content) {
                Ok(info) => return Some(info),
                Err(e) => {
                    // Possibly a concurrent writer mid-write: warn, not fatal
                    tracing::warn!(sidecar = %entry.path().display(), error = %e, "skipping corrupt lock sidecar");
                    continue;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::info::LockMode;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_lock(dir: &Path, name: &str, resource: &str) {
        let info = LockInfo::acquire_now(PathBuf::from(resource), LockMode::Exclusive, "test");
        std::fs::write(dir.join(name), info.render()).unwrap();
    }

    #[test]
    fn walk_is_bounded_by_depth() {
        let root = TempDir::new().unwrap();
        let d1 = root.path().join("a");
        let d2 = d1.join("b");
        std::fs::create_dir_all(&d2).unwrap();
        write_lock(root.path(), "top.x.lock", "/data/top");
        write_lock(&d1, "mid.x.lock", "/data/mid");
        write_lock(&d2, "deep.x.lock", "/data/deep");

        let mut found: Vec<_> = walk(root.path(), 1)
            .map(|l| l.resource.display().to_string())
            .collect();
        found.sort();
        assert_eq!(found, ["/data/mid", "/data/top"]);

        assert_eq!(walk(root.path(), 0).count(), 1);
        assert_eq!(walk(root.path(), 2).count(), 3);
    }

    #[test]
    fn corrupt_sidecars_are_skipped() {
        let root = TempDir::new().unwrap();
        write_lock(root.path(), "good.x.lock", "/data/good");
        std::fs::write(root.path().join("bad.x.lock"), "mode: exclu").unwrap();
        std::fs::write(root.path().join("unrelated.txt"), "not a lock").unwrap();

        let found: Vec<_> = walk(root.path(), 3).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].resource, PathBuf::from("/data/good"));
    }

    #[test]
    fn fresh_walk_sees_releases() {
        let root = TempDir::new().unwrap();
        write_lock(root.path(), "a.x.lock", "/data/a");
        assert_eq!(walk(root.path(), 0).count(), 1);
        std::fs::remove_file(root.path().join("a.x.lock")).unwrap();
        assert_eq!(walk(root.path(), 0).count(), 0);
    }
}
