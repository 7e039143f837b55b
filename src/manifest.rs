//! Dataset manifests: per-file size and blake3 checksum
//!
//! `MANIFEST.tsv` sits at the top of each dataset directory, one line per
//! data file: relative path, byte size, blake3 hex. Refresh rewrites it
//! atomically; verify re-hashes the files and reports drift. Both take a
//! per-file tick callback so long runs can heartbeat their lock.

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

/// Manifest file name at the top of each dataset directory.
pub const MANIFEST_FILE: &str = "MANIFEST.tsv";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("{dir} has no manifest, run `herd refresh` first")]
    Missing { dir: PathBuf },
    #[error("malformed manifest {path} at line {line}")]
    Malformed { path: PathBuf, line: usize },
    #[error("manifest I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ManifestError + '_ {
    move |source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What a refresh wrote.
#[derive(Debug, Clone, Copy)]
pub struct RefreshStats {
    pub files: usize,
    pub bytes: u64,
}

/// What a verify found.
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub checked: usize,
    /// Present but content differs from the manifest
    pub mismatched: Vec<PathBuf>,
    /// In the manifest but gone from disk
    pub missing: Vec<PathBuf>,
    /// On disk but absent from the manifest
    pub untracked: Vec<PathBuf>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty() && self.untracked.is_empty()
    }

    pub fn describe(&self) -> String {
        if self.is_clean() {
            format!("{} files verified", self.checked)
        } else {
            format!(
                "{} files checked: {} mismatched, {} missing, {} untracked",
                self.checked,
                self.mismatched.len(),
                self.missing.len(),
                self.untracked.len()
            )
        }
    }
}

pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILE)
}

/// Recompute the manifest for one dataset directory.
///
/// Caller is expected to hold an exclusive lock on the manifest; the write
/// itself is atomic (temp file + rename) so a crash never leaves a torn
/// manifest, only a stale one.
pub fn refresh(dir: &Path, mut tick: impl FnMut(&Path)) -> Result<RefreshStats, ManifestError> {
    let mut lines = Vec::new();
    let mut bytes = 0u64;
    for rel in data_files(dir)? {
        tick(&rel);
        let abs = dir.join(&rel);
        let size = std::fs::metadata(&abs).map_err(io_err(&abs))?.len();
        let hash = hash_file(&abs)?;
        bytes += size;
        lines.push(format!("{}\t{}\t{}", rel.display(), size, hash));
    }

    let target = manifest_path(dir);
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err(dir))?;
    for line in &lines {
        writeln!(tmp, "{line}").map_err(io_err(&target))?;
    }
    tmp.persist(&target).map_err(|e| ManifestError::Io {
        path: target.clone(),
        source: e.error,
    })?;

    Ok(RefreshStats {
        files: lines.len(),
        bytes,
    })
}

/// Re-hash a dataset's files against its manifest.
pub fn verify(dir: &Path, mut tick: impl FnMut(&Path)) -> Result<VerifyReport, ManifestError> {
    let target = manifest_path(dir);
    let content = match std::fs::read_to_string(&target) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ManifestError::Missing {
                dir: dir.to_path_buf(),
            })
        }
        Err(source) => return Err(ManifestError::Io { path: target, source }),
    };

    let mut report = VerifyReport::default();
    let mut tracked = std::collections::BTreeSet::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let (rel, size, hash) = match (fields.next(), fields.next(), fields.next()) {
            (Some(r), Some(s), Some(h)) => (PathBuf::from(r), s, h),
            _ => {
                return Err(ManifestError::Malformed {
                    path: target.clone(),
                    line: lineno + 1,
                })
            }
        };
        let expected_size: u64 = size.parse().map_err(|_| ManifestError::Malformed {
            path: target.clone(),
            line: lineno + 1,
        })?;
        tracked.insert(rel.clone());
        tick(&rel);

        let abs = dir.join(&rel);
        let meta = match std::fs::metadata(&abs) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                report.missing.push(rel);
                continue;
            }
            Err(source) => return Err(ManifestError::Io { path: abs, source }),
        };
        report.checked += 1;
        // Size check first; hashing is the expensive part
        if meta.len() != expected_size || hash_file(&abs)? != hash {
            report.mismatched.push(rel);
        }
    }

    for rel in data_files(dir)? {
        if !tracked.contains(&rel) {
            report.untracked.push(rel);
        }
    }
    Ok(report)
}

/// Data files of a dataset, as sorted paths relative to its directory.
/// The manifest itself, lock sidecars, and hidden files are not data.
fn data_files(dir: &Path) -> Result<Vec<PathBuf>, ManifestError> {
    let mut files = Vec::new();
    let walker = WalkDir::new(dir).into_iter().filter_entry(|e| {
        // Hidden entries (and everything under hidden directories) are not data
        e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.')
    });
    for entry in walker {
        let entry = entry.map_err(|e| ManifestError::Io {
            path: dir.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name == MANIFEST_FILE || name.ends_with(".lock") {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .expect("walkdir yields paths under its root")
            .to_path_buf();
        files.push(rel);
    }
    files.sort();
    Ok(files)
}

fn hash_file(path: &Path) -> Result<String, ManifestError> {
    let mut file = std::fs::File::open(path).map_err(io_err(path))?;
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut file, &mut hasher).map_err(io_err(path))?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dataset() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("counts.tsv"), "1\t2\t3\n").unwrap();
        std::fs::create_dir(dir.path().join("raw")).unwrap();
        std::fs::write(dir.path().join("raw").join("sample1.cel"), b"binary-ish").unwrap();
        dir
    }

    #[test]
    fn refresh_then_verify_is_clean() {
        let dir = dataset();
        let stats = refresh(dir.path(), |_| {}).unwrap();
        assert_eq!(stats.files, 2);
        assert!(stats.bytes > 0);

        let report = verify(dir.path(), |_| {}).unwrap();
        assert!(report.is_clean(), "{}", report.describe());
        assert_eq!(report.checked, 2);
    }

    #[test]
    fn verify_reports_drift() {
        let dir = dataset();
        refresh(dir.path(), |_| {}).unwrap();

        std::fs::write(dir.path().join("counts.tsv"), "changed\n").unwrap();
        std::fs::remove_file(dir.path().join("raw").join("sample1.cel")).unwrap();
        std::fs::write(dir.path().join("new.txt"), "untracked").unwrap();

        let report = verify(dir.path(), |_| {}).unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.mismatched, [PathBuf::from("counts.tsv")]);
        assert_eq!(report.missing, [PathBuf::from("raw/sample1.cel")]);
        assert_eq!(report.untracked, [PathBuf::from("new.txt")]);
    }

    #[test]
    fn verify_without_manifest_says_refresh_first() {
        let dir = dataset();
        assert!(matches!(
            verify(dir.path(), |_| {}),
            Err(ManifestError::Missing { .. })
        ));
    }

    #[test]
    fn manifest_and_sidecars_are_not_data() {
        let dir = dataset();
        refresh(dir.path(), |_| {}).unwrap();
        std::fs::write(dir.path().join("MANIFEST.tsv.x.lock"), "whatever").unwrap();
        // A second refresh must not track the manifest or the sidecar
        let stats = refresh(dir.path(), |_| {}).unwrap();
        assert_eq!(stats.files, 2);
    }

    #[test]
    fn tick_sees_each_file() {
        let dir = dataset();
        let mut seen = Vec::new();
        refresh(dir.path(), |p| seen.push(p.to_path_buf())).unwrap();
        assert_eq!(seen.len(), 2);
    }
}
