//! Dataset catalog under a shared data root
//!
//! A dataset is one directory directly under the root. The root also hosts
//! the workspace state directory (`.herd/`) holding the audit history;
//! state and hidden directories are never datasets.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Workspace state directory name under the data root.
pub const STATE_DIR: &str = ".herd";

/// Read-only view of the datasets under one data root.
pub struct Catalog {
    root: PathBuf,
}

impl Catalog {
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            bail!("data root {} does not exist or is not a directory", root.display());
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// All dataset ids, sorted. Hidden directories and plain files are not
    /// datasets.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("failed to list data root {}", self.root.display()))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            ids.push(name);
        }
        ids.sort();
        Ok(ids)
    }

    /// Directory for one dataset id. The id is validated, not trusted: ids
    /// come from the command line and from list files.
    pub fn dataset_dir(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(id))
    }
}

/// Reject ids that would escape the data root or name hidden entries (the
/// state directory included), mirroring what `list_ids` will ever return.
fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        bail!("dataset id is empty");
    }
    if id.starts_with('.') || id.contains('/') || id.contains('\\') {
        bail!("invalid dataset id {id:?}: ids name visible directories directly under the data root");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lists_only_visible_directories() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("GSE2")).unwrap();
        std::fs::create_dir(root.path().join("GSE10")).unwrap();
        std::fs::create_dir(root.path().join(".herd")).unwrap();
        std::fs::write(root.path().join("notes.txt"), "x").unwrap();

        let catalog = Catalog::open(root.path()).unwrap();
        assert_eq!(catalog.list_ids().unwrap(), ["GSE10", "GSE2"]);
    }

    #[test]
    fn rejects_escaping_ids() {
        let root = TempDir::new().unwrap();
        let catalog = Catalog::open(root.path()).unwrap();
        assert!(catalog.dataset_dir("..").is_err());
        assert!(catalog.dataset_dir("a/b").is_err());
        assert!(catalog.dataset_dir("").is_err());
        assert!(catalog.dataset_dir("GSE123").is_ok());
    }

    #[test]
    fn rejects_hidden_ids() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join(STATE_DIR)).unwrap();
        let catalog = Catalog::open(root.path()).unwrap();
        // The state directory is never a dataset, even though it exists
        assert!(catalog.dataset_dir(STATE_DIR).is_err());
        assert!(catalog.dataset_dir(".hidden").is_err());
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(Catalog::open(Path::new("/definitely/not/here")).is_err());
    }
}
