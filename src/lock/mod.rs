//! Disk-resident lock registry for cross-process mutual exclusion
//!
//! Commands that mutate shared data files run as independent OS processes,
//! sometimes on different hosts against the same network filesystem, so an
//! in-memory mutex cannot coordinate them. Each lock is a sidecar file next
//! to the locked resource; crash tolerance comes from a heartbeat TTL rather
//! than a coordination service.
//!
//! Acquisition never waits: a busy lock fails immediately with the holder's
//! identity and the caller decides whether to retry. Exclusive claims race
//! through an atomic `create_new` on a canonical sidecar name, so exactly one
//! of two concurrent acquirers wins.
//!
//! ## Module Structure
//!
//! - `info` - Lock metadata and the `field: value` sidecar encoding
//! - `discover` - Bounded directory walk producing every parseable sidecar

mod discover;
mod info;

pub use discover::LockWalk;
pub use info::{LockInfo, LockMode, LockOwner, ParseLockError};

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Lock acquisition and maintenance failures.
#[derive(Debug, Error)]
pub enum LockError {
    /// An incompatible, non-stale holder exists. Retry policy belongs to the
    /// caller; the registry never retries on its own.
    #[error("{} lock on {} held by {} (acquired {})", .held_by.mode, .held_by.resource.display(), .held_by.owner, .held_by.acquired_at.to_rfc3339())]
    Busy { held_by: Box<LockInfo> },

    /// A sidecar exists but cannot be parsed and is too fresh to reclaim —
    /// most likely a concurrent holder mid-write.
    #[error("lock sidecar {path} is unreadable, assuming the lock is held")]
    Unreadable { path: PathBuf },

    #[error("cannot lock {path}: {reason}")]
    InvalidResource { path: PathBuf, reason: &'static str },

    #[error("lock I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A held lock. Releases its sidecar on [`release`](Self::release) or, as a
/// fallback, on drop — so an error path unwinding through a holder cannot
/// leave a fresh lock behind.
#[derive(Debug)]
pub struct LockGuard {
    info: LockInfo,
    sidecar: PathBuf,
    released: bool,
}

impl LockGuard {
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn resource(&self) -> &Path {
        &self.info.resource
    }

    /// Refresh `heartbeat_at`. Holders of long-running exclusive locks must
    /// call this periodically or risk reclamation by a competing process.
    ///
    /// The rewrite is atomic (temp file + rename in the sidecar's directory)
    /// so discovery never observes a half-written record from a heartbeat.
    pub fn heartbeat(&mut self) -> Result<(), LockError> {
        self.info.heartbeat_at = info::now_micros();
        let dir = self.sidecar.parent().ok_or_else(|| LockError::InvalidResource {
            path: self.sidecar.clone(),
            reason: "sidecar has no parent directory",
        })?;
        let io = |source| LockError::Io {
            path: self.sidecar.clone(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io)?;
        tmp.write_all(self.info.render().as_bytes()).map_err(io)?;
        tmp.persist(&self.sidecar).map_err(|e| io(e.error))?;
        Ok(())
    }

    /// Delete the sidecar. Idempotent: a sidecar already gone (double release
    /// during error handling, or reclaimed by another process) is a no-op.
    pub fn release(mut self) -> Result<(), LockError> {
        self.release_inner().map_err(|source| LockError::Io {
            path: self.sidecar.clone(),
            source,
        })
    }

    fn release_inner(&mut self) -> std::io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match std::fs::remove_file(&self.sidecar) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            tracing::warn!(sidecar = %self.sidecar.display(), error = %e, "failed to release lock on drop");
        }
    }
}

/// Registry of sidecar-file locks with a staleness TTL.
pub struct LockRegistry {
    ttl: Duration,
}

impl LockRegistry {
    /// Default reclamation TTL. Long enough that a holder heartbeating every
    /// minute has several missed beats of slack.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Try to lock `resource`. Fails immediately with [`LockError::Busy`] if
    /// an incompatible holder is present and fresh; stale holders are
    /// reclaimed first, each reclamation logged as a warning.
    pub fn acquire(&self, resource: &Path, mode: LockMode, tag: &str) -> Result<LockGuard, LockError> {
        match mode {
            LockMode::Exclusive => self.acquire_exclusive(resource, tag),
            LockMode::Shared => self.acquire_shared(resource, tag),
        }
    }

    /// See [`LockGuard::heartbeat`].
    pub fn heartbeat(&self, guard: &mut LockGuard) -> Result<(), LockError> {
        guard.heartbeat()
    }

    /// See [`LockGuard::release`].
    pub fn release(&self, guard: LockGuard) -> Result<(), LockError> {
        guard.release()
    }

    /// Walk `root` up to `max_depth` directory levels (0 = only files
    /// directly under `root`) and yield every parseable lock sidecar.
    ///
    /// The walk is lazy and fresh on every call: no cached state, so a
    /// listing taken after a release reflects the release. Corrupt or
    /// mid-write sidecars are logged as warnings and skipped.
    pub fn list_locks(&self, root: &Path, max_depth: usize) -> LockWalk {
        discover::walk(root, max_depth)
    }

    fn acquire_exclusive(&self, resource: &Path, tag: &str) -> Result<LockGuard, LockError> {
        let sidecar = exclusive_sidecar(resource)?;

        // Pre-check lets us reclaim a stale holder; the create_new below is
        // the authoritative claim.
        if let Some(holder) = self.fresh_holder(&sidecar)? {
            return Err(LockError::Busy { held_by: Box::new(holder) });
        }

        let info = LockInfo::acquire_now(resource.to_path_buf(), LockMode::Exclusive, tag);
        let guard = self.claim(&sidecar, info)?;

        // The canonical name serializes exclusive-vs-exclusive; shared
        // holders have per-owner sidecars, so scan for them after claiming.
        // A racing shared acquirer re-checks for us after writing its own
        // sidecar, so at worst both sides back off — never two holders.
        for shared in self.shared_sidecars(resource)? {
            match self.fresh_holder(&shared) {
                Ok(None) => {}
                Ok(Some(holder)) => {
                    // guard drop removes our sidecar
                    drop(guard);
                    return Err(LockError::Busy { held_by: Box::new(holder) });
                }
                Err(e) => {
                    drop(guard);
                    return Err(e);
                }
            }
        }

        Ok(guard)
    }

    fn acquire_shared(&self, resource: &Path, tag: &str) -> Result<LockGuard, LockError> {
        let exclusive = exclusive_sidecar(resource)?;
        if let Some(holder) = self.fresh_holder(&exclusive)? {
            return Err(LockError::Busy { held_by: Box::new(holder) });
        }

        let info = LockInfo::acquire_now(resource.to_path_buf(), LockMode::Shared, tag);
        let sidecar = shared_sidecar(resource, &info.owner)?;
        if let Some(holder) = self.fresh_holder(&sidecar)? {
            // Same pid@host already holds (or a recycled pid left a fresh
            // sidecar behind) — either way, not ours to steal.
            return Err(LockError::Busy { held_by: Box::new(holder) });
        }
        let guard = self.claim(&sidecar, info)?;

        // Close the window against an exclusive acquirer that scanned for
        // shared sidecars before ours existed: if a fresh exclusive claim is
        // present now, back off.
        match self.fresh_holder(&exclusive) {
            Ok(None) => Ok(guard),
            Ok(Some(holder)) => {
                drop(guard);
                Err(LockError::Busy { held_by: Box::new(holder) })
            }
            Err(e) => {
                drop(guard);
                Err(e)
            }
        }
    }

    /// Atomically create `sidecar` with `info`'s encoding. `AlreadyExists`
    /// means we lost a race and the winner's record is reported as the
    /// holder.
    fn claim(&self, sidecar: &Path, info: LockInfo) -> Result<LockGuard, LockError> {
        let io = |source| LockError::Io {
            path: sidecar.to_path_buf(),
            source,
        };
        match OpenOptions::new().write(true).create_new(true).open(sidecar) {
            Ok(mut file) => {
                file.write_all(info.render().as_bytes()).map_err(io)?;
                file.sync_all().map_err(io)?;
                Ok(LockGuard {
                    info,
                    sidecar: sidecar.to_path_buf(),
                    released: false,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // The winner may still be writing its record; wait out the
                // few milliseconds between its create_new and sync so the
                // error names the actual holder instead of looking corrupt.
                for attempt in 0.. {
                    match self.fresh_holder(sidecar) {
                        Ok(Some(holder)) => {
                            return Err(LockError::Busy { held_by: Box::new(holder) })
                        }
                        // Winner released (or went stale) in the meantime; one
                        // retry would likely succeed, but that is the caller's
                        // policy, not ours.
                        Ok(None) => break,
                        Err(LockError::Unreadable { .. }) if attempt < 50 => {
                            std::thread::sleep(Duration::from_millis(10));
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(LockError::Unreadable {
                    path: sidecar.to_path_buf(),
                })
            }
            Err(source) => Err(io(source)),
        }
    }

    /// Read a sidecar and return its holder if present and fresh.
    ///
    /// Stale holders are reclaimed here (sidecar deleted, warning logged).
    /// An unparseable sidecar falls back to the file mtime: older than the
    /// TTL means an orphaned partial write and is reclaimed too; fresher
    /// means a concurrent writer and surfaces as [`LockError::Unreadable`].
    fn fresh_holder(&self, sidecar: &Path) -> Result<Option<LockInfo>, LockError> {
        let content = match std::fs::read_to_string(sidecar) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LockError::Io {
                    path: sidecar.to_path_buf(),
                    source,
                })
            }
        };
        match LockInfo::parse(&content) {
            Ok(info) if info.is_stale(self.ttl) => {
                self.reclaim(sidecar, Some(&info))?;
                Ok(None)
            }
            Ok(info) => Ok(Some(info)),
            Err(parse_err) => {
                let stale_by_mtime = std::fs::metadata(sidecar)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|mtime| mtime.elapsed().ok())
                    .is_some_and(|elapsed| elapsed > self.ttl);
                if stale_by_mtime {
                    tracing::warn!(sidecar = %sidecar.display(), error = %parse_err, "unreadable lock sidecar is older than TTL");
                    self.reclaim(sidecar, None)?;
                    Ok(None)
                } else {
                    Err(LockError::Unreadable {
                        path: sidecar.to_path_buf(),
                    })
                }
            }
        }
    }

    /// Delete an orphaned sidecar. Logged as a distinct event so operators
    /// can see reclamations in the command output.
    fn reclaim(&self, sidecar: &Path, holder: Option<&LockInfo>) -> Result<(), LockError> {
        match holder {
            Some(info) => tracing::warn!(
                resource = %info.resource.display(),
                owner = %info.owner,
                heartbeat_at = %info.heartbeat_at.to_rfc3339(),
                "reclaimed stale lock"
            ),
            None => tracing::warn!(sidecar = %sidecar.display(), "reclaimed unreadable stale lock sidecar"),
        }
        match std::fs::remove_file(sidecar) {
            Ok(()) => Ok(()),
            // Another acquirer reclaimed it first
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: sidecar.to_path_buf(),
                source,
            }),
        }
    }

    /// Existing shared sidecars for `resource` (any owner).
    fn shared_sidecars(&self, resource: &Path) -> Result<Vec<PathBuf>, LockError> {
        let (dir, name) = split_resource(resource)?;
        let prefix = format!("{name}.s-");
        let entries = std::fs::read_dir(dir).map_err(|source| LockError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| LockError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&prefix) && file_name.ends_with(".lock") {
                found.push(entry.path());
            }
        }
        Ok(found)
    }
}

/// `<resource>.x.lock` — canonical, so concurrent exclusive claims collide.
fn exclusive_sidecar(resource: &Path) -> Result<PathBuf, LockError> {
    let (dir, name) = split_resource(resource)?;
    Ok(dir.join(format!("{name}.x.lock")))
}

/// `<resource>.s-<pid>-<host>.lock` — per-owner, so shared holders coexist.
fn shared_sidecar(resource: &Path, owner: &LockOwner) -> Result<PathBuf, LockError> {
    let (dir, name) = split_resource(resource)?;
    let host: String = owner
        .host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
        .collect();
    Ok(dir.join(format!("{name}.s-{}-{host}.lock", owner.pid)))
}

fn split_resource(resource: &Path) -> Result<(&Path, String), LockError> {
    let name = resource
        .file_name()
        .ok_or_else(|| LockError::InvalidResource {
            path: resource.to_path_buf(),
            reason: "resource path has no file name",
        })?
        .to_string_lossy()
        .into_owned();
    let dir = resource.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    Ok((dir, name))
}
