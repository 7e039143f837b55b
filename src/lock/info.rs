//! Lock metadata and its sidecar encoding
//!
//! One sidecar file per lock holder, `field: value` per line, so holders are
//! visible to `herd locks`, plain grep, and manual cleanup after a crash:
//!
//! ```text
//! path: /data/GSE123/MANIFEST.tsv
//! mode: exclusive
//! owner: 12345@worker-3 refresh
//! acquired_at: 2026-08-30T12:00:00.123456Z
//! heartbeat_at: 2026-08-30T12:00:30.456789Z
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use once_cell::sync::Lazy;
use thiserror::Error;

/// Lock compatibility class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Any number of shared holders may coexist
    Shared,
    /// Excludes every other holder, shared or exclusive
    Exclusive,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Shared => "shared",
            LockMode::Exclusive => "exclusive",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockMode {
    type Err = ParseLockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" => Ok(LockMode::Shared),
            "exclusive" => Ok(LockMode::Exclusive),
            other => Err(ParseLockError::BadValue {
                field: "mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Identity of a lock holder: process, host, and a logical tag naming what
/// the holder is doing (e.g. the command name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    pub pid: u32,
    pub host: String,
    pub tag: String,
}

impl LockOwner {
    /// Owner identity for the current process.
    pub fn local(tag: &str) -> Self {
        Self {
            pid: std::process::id(),
            host: local_hostname().clone(),
            tag: tag.to_string(),
        }
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} {}", self.pid, self.host, self.tag)
    }
}

impl FromStr for LockOwner {
    type Err = ParseLockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ParseLockError::BadValue {
            field: "owner",
            value: s.to_string(),
        };
        let (pid, rest) = s.split_once('@').ok_or_else(bad)?;
        let (host, tag) = rest.split_once(' ').ok_or_else(bad)?;
        Ok(Self {
            pid: pid.parse().map_err(|_| bad())?,
            host: host.to_string(),
            tag: tag.to_string(),
        })
    }
}

/// Parsed contents of one lock sidecar.
#[derive(Debug, Clone)]
pub struct LockInfo {
    /// The locked resource (the data file, not the sidecar)
    pub resource: PathBuf,
    pub mode: LockMode,
    pub owner: LockOwner,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

/// Current time truncated to microseconds, the precision the sidecar
/// encoding carries, so a written record parses back exactly.
pub(crate) fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(now.nanosecond() / 1000 * 1000).unwrap_or(now)
}

impl LockInfo {
    /// Fresh lock record held by the current process.
    pub fn acquire_now(resource: PathBuf, mode: LockMode, tag: &str) -> Self {
        let now = now_micros();
        Self {
            resource,
            mode,
            owner: LockOwner::local(tag),
            acquired_at: now,
            heartbeat_at: now,
        }
    }

    /// Time since acquisition (zero if the clock went backwards).
    pub fn age(&self) -> Duration {
        (Utc::now() - self.acquired_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// A holder whose heartbeat is older than `ttl` is presumed dead and may
    /// be reclaimed by a competing acquirer.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        match (Utc::now() - self.heartbeat_at).to_std() {
            Ok(since) => since > ttl,
            // Heartbeat in the future: clock skew between hosts, not staleness
            Err(_) => false,
        }
    }

    /// Render the sidecar encoding.
    pub fn render(&self) -> String {
        format!(
            "path: {}\nmode: {}\nowner: {}\nacquired_at: {}\nheartbeat_at: {}\n",
            self.resource.display(),
            self.mode,
            self.owner,
            self.acquired_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.heartbeat_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        )
    }

    /// Parse a sidecar. Unknown fields are ignored so older binaries keep
    /// reading sidecars written by newer ones.
    pub fn parse(content: &str) -> Result<Self, ParseLockError> {
        let mut resource = None;
        let mut mode = None;
        let mut owner = None;
        let mut acquired_at = None;
        let mut heartbeat_at = None;

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let (field, value) = line
                .split_once(": ")
                .ok_or_else(|| ParseLockError::BadLine(line.to_string()))?;
            match field {
                "path" => resource = Some(PathBuf::from(value)),
                "mode" => mode = Some(value.parse()?),
                "owner" => owner = Some(value.parse()?),
                "acquired_at" => acquired_at = Some(parse_timestamp("acquired_at", value)?),
                "heartbeat_at" => heartbeat_at = Some(parse_timestamp("heartbeat_at", value)?),
                _ => {}
            }
        }

        Ok(Self {
            resource: resource.ok_or(ParseLockError::MissingField("path"))?,
            mode: mode.ok_or(ParseLockError::MissingField("mode"))?,
            owner: owner.ok_or(ParseLockError::MissingField("owner"))?,
            acquired_at: acquired_at.ok_or(ParseLockError::MissingField("acquired_at"))?,
            heartbeat_at: heartbeat_at.ok_or(ParseLockError::MissingField("heartbeat_at"))?,
        })
    }
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, ParseLockError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ParseLockError::BadValue {
            field,
            value: value.to_string(),
        })
}

/// A sidecar that could not be parsed — possibly mid-write by a concurrent
/// holder, so discovery treats this as a warning, never a fatal error.
#[derive(Debug, Error)]
pub enum ParseLockError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("bad value for `{field}`: {value:?}")]
    BadValue { field: &'static str, value: String },
    #[error("malformed line: {0:?}")]
    BadLine(String),
}

/// Hostname for owner identity, resolved once.
///
/// No hostname crate in the stack; environment first, `/etc/hostname` as the
/// usual non-interactive fallback.
pub(crate) fn local_hostname() -> &'static String {
    static HOSTNAME: Lazy<String> = Lazy::new(|| {
        std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .ok()
            .filter(|h| !h.trim().is_empty())
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty())
            })
            .unwrap_or_else(|| "unknown-host".to_string())
    });
    &HOSTNAME
}
