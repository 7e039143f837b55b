//! Command bodies: batch runs, lock listing, audit history

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use herd::batch::{BatchExecutor, OutcomeStatus, ProcessingOutcome, WorkItem};
use herd::catalog::Catalog;
use herd::config::Config;
use herd::lock::{LockMode, LockRegistry};
use herd::{manifest, FileAuditLog, OperationKind};

use super::display::{render_lock_listing, render_summary, BatchFormat};
use super::signal;
use super::{BatchArgs, Cli, ExitCode};

/// Resolve the effective data root: --root / HERD_ROOT beats the config
/// file's `data_root`, which beats the current directory.
fn data_root(cli: &Cli, config: &Config) -> PathBuf {
    cli.root
        .clone()
        .or_else(|| config.data_root.clone())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub(super) fn load_config(cli: &Cli) -> Config {
    // The workspace .herd.toml is searched where --root points (or cwd)
    Config::load(cli.root.as_deref().unwrap_or(Path::new(".")))
}

/// Shared driver for `herd refresh` and `herd verify`.
pub(super) fn run_batch(cli: &Cli, args: &BatchArgs, kind: OperationKind) -> Result<ExitCode> {
    let config = load_config(cli);
    let root = data_root(cli, &config);
    let quiet = cli.quiet || config.quiet_or_default();

    let catalog = Catalog::open(&root)?;
    let audit = FileAuditLog::for_data_root(&root)?;
    let registry = LockRegistry::new(config.lock_ttl());
    let heartbeat_interval = config.heartbeat_interval();

    let items = resolve_items(&catalog, args)?;
    if items.is_empty() {
        println!("No datasets under {}, nothing to do.", root.display());
        return Ok(ExitCode::Success);
    }

    let threads = args.threads.unwrap_or_else(|| config.threads_or_default());
    tracing::debug!(kind = %kind, items = items.len(), threads, force = args.force, "starting batch");
    signal::setup_signal_handler();

    let progress = if quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(items.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
                .expect("static progress template is valid"),
        );
        bar
    };

    let op = |item: &WorkItem| -> Result<String> {
        let dir = catalog.dataset_dir(&item.id)?;
        if !dir.is_dir() {
            bail!("no dataset directory at {}", dir.display());
        }
        match kind {
            OperationKind::Refresh => refresh_one(&registry, &dir, heartbeat_interval),
            OperationKind::Verify => verify_one(&registry, &dir, heartbeat_interval),
        }
    };
    let reporter = |outcome: &ProcessingOutcome| {
        progress.inc(1);
        if outcome.status == OutcomeStatus::Error {
            progress.set_message(format!("last error: {}", outcome.item.id));
        }
    };

    let summary = BatchExecutor::new(&audit, kind)
        .concurrency(threads)
        .force(args.force)
        .interrupt_flag(signal::interrupt_flag())
        .reporter(&reporter)
        .run(items, op)?;
    progress.finish_and_clear();

    let format = args.batch_format.unwrap_or(if args.batch_output_file.is_some() {
        BatchFormat::Tsv
    } else {
        BatchFormat::Text
    });
    match &args.batch_output_file {
        Some(path) => {
            let mut file = std::fs::File::create(path)
                .with_context(|| format!("failed to create batch output file {}", path.display()))?;
            render_summary(&summary, format, false, &mut file)?;
        }
        None => {
            let stdout = std::io::stdout();
            render_summary(&summary, format, true, &mut stdout.lock())?;
        }
    }

    Ok(if summary.interrupted {
        ExitCode::Interrupted
    } else if summary.has_errors() {
        ExitCode::BatchErrors
    } else {
        ExitCode::Success
    })
}

/// Recompute one dataset's manifest under an exclusive lock, heartbeating
/// while the hashing runs.
fn refresh_one(registry: &LockRegistry, dir: &Path, heartbeat_interval: Duration) -> Result<String> {
    let manifest_path = manifest::manifest_path(dir);
    let mut lock = registry.acquire(&manifest_path, LockMode::Exclusive, OperationKind::Refresh.as_str())?;
    let mut last_beat = Instant::now();
    let stats = manifest::refresh(dir, |_| {
        if last_beat.elapsed() >= heartbeat_interval {
            if let Err(e) = lock.heartbeat() {
                tracing::warn!(resource = %manifest_path.display(), error = %e, "lock heartbeat failed");
            }
            last_beat = Instant::now();
        }
    })?;
    lock.release()?;
    Ok(format!("refreshed manifest ({} files, {} bytes)", stats.files, stats.bytes))
}

/// Check one dataset against its manifest under a shared lock; drift is an
/// item-level error.
fn verify_one(registry: &LockRegistry, dir: &Path, heartbeat_interval: Duration) -> Result<String> {
    let manifest_path = manifest::manifest_path(dir);
    let mut lock = registry.acquire(&manifest_path, LockMode::Shared, OperationKind::Verify.as_str())?;
    let mut last_beat = Instant::now();
    let report = manifest::verify(dir, |_| {
        if last_beat.elapsed() >= heartbeat_interval {
            if let Err(e) = lock.heartbeat() {
                tracing::warn!(resource = %manifest_path.display(), error = %e, "lock heartbeat failed");
            }
            last_beat = Instant::now();
        }
    })?;
    lock.release()?;
    if report.is_clean() {
        Ok(report.describe())
    } else {
        bail!("{}", report.describe())
    }
}

/// Work-item selection: positional ids, --all, --from-file; dedup keeps the
/// first occurrence's position so reports stay in the order the user gave.
fn resolve_items(catalog: &Catalog, args: &BatchArgs) -> Result<Vec<WorkItem>> {
    let mut ids: Vec<String> = Vec::new();
    if args.all {
        ids.extend(catalog.list_ids()?);
    }
    ids.extend(args.ids.iter().cloned());
    if let Some(path) = &args.from_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read id list {}", path.display()))?;
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if !line.is_empty() {
                ids.push(line.to_string());
            }
        }
    }
    if ids.is_empty() && !args.all {
        bail!("no datasets selected; pass ids, --all, or --from-file");
    }

    let mut seen = HashSet::new();
    Ok(ids
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .map(WorkItem::dataset)
        .collect())
}

/// `herd locks` — enumerate lock sidecars under the given roots.
pub(super) fn cmd_locks(cli: &Cli, roots: &[PathBuf], max_depth: usize) -> Result<ExitCode> {
    let config = load_config(cli);
    let default_root = data_root(cli, &config);
    let roots: Vec<&Path> = if roots.is_empty() {
        vec![default_root.as_path()]
    } else {
        roots.iter().map(PathBuf::as_path).collect()
    };

    let registry = LockRegistry::new(config.lock_ttl());
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut total = 0;
    for root in roots {
        total += render_lock_listing(registry.list_locks(root, max_depth), &mut out)?;
    }
    if total == 0 {
        writeln!(out, "No locks held.")?;
    }
    Ok(ExitCode::Success)
}

/// `herd history` — audit events for one dataset, newest first.
pub(super) fn cmd_history(cli: &Cli, id: &str, limit: usize) -> Result<ExitCode> {
    let config = load_config(cli);
    let root = data_root(cli, &config);
    let audit = FileAuditLog::for_data_root(&root)?;

    let mut records = audit.records_for(id)?;
    records.reverse();
    records.truncate(limit);

    if records.is_empty() {
        println!("No audit events for {id}.");
        return Ok(ExitCode::Success);
    }
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for record in records {
        writeln!(
            out,
            "{}  {:<8} {:<8} {}",
            record.at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            record.kind,
            match record.outcome {
                herd::audit::AuditOutcome::Success => "success",
                herd::audit::AuditOutcome::Failure => "failure",
            },
            record.note.as_deref().unwrap_or(""),
        )?;
    }
    Ok(ExitCode::Success)
}
