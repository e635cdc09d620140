//! # Database Backups
//!
//! Plain-SQL dumps under `BACKUP_DIR/YYYY/MM/DD/detecktiv_YYYYmmdd_HHMMSS.sql`,
//! taken with `pg_dump` and restored with `psql`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;
use tokio::process::Command;
use walkdir::WalkDir;

const FILE_PREFIX: &str = "detecktiv_";
const FILE_STAMP: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("{tool} could not be started: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {code:?}: {stderr}")]
    Failed {
        tool: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("backup file not found: {0}")]
    Missing(PathBuf),

    #[error("database URL is empty")]
    NoDatabaseUrl,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where a backup taken at a given instant is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPlan {
    pub path: PathBuf,
    pub taken_at: DateTime<Utc>,
}

impl BackupPlan {
    pub fn new(dir: &Path, now: DateTime<Utc>) -> Self {
        let path = dir
            .join(now.format("%Y").to_string())
            .join(now.format("%m").to_string())
            .join(now.format("%d").to_string())
            .join(format!("{FILE_PREFIX}{}.sql", now.format(FILE_STAMP)));
        Self { path, taken_at: now }
    }
}

/// A backup file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFile {
    pub path: PathBuf,
    pub taken_at: DateTime<Utc>,
    pub size_bytes: u64,
}

fn stamp_from_name(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    let stamp = stem.strip_prefix(FILE_PREFIX)?;
    let naive = NaiveDateTime::parse_from_str(stamp, FILE_STAMP).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

async fn run(tool: &'static str, command: &mut Command) -> Result<(), BackupError> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| BackupError::Spawn { tool, source })?;

    if output.status.success() {
        return Ok(());
    }
    Err(BackupError::Failed {
        tool,
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Dump the database to a new file under `dir`.
pub async fn create_backup(
    database_url: &str,
    dir: &Path,
    now: DateTime<Utc>,
) -> Result<BackupPlan, BackupError> {
    if database_url.trim().is_empty() {
        return Err(BackupError::NoDatabaseUrl);
    }
    let plan = BackupPlan::new(dir, now);
    if let Some(parent) = plan.path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| BackupError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    tracing::info!(path = %plan.path.display(), "starting database backup");
    run(
        "pg_dump",
        Command::new("pg_dump")
            .arg("--no-owner")
            .arg("--no-privileges")
            .arg("--dbname")
            .arg(database_url)
            .arg("--file")
            .arg(&plan.path),
    )
    .await?;
    tracing::info!(path = %plan.path.display(), "database backup written");
    Ok(plan)
}

/// Replay a SQL dump into the database, stopping at the first error.
pub async fn restore_backup(database_url: &str, file: &Path) -> Result<(), BackupError> {
    if database_url.trim().is_empty() {
        return Err(BackupError::NoDatabaseUrl);
    }
    if !file.is_file() {
        return Err(BackupError::Missing(file.to_path_buf()));
    }

    tracing::warn!(path = %file.display(), "restoring database from backup");
    run(
        "psql",
        Command::new("psql")
            .arg("--dbname")
            .arg(database_url)
            .arg("-v")
            .arg("ON_ERROR_STOP=1")
            .arg("--file")
            .arg(file),
    )
    .await
}

/// All `.sql` files under `dir`, newest first.
///
/// Files named `detecktiv_YYYYmmdd_HHMMSS.sql` are dated by their name; any
/// other dump falls back to its modification time. A missing directory
/// yields an empty list.
pub fn list_backups(dir: &Path) -> Result<Vec<BackupFile>, BackupError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|err| BackupError::Io {
            path: err.path().unwrap_or(dir).to_path_buf(),
            source: err.into(),
        })?;
        if !entry.file_type().is_file()
            || entry.path().extension().and_then(|e| e.to_str()) != Some("sql")
        {
            continue;
        }
        let metadata = entry.metadata().map_err(|err| BackupError::Io {
            path: entry.path().to_path_buf(),
            source: err.into(),
        })?;
        let taken_at = match stamp_from_name(entry.path()) {
            Some(stamp) => stamp,
            None => metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        };
        backups.push(BackupFile {
            path: entry.path().to_path_buf(),
            taken_at,
            size_bytes: metadata.len(),
        });
    }

    backups.sort_by(|a, b| b.taken_at.cmp(&a.taken_at).then_with(|| b.path.cmp(&a.path)));
    Ok(backups)
}

/// Delete backups taken more than `keep_days` before `now`. Returns the
/// removed paths.
pub fn prune_backups(
    dir: &Path,
    keep_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<PathBuf>, BackupError> {
    let cutoff = now - Duration::days(i64::from(keep_days));
    let mut removed = Vec::new();
    for backup in list_backups(dir)? {
        if backup.taken_at >= cutoff {
            continue;
        }
        std::fs::remove_file(&backup.path).map_err(|source| BackupError::Io {
            path: backup.path.clone(),
            source,
        })?;
        tracing::info!(path = %backup.path.display(), "pruned old backup");
        removed.push(backup.path);
    }
    Ok(removed)
}
