// clustervault/src/restore/data_dir.rs
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{info, warn};

use crate::errors::{AppError, Result};

/// Files pg_basebackup leaves for end-of-backup recovery bookkeeping.
pub const RECOVERY_ARTIFACTS: [&str; 2] = ["backup_label", "tablespace_map"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Missing,
    AlreadyEmpty,
    Cleared { removed: usize },
    WouldClear { entries: usize },
}

/// Empties `data_dir` without removing the directory itself, which may be a mount point.
/// `data_dir` may be a symlink to the real directory; links inside it are never followed.
pub fn reset_data_directory(data_dir: &Path, dry_run: bool) -> Result<ResetOutcome> {
    let metadata = match fs::metadata(data_dir) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Data directory {} does not exist yet", data_dir.display());
            return Ok(ResetOutcome::Missing);
        }
        Err(e) => {
            return Err(AppError::io(
                format!("Failed to check data directory {}", data_dir.display()),
                e,
            ));
        }
    };
    if !metadata.is_dir() {
        return Err(AppError::InvalidDataDirectory(format!(
            "{} exists but is not a directory",
            data_dir.display()
        )));
    }

    let entries = fs::read_dir(data_dir)
        .and_then(|entries| entries.collect::<io::Result<Vec<_>>>())
        .map_err(|e| {
            AppError::io(format!("Failed to read data directory {}", data_dir.display()), e)
        })?;

    if entries.is_empty() {
        info!("Data directory is empty");
        return Ok(ResetOutcome::AlreadyEmpty);
    }

    warn!("⚠️ Data directory contains {} entries: {}", entries.len(), data_dir.display());
    if dry_run {
        info!("DRY RUN: Would clear data directory {}", data_dir.display());
        return Ok(ResetOutcome::WouldClear { entries: entries.len() });
    }

    info!("🧹 Clearing data directory: {}", data_dir.display());
    for entry in &entries {
        let path = entry.path();
        let is_dir = entry
            .file_type()
            .map(|t| t.is_dir())
            .map_err(|e| AppError::io(format!("Failed to inspect {}", path.display()), e))?;
        let removed = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| AppError::io(format!("Failed to remove {}", path.display()), e))?;
    }

    fs::set_permissions(data_dir, fs::Permissions::from_mode(0o700)).map_err(|e| {
        AppError::io(
            format!("Failed to set permissions on {}", data_dir.display()),
            e,
        )
    })?;

    info!("✓ Data directory cleared");
    Ok(ResetOutcome::Cleared { removed: entries.len() })
}

/// Deletes stale recovery markers at the data directory root. Returns what was removed.
pub fn scrub_recovery_artifacts(data_dir: &Path, dry_run: bool) -> Result<Vec<&'static str>> {
    let mut removed = Vec::new();
    for name in RECOVERY_ARTIFACTS {
        let path = data_dir.join(name);
        if fs::symlink_metadata(&path).is_err() {
            continue;
        }
        if dry_run {
            info!("DRY RUN: Would remove {}", path.display());
            continue;
        }
        fs::remove_file(&path)
            .map_err(|e| AppError::io(format!("Failed to remove {}", path.display()), e))?;
        info!("✓ {} removed", name);
        removed.push(name);
    }
    Ok(removed)
}
