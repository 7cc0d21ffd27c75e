// clustervault/src/backup/verification.rs
use std::fs;
use tracing::{info, warn};

use super::basebackup::BackupArchive;
use crate::config::ArchiveFormat;
use crate::errors::{AppError, Result};
use crate::utils::{format_bytes, tree};

pub const MANIFEST_FILE: &str = "backup_manifest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub total_bytes: u64,
    pub members: Vec<String>,
    pub has_manifest: bool,
}

/// Archive members pg_basebackup writes in tar mode.
pub fn expected_members(compression: u32) -> [&'static str; 2] {
    if compression > 0 {
        ["base.tar.gz", "pg_wal.tar.gz"]
    } else {
        ["base.tar", "pg_wal.tar"]
    }
}

/// Confirms the archive is complete and reports its size.
///
/// Tar archives must contain both expected members, each non-empty. Plain
/// archives are only checked for existence.
pub fn verify_backup(archive: &BackupArchive) -> Result<VerificationReport> {
    info!("🔍 Verifying backup {}...", archive.path.display());

    let metadata = fs::metadata(&archive.path).map_err(|e| {
        AppError::Verification(format!(
            "backup directory not found: {} ({})",
            archive.path.display(),
            e
        ))
    })?;
    if !metadata.is_dir() {
        return Err(AppError::Verification(format!(
            "backup path is not a directory: {}",
            archive.path.display()
        )));
    }

    let mut members = Vec::new();
    if archive.format == ArchiveFormat::Tar {
        for member in expected_members(archive.compression) {
            let member_path = archive.path.join(member);
            let member_meta = fs::metadata(&member_path).map_err(|_| {
                AppError::Verification(format!("expected file not found: {}", member))
            })?;
            if !member_meta.is_file() || member_meta.len() == 0 {
                return Err(AppError::Verification(format!(
                    "archive member is empty or not a regular file: {}",
                    member
                )));
            }
            members.push(member.to_string());
        }
    }

    let has_manifest = archive.path.join(MANIFEST_FILE).is_file();
    if !has_manifest {
        warn!("⚠️ No {} in {}", MANIFEST_FILE, archive.path.display());
    }

    let stats = tree::measure(&archive.path).map_err(|e| {
        AppError::io(
            format!("Failed to calculate backup size for {}", archive.path.display()),
            e,
        )
    })?;

    info!("✓ Backup verified, size: {}", format_bytes(stats.total_bytes));
    Ok(VerificationReport {
        total_bytes: stats.total_bytes,
        members,
        has_manifest,
    })
}
