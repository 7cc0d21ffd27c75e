// clustervault/src/restore/wal.rs
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Ownership;
use crate::errors::{AppError, Result};

pub const CONTROL_FILE: &str = "global/pg_control";
/// pg_control is always written padded to this size.
pub const PG_CONTROL_FILE_SIZE: u64 = 8192;

/// The manual step left to the operator once the files are in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalResetNotice {
    pub control_file: PathBuf,
    pub command: String,
    pub run_as: Ownership,
}

impl WalResetNotice {
    pub fn instructions(&self) -> String {
        format!(
            "Run as uid {} once the server is stopped: {}",
            self.run_as.uid, self.command
        )
    }
}

/// Confirms the restored tree carries a plausible control file and hands
/// back the reset command. Nothing is executed.
pub fn check_wal_reset(data_dir: &Path, owner: Ownership) -> Result<WalResetNotice> {
    info!("🔄 Checking WAL state...");
    let control_file = data_dir.join(CONTROL_FILE);

    let metadata = fs::symlink_metadata(&control_file).map_err(|e| {
        AppError::InvalidDataDirectory(format!(
            "{} is missing ({})",
            control_file.display(),
            e
        ))
    })?;
    if !metadata.is_file() {
        return Err(AppError::InvalidDataDirectory(format!(
            "{} is not a regular file",
            control_file.display()
        )));
    }
    if metadata.len() != PG_CONTROL_FILE_SIZE {
        return Err(AppError::InvalidDataDirectory(format!(
            "{} has {} bytes, expected {}",
            control_file.display(),
            metadata.len(),
            PG_CONTROL_FILE_SIZE
        )));
    }

    let command = format!("pg_resetwal -f {}", data_dir.display());
    warn!("⚠️ WAL reset is not performed automatically");
    info!("✓ Control file found at {}", control_file.display());

    Ok(WalResetNotice {
        control_file,
        command,
        run_as: owner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_with_control(size: usize) -> anyhow::Result<tempfile::TempDir> {
        let dir = tempfile::tempdir()?;
        fs::create_dir(dir.path().join("global"))?;
        fs::write(dir.path().join(CONTROL_FILE), vec![0u8; size])?;
        Ok(dir)
    }

    #[test]
    fn test_valid_control_file_yields_command() -> anyhow::Result<()> {
        let dir = data_with_control(8192)?;
        let notice = check_wal_reset(dir.path(), Ownership::default())?;
        assert_eq!(notice.command, format!("pg_resetwal -f {}", dir.path().display()));
        assert_eq!(notice.control_file, dir.path().join("global/pg_control"));
        assert!(notice.instructions().contains("uid 999"));
        Ok(())
    }

    #[test]
    fn test_missing_control_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(matches!(
            check_wal_reset(dir.path(), Ownership::default()),
            Err(AppError::InvalidDataDirectory(_))
        ));
        Ok(())
    }

    #[test]
    fn test_truncated_control_file() -> anyhow::Result<()> {
        let dir = data_with_control(100)?;
        let err = check_wal_reset(dir.path(), Ownership::default()).unwrap_err();
        assert!(err.to_string().contains("expected 8192"));
        Ok(())
    }

    #[test]
    fn test_directory_in_place_of_control_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join(CONTROL_FILE))?;
        assert!(matches!(
            check_wal_reset(dir.path(), Ownership::default()),
            Err(AppError::InvalidDataDirectory(_))
        ));
        Ok(())
    }
}
