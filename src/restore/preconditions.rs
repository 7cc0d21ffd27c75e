// clustervault/src/restore/preconditions.rs
use nix::unistd::{getegid, geteuid, getgroups};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{ArchiveFormat, Ownership, RestoreConfig};
use crate::errors::{AppError, Result};

/// Present at the root of every data directory and of plain-format backups.
pub const VERSION_MARKER: &str = "PG_VERSION";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectedFormat {
    /// Archive members in extraction order.
    Tar { members: Vec<PathBuf> },
    Plain,
}

impl DetectedFormat {
    pub fn format(&self) -> ArchiveFormat {
        match self {
            DetectedFormat::Tar { .. } => ArchiveFormat::Tar,
            DetectedFormat::Plain => ArchiveFormat::Plain,
        }
    }
}

/// Effective identity of the restoring process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub euid: u32,
    pub egid: u32,
    /// Supplementary group ids.
    pub groups: Vec<u32>,
}

impl Identity {
    pub fn current() -> Result<Self> {
        let groups = getgroups().map_err(|errno| {
            AppError::io("Failed to read supplementary groups", std::io::Error::from(errno))
        })?;
        Ok(Identity {
            euid: geteuid().as_raw(),
            egid: getegid().as_raw(),
            groups: groups.into_iter().map(|g| g.as_raw()).collect(),
        })
    }

    pub fn is_root(&self) -> bool {
        self.euid == 0
    }

    fn in_group(&self, gid: u32) -> bool {
        self.egid == gid || self.groups.contains(&gid)
    }
}

/// Root can chown anything. Anyone else passes only when every chown the
/// restore performs is one the kernel allows without privilege: the tree
/// ends up owned by themselves, in a group they belong to.
pub fn ensure_privileged(identity: &Identity, owner: &Ownership) -> Result<()> {
    if identity.is_root() {
        return Ok(());
    }
    if identity.euid != owner.uid {
        return Err(AppError::Precondition(format!(
            "restore must run as root to hand the data directory to uid {} (running as uid {})",
            owner.uid, identity.euid
        )));
    }
    if !identity.in_group(owner.gid) {
        return Err(AppError::Precondition(format!(
            "restore must run as root to hand the data directory to gid {} (uid {} is not a member)",
            owner.gid, identity.euid
        )));
    }
    Ok(())
}

pub fn is_tar_member(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.ends_with(".tar") || name.ends_with(".tar.gz"))
}

/// base first, tablespaces next, pg_wal last.
fn member_rank(path: &Path) -> u8 {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if name.starts_with("base.tar") {
        0
    } else if name.starts_with("pg_wal.tar") {
        2
    } else {
        1
    }
}

/// Classifies an archive directory purely from its contents.
pub fn classify_archive(archive_dir: &Path) -> Result<DetectedFormat> {
    let entries = fs::read_dir(archive_dir).map_err(|e| {
        AppError::io(format!("Failed to read backup directory {}", archive_dir.display()), e)
    })?;

    let mut members = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            AppError::io(format!("Failed to read backup directory {}", archive_dir.display()), e)
        })?;
        let path = entry.path();
        if path.is_file() && is_tar_member(&path) {
            members.push(path);
        }
    }

    if !members.is_empty() {
        members.sort_by(|a, b| member_rank(a).cmp(&member_rank(b)).then_with(|| a.cmp(b)));
        return Ok(DetectedFormat::Tar { members });
    }
    if archive_dir.join(VERSION_MARKER).is_file() {
        return Ok(DetectedFormat::Plain);
    }
    Err(AppError::UnknownFormat(archive_dir.to_path_buf()))
}

/// Privilege, archive existence and format detection. Touches nothing on disk.
pub fn check_prerequisites(config: &RestoreConfig, identity: &Identity) -> Result<DetectedFormat> {
    ensure_privileged(identity, &config.owner)?;

    let metadata = fs::metadata(&config.backup_path).map_err(|e| {
        AppError::Precondition(format!(
            "backup path not found: {} ({})",
            config.backup_path.display(),
            e
        ))
    })?;
    if !metadata.is_dir() {
        return Err(AppError::Precondition(format!(
            "backup path is not a directory: {}",
            config.backup_path.display()
        )));
    }

    let detected = classify_archive(&config.backup_path)?;
    match &detected {
        DetectedFormat::Tar { members } => {
            info!("✓ Found tar format backup ({} archive files)", members.len())
        }
        DetectedFormat::Plain => info!("✓ Found plain format backup"),
    }
    Ok(detected)
}
