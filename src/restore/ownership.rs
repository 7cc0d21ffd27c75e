// clustervault/src/restore/ownership.rs
use std::io;
use std::os::unix::fs::{chown, lchown};
use std::path::Path;
use tracing::info;
use walkdir::WalkDir;

use crate::config::Ownership;
use crate::errors::{AppError, Result};

fn permission_error(path: &Path, source: io::Error) -> AppError {
    AppError::Permission {
        path: path.to_path_buf(),
        source,
    }
}

/// Hands every entry under `data_dir` (itself included) to `owner`. Symlinks
/// inside the tree are re-owned in place and never followed; a symlinked
/// `data_dir` re-owns the directory it points to. Returns the number of
/// entries changed.
pub fn remap_ownership(data_dir: &Path, owner: Ownership) -> Result<u64> {
    info!("🔐 Setting ownership to {}:{}...", owner.uid, owner.gid);

    let mut changed = 0;
    for entry in WalkDir::new(data_dir).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(data_dir).to_path_buf();
            permission_error(&path, io::Error::from(e))
        })?;
        let path = entry.path();
        let result = if entry.file_type().is_symlink() {
            lchown(path, Some(owner.uid), Some(owner.gid))
        } else {
            chown(path, Some(owner.uid), Some(owner.gid))
        };
        result.map_err(|e| permission_error(path, e))?;
        changed += 1;
    }

    info!("✓ Ownership set on {} entries", changed);
    Ok(changed)
}
