// clustervault/src/utils/tree.rs
use std::io;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Size and entry counts of a directory tree. The root itself counts as a directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub total_bytes: u64,
    pub files: u64,
    pub directories: u64,
}

impl TreeStats {
    fn record(&mut self, entry: &walkdir::DirEntry) -> Result<(), walkdir::Error> {
        if entry.file_type().is_dir() {
            self.directories += 1;
        } else {
            self.files += 1;
            self.total_bytes += entry.metadata()?.len();
        }
        Ok(())
    }
}

/// Walks `root` without following symlinks; the first error aborts the walk.
pub fn measure(root: &Path) -> io::Result<TreeStats> {
    let mut stats = TreeStats::default();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        stats.record(&entry).map_err(io::Error::from)?;
    }
    Ok(stats)
}

/// Like [`measure`], but unreadable entries are logged and skipped.
pub fn measure_lossy(root: &Path) -> TreeStats {
    let mut stats = TreeStats::default();
    for entry in WalkDir::new(root).follow_links(false) {
        let result = entry.and_then(|entry| stats.record(&entry));
        if let Err(e) = result {
            warn!("⚠️ Skipping unreadable entry while measuring {}: {}", root.display(), e);
        }
    }
    stats
}
