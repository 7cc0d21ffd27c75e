// clustervault/src/restore/report.rs
use std::path::Path;
use tracing::info;

use crate::utils::format_bytes;
use crate::utils::tree::{measure_lossy, TreeStats};

/// Logs what ended up in the data directory. Never fails.
pub fn report_restore(data_dir: &Path) -> TreeStats {
    let stats = measure_lossy(data_dir);
    info!("📊 Restore summary:");
    info!("  Location: {}", data_dir.display());
    info!("  Total size: {}", format_bytes(stats.total_bytes));
    info!("  Files: {}", stats.files);
    info!("  Directories: {}", stats.directories);
    stats
}
