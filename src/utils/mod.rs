pub mod logger;
pub mod tree;

use anyhow::{Context, Result};
use std::path::PathBuf;
use which::which;

/// Finds the pg_basebackup executable in the system PATH.
pub fn find_pg_basebackup_executable() -> Result<PathBuf> {
    which("pg_basebackup").context("pg_basebackup executable not found in PATH. Please ensure PostgreSQL client tools are installed and in your PATH.")
}

/// Renders a byte count with binary units, e.g. `1.5 MiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let prefix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}iB", bytes as f64 / div as f64, prefix)
}
