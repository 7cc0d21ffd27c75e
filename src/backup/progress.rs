// clustervault/src/backup/progress.rs
use regex::Regex;
use std::sync::LazyLock;

use crate::utils::format_bytes;

static PROGRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)/(\d+)\s+kB\s+\((\d+)%\)").expect("progress pattern is valid")
});

/// One parsed `current/total kB (percent%)` status line from pg_basebackup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    pub current_kb: u64,
    pub total_kb: u64,
    pub percent: u32,
}

impl ProgressSample {
    pub fn parse(line: &str) -> Option<Self> {
        let caps = PROGRESS_PATTERN.captures(line)?;
        Some(ProgressSample {
            current_kb: caps[1].parse().ok()?,
            total_kb: caps[2].parse().ok()?,
            percent: caps[3].parse().ok()?,
        })
    }

    pub fn render(&self) -> String {
        format!(
            "Progress: {}% ({} / {})",
            self.percent,
            format_bytes(self.current_kb.saturating_mul(1024)),
            format_bytes(self.total_kb.saturating_mul(1024))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_line() {
        let sample = ProgressSample::parse("  24576/131072 kB (18%), 0/1 tablespace").unwrap();
        assert_eq!(
            sample,
            ProgressSample {
                current_kb: 24576,
                total_kb: 131072,
                percent: 18
            }
        );
        assert_eq!(sample.render(), "Progress: 18% (24.0 MiB / 128.0 MiB)");
    }

    #[test]
    fn test_non_progress_lines_ignored() {
        assert_eq!(ProgressSample::parse("pg_basebackup: checkpoint completed"), None);
        assert_eq!(ProgressSample::parse("pg_basebackup: write-ahead log start point: 0/2000028"), None);
        assert_eq!(ProgressSample::parse("12/34 MB (50%)"), None);
    }
}
