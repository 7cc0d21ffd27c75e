// clustervault/src/backup/basebackup.rs
use chrono::{DateTime, Local};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};

use super::progress::ProgressSample;
use super::runner::{CommandSpec, ProcessExit, ProcessRunner, RunningProcess};
use crate::config::{ArchiveFormat, BackupConfig};
use crate::errors::{AppError, Result};

pub const ARCHIVE_PREFIX: &str = "cluster_backup_";
pub const MAX_COMPRESSION: u32 = 9;

/// One timestamp-named archive directory under the backup root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArchive {
    pub name: String,
    pub path: PathBuf,
    pub format: ArchiveFormat,
    pub compression: u32,
}

pub fn archive_name(now: DateTime<Local>) -> String {
    format!("{}{}", ARCHIVE_PREFIX, now.format("%Y%m%d_%H%M%S"))
}

pub fn plan_archive(config: &BackupConfig, now: DateTime<Local>) -> BackupArchive {
    let name = archive_name(now);
    BackupArchive {
        path: config.backup_dir.join(&name),
        name,
        format: config.format,
        compression: config.compression,
    }
}

/// Builds the pg_basebackup invocation for `archive`.
pub fn build_basebackup_command(config: &BackupConfig, archive: &BackupArchive) -> CommandSpec {
    let conn = &config.connection;
    let mut spec = CommandSpec::default();
    spec.arg("-h")
        .arg(conn.host.clone())
        .arg("-p")
        .arg(conn.port.to_string())
        .arg("-U")
        .arg(conn.user.clone())
        .arg("-D")
        .arg(archive.path.to_string_lossy())
        .arg("-c")
        .arg(config.checkpoint.as_str());

    match archive.format {
        ArchiveFormat::Tar => {
            spec.arg("-Ft");
            if archive.compression > 0 {
                spec.arg("-z").arg("-Z").arg(archive.compression.to_string());
            }
        }
        ArchiveFormat::Plain => {
            spec.arg("-Fp");
        }
    }

    if config.progress {
        spec.arg("-P");
    }

    // Stream WAL alongside the data so the archive is self-contained
    spec.arg("-X").arg("stream").arg("-v");

    if let Some(password) = &conn.password {
        spec.envs.push(("PGPASSWORD".to_string(), password.clone()));
    }
    spec
}

/// Creates the archive directory and streams a base backup into it.
pub async fn create_backup<R: ProcessRunner>(
    config: &BackupConfig,
    runner: &R,
    now: DateTime<Local>,
) -> Result<BackupArchive> {
    if config.compression > MAX_COMPRESSION {
        return Err(AppError::Config(format!(
            "compression level must be between 0 and {}, got {}",
            MAX_COMPRESSION, config.compression
        )));
    }
    let archive = plan_archive(config, now);

    if config.dry_run {
        info!("DRY RUN: Would create backup in {}", archive.path.display());
        return Ok(archive);
    }

    fs::create_dir_all(&config.backup_dir).map_err(|e| {
        AppError::io(
            format!("Failed to create backup root {}", config.backup_dir.display()),
            e,
        )
    })?;
    // Non-recursive so a second backup in the same second fails instead of sharing the directory
    fs::create_dir(&archive.path).map_err(|e| {
        AppError::io(
            format!("Failed to create backup directory {}", archive.path.display()),
            e,
        )
    })?;

    info!("📂 Starting backup to: {}", archive.path.display());
    let spec = build_basebackup_command(config, &archive);
    let process = runner
        .start(&spec)
        .map_err(|e| AppError::io("Failed to start pg_basebackup", e))?;

    let exit = if config.progress {
        follow_progress(process).await?
    } else {
        process
            .wait()
            .await
            .map_err(|e| AppError::io("Failed waiting for pg_basebackup", e))?
    };

    if !exit.status.success() {
        return Err(AppError::BackupExecution {
            status: exit.status.to_string(),
            output: exit.output.trim().to_string(),
        });
    }

    info!("✓ pg_basebackup finished for {}", archive.name);
    Ok(archive)
}

/// Renders progress samples on one overwritten line and keeps every other line as output.
async fn follow_progress<P: RunningProcess>(mut process: P) -> Result<ProcessExit> {
    let mut captured = String::new();
    if let Some(mut stream) = process.take_progress() {
        let mut rendered = false;
        let mut stdout = std::io::stdout();
        while let Some(line) = stream
            .next_line()
            .await
            .map_err(|e| AppError::io("Failed reading pg_basebackup status", e))?
        {
            match ProgressSample::parse(&line) {
                Some(sample) => {
                    print!("\r{}", sample.render());
                    let _ = stdout.flush();
                    rendered = true;
                }
                None => {
                    debug!("pg_basebackup: {}", line);
                    captured.push_str(&line);
                    captured.push('\n');
                }
            }
        }
        if rendered {
            println!();
        }
    }

    let mut exit = process
        .wait()
        .await
        .map_err(|e| AppError::io("Failed waiting for pg_basebackup", e))?;
    captured.push_str(&exit.output);
    exit.output = captured;
    Ok(exit)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backup::runner::ProgressStream;
    use crate::config::{CheckpointMode, ConnectionConfig};
    use chrono::TimeZone;
    use std::future::Future;
    use std::io;
    use std::os::unix::process::ExitStatusExt;
    use std::path::Path;
    use std::process::ExitStatus;

    /// Stands in for pg_basebackup: writes the given members into the `-D`
    /// directory, replays canned status output and exits with `exit_code`.
    pub(crate) struct FakeRunner {
        pub members: Vec<(&'static str, Vec<u8>)>,
        pub status_output: &'static str,
        pub exit_code: i32,
    }

    pub(crate) struct FakeProcess {
        stream: Option<ProgressStream>,
        exit_code: i32,
    }

    impl ProcessRunner for FakeRunner {
        type Process = FakeProcess;

        fn start(&self, spec: &CommandSpec) -> io::Result<FakeProcess> {
            let target = spec.value_of("-D").expect("-D is always passed");
            for (name, content) in &self.members {
                fs::write(Path::new(target).join(name), content)?;
            }
            Ok(FakeProcess {
                stream: Some(ProgressStream::new(self.status_output.as_bytes())),
                exit_code: self.exit_code,
            })
        }
    }

    impl RunningProcess for FakeProcess {
        fn take_progress(&mut self) -> Option<ProgressStream> {
            self.stream.take()
        }

        fn wait(mut self) -> impl Future<Output = io::Result<ProcessExit>> + Send {
            async move {
                let mut output = String::new();
                if let Some(mut stream) = self.stream.take() {
                    while let Some(line) = stream.next_line().await? {
                        output.push_str(&line);
                        output.push('\n');
                    }
                }
                Ok(ProcessExit {
                    status: ExitStatus::from_raw(self.exit_code << 8),
                    output,
                })
            }
        }
    }

    pub(crate) fn test_config(backup_dir: &Path) -> BackupConfig {
        BackupConfig {
            connection: ConnectionConfig {
                host: "db.internal".to_string(),
                port: 5433,
                user: "replicator".to_string(),
                password: Some("s3cret".to_string()),
                database: "postgres".to_string(),
            },
            backup_dir: backup_dir.to_path_buf(),
            format: ArchiveFormat::Tar,
            compression: 6,
            checkpoint: CheckpointMode::Fast,
            progress: true,
            dry_run: false,
            basebackup_bin: None,
        }
    }

    pub(crate) fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_archive_name_uses_second_resolution_timestamp() {
        assert_eq!(archive_name(fixed_time()), "cluster_backup_20250314_092653");
    }

    #[test]
    fn test_command_for_compressed_tar() {
        let config = test_config(Path::new("/backups"));
        let archive = plan_archive(&config, fixed_time());
        let spec = build_basebackup_command(&config, &archive);

        assert_eq!(
            spec.args,
            vec![
                "-h",
                "db.internal",
                "-p",
                "5433",
                "-U",
                "replicator",
                "-D",
                "/backups/cluster_backup_20250314_092653",
                "-c",
                "fast",
                "-Ft",
                "-z",
                "-Z",
                "6",
                "-P",
                "-X",
                "stream",
                "-v",
            ]
        );
        assert_eq!(spec.envs, vec![("PGPASSWORD".to_string(), "s3cret".to_string())]);
    }

    #[test]
    fn test_command_for_plain_without_progress() {
        let mut config = test_config(Path::new("/backups"));
        config.format = ArchiveFormat::Plain;
        config.progress = false;
        config.checkpoint = CheckpointMode::Spread;
        config.connection.password = None;
        let archive = plan_archive(&config, fixed_time());
        let spec = build_basebackup_command(&config, &archive);

        assert!(spec.has_flag("-Fp"));
        assert!(!spec.has_flag("-Ft"));
        assert!(!spec.has_flag("-z"));
        assert!(!spec.has_flag("-P"));
        assert_eq!(spec.value_of("-c"), Some("spread"));
        assert!(spec.envs.is_empty());
    }

    #[test]
    fn test_uncompressed_tar_has_no_compression_flags() {
        let mut config = test_config(Path::new("/backups"));
        config.compression = 0;
        let archive = plan_archive(&config, fixed_time());
        let spec = build_basebackup_command(&config, &archive);
        assert!(spec.has_flag("-Ft"));
        assert!(!spec.has_flag("-z"));
        assert!(!spec.has_flag("-Z"));
    }

    #[tokio::test]
    async fn test_create_backup_success() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let config = test_config(root.path());
        let runner = FakeRunner {
            members: vec![("base.tar.gz", vec![1; 64]), ("pg_wal.tar.gz", vec![2; 32])],
            status_output: "pg_basebackup: initiating base backup\n512/1024 kB (50%)\r1024/1024 kB (100%)\n",
            exit_code: 0,
        };

        let archive = create_backup(&config, &runner, fixed_time()).await?;
        assert_eq!(archive.name, "cluster_backup_20250314_092653");
        assert!(archive.path.join("base.tar.gz").is_file());
        assert!(archive.path.join("pg_wal.tar.gz").is_file());
        Ok(())
    }

    #[tokio::test]
    async fn test_create_backup_failure_surfaces_output() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let mut config = test_config(root.path());
        config.progress = false;
        let runner = FakeRunner {
            members: vec![],
            status_output: "pg_basebackup: error: FATAL:  no pg_hba.conf entry for replication connection\n",
            exit_code: 1,
        };

        let err = create_backup(&config, &runner, fixed_time()).await.unwrap_err();
        match err {
            AppError::BackupExecution { output, .. } => {
                assert!(output.contains("no pg_hba.conf entry"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_create_backup_refuses_existing_archive_directory() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let config = test_config(root.path());
        fs::create_dir(root.path().join("cluster_backup_20250314_092653"))?;
        let runner = FakeRunner {
            members: vec![],
            status_output: "",
            exit_code: 0,
        };

        let err = create_backup(&config, &runner, fixed_time()).await.unwrap_err();
        assert!(matches!(err, AppError::Io { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_dry_run_creates_nothing() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let mut config = test_config(&root.path().join("nested"));
        config.dry_run = true;
        let runner = FakeRunner {
            members: vec![],
            status_output: "",
            exit_code: 1,
        };

        let archive = create_backup(&config, &runner, fixed_time()).await?;
        assert!(!archive.path.exists());
        assert!(!root.path().join("nested").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_out_of_range_compression_rejected() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let mut config = test_config(root.path());
        config.compression = 10;
        let runner = FakeRunner {
            members: vec![],
            status_output: "",
            exit_code: 0,
        };

        let err = create_backup(&config, &runner, fixed_time()).await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert_eq!(fs::read_dir(root.path())?.count(), 0);
        Ok(())
    }
}
