pub(crate) mod basebackup; // Timestamped archive creation through pg_basebackup
pub(crate) mod precheck; // Connectivity, REPLICATION privilege and size estimate
pub(crate) mod progress;
pub(crate) mod runner; // Process boundary around the external backup utility
pub(crate) mod verification;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{info, warn};

use crate::config::{AppConfig, BackupConfig};
use crate::utils::format_bytes;
use basebackup::BackupArchive;
use runner::{ProcessRunner, SystemProcessRunner};
use verification::VerificationReport;

#[derive(Debug, Clone)]
pub struct BackupSummary {
    pub archive: BackupArchive,
    pub estimated_size: Option<u64>,
    /// `None` for dry runs.
    pub verification: Option<VerificationReport>,
}

/// Public entry point for the backup process.
pub async fn run_backup_flow(app_config: &AppConfig) -> Result<BackupSummary> {
    let backup_config = match &app_config.operation {
        Some(crate::config::OperationConfig::Backup(cfg)) => cfg,
        _ => anyhow::bail!("Backup operation selected but no backup configuration found."),
    };

    info!("🚀 PostgreSQL cluster backup (pg_basebackup)");
    info!("Target: {}", backup_config.connection.display_url());

    precheck::check_connection(&backup_config.connection)
        .await
        .context("Connection test failed")?;

    let estimated_size = match precheck::estimate_cluster_size(&backup_config.connection).await {
        Ok(size) => {
            info!("📊 Estimated database size: {}", format_bytes(size));
            Some(size)
        }
        Err(e) => {
            warn!("⚠️ Could not estimate database size: {}", e);
            None
        }
    };

    let runner = SystemProcessRunner::locate(backup_config.basebackup_bin.clone())?;
    info!("Found pg_basebackup executable at: {}", runner.program().display());

    let mut summary = perform_backup(backup_config, &runner).await?;
    summary.estimated_size = estimated_size;
    Ok(summary)
}

/// Streams the backup and verifies it. Connection prechecks are the caller's job.
pub async fn perform_backup<R: ProcessRunner>(
    backup_config: &BackupConfig,
    runner: &R,
) -> Result<BackupSummary> {
    let archive = basebackup::create_backup(backup_config, runner, Local::now())
        .await
        .context("Backup failed")?;

    let verification = if backup_config.dry_run {
        info!("DRY RUN: Would verify backup");
        None
    } else {
        Some(verification::verify_backup(&archive).context("Backup verification failed")?)
    };

    Ok(BackupSummary {
        archive,
        estimated_size: None,
        verification,
    })
}
