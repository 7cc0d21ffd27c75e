pub(crate) mod data_dir; // Clearing the target directory and scrubbing recovery markers
pub(crate) mod extract; // Tar streaming and plain-copy restore
pub(crate) mod ownership;
pub(crate) mod pipeline; // Ordered restore stages
pub(crate) mod preconditions;
pub(crate) mod report;
pub(crate) mod wal;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::config::{AppConfig, OperationConfig};
use crate::errors::AppError;
use pipeline::{RestoreOutcome, RestoreSession, StdinConfirmation};
use preconditions::Identity;

/// Public entry point for the restore process.
pub async fn run_restore_flow(app_config: &AppConfig) -> Result<RestoreOutcome> {
    let restore_config = match &app_config.operation {
        Some(OperationConfig::Restore(cfg)) => cfg.clone(),
        _ => anyhow::bail!("Restore operation selected but no restore configuration found."),
    };

    info!("🚀 PostgreSQL cluster restore");
    info!("Backup: {}", restore_config.backup_path.display());
    info!("Target: {}", restore_config.data_dir.display());

    let identity = Identity::current().context("Failed to determine process identity")?;
    let session = RestoreSession::new(restore_config, identity);
    let result = tokio::task::spawn_blocking(move || session.run(&StdinConfirmation))
        .await
        .context("Restore task panicked")?;

    if let Err(e) = &result {
        if let AppError::StageFailed { stage, .. } = e {
            error!("❌ Restore stopped at stage '{}': {}", stage, e.root());
        }
    }
    result.context("Restore failed")
}
