// clustervault/src/restore/pipeline.rs
use std::io::{self, BufRead, Write};
use tracing::{info, warn};

use super::data_dir::{self, ResetOutcome};
use super::extract::{self, ExtractionSummary};
use super::ownership;
use super::preconditions::{self, DetectedFormat, Identity};
use super::report;
use super::wal::{self, WalResetNotice};
use crate::config::{ArchiveFormat, RestoreConfig};
use crate::errors::{AppError, Result};
use crate::utils::tree::TreeStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preconditions,
    Confirm,
    ResetDataDir,
    Extract,
    Ownership,
    ScrubRecovery,
    WalReset,
    Report,
}

impl Stage {
    pub const ORDER: [Stage; 8] = [
        Stage::Preconditions,
        Stage::Confirm,
        Stage::ResetDataDir,
        Stage::Extract,
        Stage::Ownership,
        Stage::ScrubRecovery,
        Stage::WalReset,
        Stage::Report,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Preconditions => "preconditions",
            Stage::Confirm => "confirm",
            Stage::ResetDataDir => "reset-data-dir",
            Stage::Extract => "extract",
            Stage::Ownership => "ownership",
            Stage::ScrubRecovery => "scrub-recovery",
            Stage::WalReset => "wal-reset",
            Stage::Report => "report",
        }
    }
}

/// Asks the operator before anything destructive happens.
pub trait Confirmation {
    fn confirm(&self, prompt: &str) -> io::Result<bool>;
}

pub struct StdinConfirmation;

impl Confirmation for StdinConfirmation {
    fn confirm(&self, prompt: &str) -> io::Result<bool> {
        print!("\n{} [y/N] ", prompt);
        io::stdout().flush()?;
        let mut response = String::new();
        io::stdin().lock().read_line(&mut response)?;
        let response = response.trim().to_lowercase();
        Ok(response == "y" || response == "yes")
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestoreOutcome {
    /// Stages that finished, in execution order.
    pub completed: Vec<Stage>,
    pub format: Option<ArchiveFormat>,
    pub reset: Option<ResetOutcome>,
    pub extraction: Option<ExtractionSummary>,
    pub ownership_changes: Option<u64>,
    pub scrubbed: Vec<&'static str>,
    pub wal_reset: Option<WalResetNotice>,
    pub report: Option<TreeStats>,
    pub dry_run: bool,
}

/// One restore attempt. Consumed by [`RestoreSession::run`].
pub struct RestoreSession {
    config: RestoreConfig,
    identity: Identity,
    detected: Option<DetectedFormat>,
}

impl RestoreSession {
    pub fn new(config: RestoreConfig, identity: Identity) -> Self {
        RestoreSession {
            config,
            identity,
            detected: None,
        }
    }

    /// Runs every stage in order. The first failure stops the run and is
    /// returned as [`AppError::StageFailed`] naming the stage.
    pub fn run(mut self, confirmation: &dyn Confirmation) -> Result<RestoreOutcome> {
        let mut outcome = RestoreOutcome {
            dry_run: self.config.dry_run,
            ..Default::default()
        };
        if self.config.dry_run {
            warn!("⚠️ DRY RUN MODE - No changes will be made");
        }

        for stage in Stage::ORDER {
            self.run_stage(stage, confirmation, &mut outcome)
                .map_err(|e| AppError::StageFailed {
                    stage: stage.name(),
                    source: Box::new(e),
                })?;
            outcome.completed.push(stage);
        }
        Ok(outcome)
    }

    fn run_stage(
        &mut self,
        stage: Stage,
        confirmation: &dyn Confirmation,
        outcome: &mut RestoreOutcome,
    ) -> Result<()> {
        let dry_run = self.config.dry_run;
        let data_dir = self.config.data_dir.as_path();

        match stage {
            Stage::Preconditions => {
                let detected = preconditions::check_prerequisites(&self.config, &self.identity)?;
                outcome.format = Some(detected.format());
                self.detected = Some(detected);
            }
            Stage::Confirm => {
                if self.config.force || dry_run {
                    return Ok(());
                }
                let accepted = confirmation
                    .confirm("This will DESTROY all current data. Continue?")
                    .map_err(|e| AppError::io("Failed to read confirmation", e))?;
                if !accepted {
                    return Err(AppError::Cancelled("restore cancelled by user".to_string()));
                }
            }
            Stage::ResetDataDir => {
                outcome.reset = Some(data_dir::reset_data_directory(data_dir, dry_run)?);
            }
            Stage::Extract => {
                let detected = self.detected.as_ref().ok_or_else(|| {
                    AppError::Precondition("backup format was not detected".to_string())
                })?;
                if dry_run {
                    info!(
                        "DRY RUN: Would restore {} backup from {}",
                        detected.format(),
                        self.config.backup_path.display()
                    );
                    return Ok(());
                }
                info!("📥 Restoring from backup...");
                let summary = match detected {
                    DetectedFormat::Tar { members } => {
                        extract::extract_tar_members(members, data_dir)?
                    }
                    DetectedFormat::Plain => {
                        extract::copy_plain_backup(&self.config.backup_path, data_dir)?
                    }
                };
                outcome.extraction = Some(summary);
            }
            Stage::Ownership => {
                if dry_run {
                    info!(
                        "DRY RUN: Would set ownership to {}:{}",
                        self.config.owner.uid, self.config.owner.gid
                    );
                    return Ok(());
                }
                outcome.ownership_changes =
                    Some(ownership::remap_ownership(data_dir, self.config.owner)?);
            }
            Stage::ScrubRecovery => {
                outcome.scrubbed = data_dir::scrub_recovery_artifacts(data_dir, dry_run)?;
            }
            Stage::WalReset => {
                if dry_run {
                    info!("DRY RUN: Would check WAL state");
                    return Ok(());
                }
                outcome.wal_reset = Some(wal::check_wal_reset(data_dir, self.config.owner)?);
            }
            Stage::Report => {
                if !dry_run {
                    outcome.report = Some(report::report_restore(data_dir));
                }
            }
        }
        Ok(())
    }
}
