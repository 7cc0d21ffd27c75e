//! Physical Backup/Restore Tool
//!
//! Provides CLI interface for PostgreSQL cluster backup and restore operations

// clustervault/src/main.rs
mod backup;
mod config;
mod errors;
mod restore;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use config::cli::{Cli, Command};
use config::{
    AppConfig, OperationConfig, load_backup_config_from_json, load_restore_config_from_json,
};
use restore::data_dir::ResetOutcome;
use restore::pipeline::Stage;
use std::process::ExitCode;
use utils::format_bytes;

/// Main entry point for the backup/restore tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = utils::logger::init(&cli.log_level) {
        eprintln!("⚠️ {}", e);
    }

    match run_app(cli).await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let mut app_config = AppConfig::load(cli.config.as_deref())
        .context("Failed to load application configuration")?;

    match cli.command {
        Command::Backup(args) => {
            println!("🚀 Starting Backup Process...");
            let backup_config = load_backup_config_from_json(&app_config.raw_json_config, &args)
                .context("Failed to load backup configuration")?;
            app_config.operation = Some(OperationConfig::Backup(backup_config));

            let summary = backup::run_backup_flow(&app_config)
                .await
                .context("Backup process failed")?;

            println!("Backup: {}", summary.archive.path.display());
            if let Some(estimate) = summary.estimated_size {
                println!("Estimated cluster size: {}", format_bytes(estimate));
            }
            if let Some(report) = &summary.verification {
                println!("Size: {}", format_bytes(report.total_bytes));
                if !report.members.is_empty() {
                    println!("Archive files: {}", report.members.join(", "));
                }
                if !report.has_manifest {
                    println!("⚠️ No backup_manifest found");
                }
            }
        }
        Command::Restore(args) => {
            println!("🔄 Starting Restore Process...");
            let restore_config = load_restore_config_from_json(&app_config.raw_json_config, &args)
                .context("Failed to load restore configuration")?;
            app_config.operation = Some(OperationConfig::Restore(restore_config));

            let outcome = restore::run_restore_flow(&app_config)
                .await
                .context("Restore process failed")?;

            if let Some(format) = outcome.format {
                println!("Backup format: {}", format);
            }
            println!(
                "Completed {} of {} restore stages",
                outcome.completed.len(),
                Stage::ORDER.len()
            );
            match outcome.reset {
                Some(ResetOutcome::Cleared { removed }) => {
                    println!("Cleared {} existing entries from the data directory", removed)
                }
                Some(ResetOutcome::WouldClear { entries }) => {
                    println!("Would clear {} existing entries from the data directory", entries)
                }
                _ => {}
            }
            if outcome.dry_run {
                println!("DRY RUN complete. No changes were made.");
            }
            if let Some(extraction) = &outcome.extraction {
                println!(
                    "Restored {} files ({}) into {} directories",
                    extraction.files,
                    format_bytes(extraction.bytes),
                    extraction.directories
                );
            }
            if let Some(changed) = outcome.ownership_changes {
                println!("Ownership updated on {} entries", changed);
            }
            if !outcome.scrubbed.is_empty() {
                println!("Removed recovery files: {}", outcome.scrubbed.join(", "));
            }
            if let Some(report) = &outcome.report {
                println!(
                    "Data directory: {} in {} files",
                    format_bytes(report.total_bytes),
                    report.files
                );
            }
            if let Some(notice) = &outcome.wal_reset {
                println!("⚠️ WAL reset may be required before the server starts.");
                println!("   Control file: {}", notice.control_file.display());
                println!("   {}", notice.instructions());
            }
            println!("Next step: start the PostgreSQL server and check its logs.");
        }
    }
    Ok(())
}
