// clustervault/src/config/cli.rs
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use super::{ArchiveFormat, CheckpointMode};

#[derive(Debug, Parser)]
#[command(
    name = "clustervault",
    version,
    about = "Physical backup and restore for PostgreSQL/TimescaleDB clusters"
)]
pub struct Cli {
    /// JSON file with default settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream a full physical backup of the cluster with pg_basebackup
    Backup(BackupArgs),
    /// Rebuild a data directory from a backup archive
    Restore(RestoreArgs),
}

#[derive(Debug, Default, Args)]
pub struct ConnectionArgs {
    #[arg(long, env = "PGHOST")]
    pub host: Option<String>,

    #[arg(long, env = "PGPORT")]
    pub port: Option<u16>,

    #[arg(long, env = "PGUSER")]
    pub user: Option<String>,

    #[arg(long, env = "PGPASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long, env = "PGDATABASE")]
    pub database: Option<String>,

    /// postgres:// URL; individual connection flags take precedence over it
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,
}

#[derive(Debug, Default, Args)]
pub struct BackupArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Root directory that receives the timestamped archive directory
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub format: Option<ArchiveFormat>,

    /// Compression level (0-9), tar format only
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=9))]
    pub compress: Option<u32>,

    #[arg(long, value_enum)]
    pub checkpoint: Option<CheckpointMode>,

    #[arg(long)]
    pub no_progress: bool,

    #[arg(long)]
    pub dry_run: bool,

    /// Explicit path to the pg_basebackup executable
    #[arg(long)]
    pub pg_basebackup: Option<PathBuf>,
}

#[derive(Debug, Default, Args)]
pub struct RestoreArgs {
    /// Backup archive directory to restore from
    #[arg(long)]
    pub backup: PathBuf,

    /// Data directory to rebuild
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub force: bool,

    /// Numeric uid the database engine runs as
    #[arg(long)]
    pub owner_uid: Option<u32>,

    /// Numeric gid the database engine runs as
    #[arg(long)]
    pub owner_gid: Option<u32>,
}
