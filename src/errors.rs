use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Privilege error: {0}")]
    Privilege(String),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pg_basebackup failed ({status})\nOutput: {output}")]
    BackupExecution { status: String, output: String },

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("No valid backup found in {}", .0.display())]
    UnknownFormat(PathBuf),

    #[error("Extraction failed at {}: {source}", path.display())]
    Extraction {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to set ownership on {}: {source}", path.display())]
    Permission {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid data directory: {0}")]
    InvalidDataDirectory(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Restore stage '{stage}' failed: {source}")]
    StageFailed {
        stage: &'static str,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        AppError::Io {
            context: context.into(),
            source,
        }
    }

    /// The innermost error when wrapped by the restore pipeline.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::StageFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
