use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Summarizer error: {0}")]
    Summarizer(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Mail source error: {0}")]
    Source(String),

    #[error("Database still locked after {attempts} attempts")]
    StillLocked { attempts: u32 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// True for SQLite busy/locked failures, the only errors worth retrying
    /// a whole transaction for.
    pub fn is_locked(&self) -> bool {
        match self {
            AppError::Database(tokio_rusqlite::Error::Rusqlite(e)) | AppError::Sqlite(e) => {
                is_lock_error(e)
            }
            _ => false,
        }
    }
}

pub fn is_lock_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}
