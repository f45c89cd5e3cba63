use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad input data from the snapshot provider. The cycle is aborted and
    /// nothing is written.
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Store/date sequencing violated (open trade not from the previous day,
    /// or not actually open).
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Price history cannot resolve a pending entry unambiguously.
    #[error("Invalid price path: {0}")]
    InvalidPath(String),

    #[error("Entry for {date} is finalized and cannot be overwritten")]
    ImmutableEntry { date: NaiveDate },

    #[error("Playbook store is locked: {0}")]
    StoreLocked(String),

    #[error("HTTP error: {0}")]
    Http(String),

    /// Provider answered, but the payload was unusable.
    #[error("Feed error: {0}")]
    Feed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
