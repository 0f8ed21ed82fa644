//! Error types for fieldcheck-rs.
//!
//! Domain rejections (missing selfie, replay, out of range, ...) are
//! not errors — they are recorded events returned as ordinary values.
//! Only faults live here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
