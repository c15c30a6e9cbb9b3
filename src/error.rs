use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CarveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("signature `{signature}`: required field `{field}` is missing or empty")]
    MissingField {
        signature: String,
        field: &'static str,
    },

    #[error("signature with blank name")]
    EmptyName,

    #[error("source file {path}: {source}")]
    SourceIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no source file at index {0}")]
    NoSuchSource(usize),

    #[error("scan engine not initialized")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, CarveError>;
