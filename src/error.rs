//! Error taxonomy for store and pipeline operations.
//!
//! Most code paths return `anyhow::Result`; this enum exists for the errors
//! callers branch on (degradation, exit codes, HTTP status mapping). Per-file
//! ingest errors never abort a batch — they are logged and counted.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// No `.ragdag` directory found walking up from the starting point.
    #[error("not inside a ragdag store (searched from {0}); run `ragdag init` first")]
    NotAStore(PathBuf),

    /// Malformed `section.key` or a config write failure.
    #[error("bad config key '{0}': expected section.key")]
    BadConfig(String),

    /// File suffix maps to no known parser.
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(PathBuf),

    /// An external decoder (pdftotext, pandoc) is missing or failed.
    #[error("text extraction unavailable for {path}: {reason}")]
    ParseUnavailable { path: PathBuf, reason: String },

    /// Provider is configured as `none` or its credentials are absent.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A configured provider failed at runtime.
    #[error("provider failure: {0}")]
    ProviderFailure(String),

    /// Magic, version, or count mismatch in an embeddings file.
    #[error("corrupt embeddings file {path}: {reason}")]
    CorruptEmbeddings { path: PathBuf, reason: String },

    /// An external capability exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// CLI exit code: 1 for user-recoverable errors, 2 for operational ones.
    pub fn exit_code(&self) -> i32 {
        match self {
            RagError::NotAStore(_)
            | RagError::BadConfig(_)
            | RagError::UnsupportedFileType(_)
            | RagError::ProviderUnavailable(_) => 1,
            _ => 2,
        }
    }
}
