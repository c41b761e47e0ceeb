use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AgsError {
    #[error("invalid resource url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("service returned status {status}: {message}")]
    ServiceStatus { status: u16, message: String },

    #[error("unsupported resource: {0}")]
    UnsupportedCapability(String),

    #[error("identifier query failed: {0}")]
    IdentifierQueryFailed(String),

    #[error("chunk {start}..{end} failed: {reason}")]
    ChunkFetchFailed {
        start: i64,
        end: i64,
        reason: String,
    },

    #[error("export would require {chunks} requests (threshold {threshold}); rerun with --force")]
    #[diagnostic(help("raise --chunk-threshold or pass --force to download anyway"))]
    ChunkCountExceeded { chunks: usize, threshold: usize },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl AgsError {
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            AgsError::Transport(_)
                | AgsError::ServiceStatus { .. }
                | AgsError::IdentifierQueryFailed(_)
                | AgsError::ChunkFetchFailed { .. }
        )
    }
}
