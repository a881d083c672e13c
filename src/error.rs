//! Error types shared by the download pipeline.
//!
//! Every failure that can reach a chat user maps to one of these variants. The
//! outermost handlers log them and turn them into an apology message; nothing
//! here is retried.

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::session::SessionError;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The external extraction tool failed (metadata or download).
    #[error("extraction failed: {message}")]
    Extraction { message: String },

    /// The requested identifier has no stored content.
    #[error("no download stored for {id}")]
    NotFound { id: String },

    /// A download directory could not be created, even after retrying with
    /// fresh identifiers.
    #[error("could not create download directory {}: {source}", path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored record breaks the one-media-file-plus-title layout.
    #[error("download {id} is corrupt: {reason}")]
    CorruptRecord { id: String, reason: String },

    /// A format choice arrived for a session that cannot accept it.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The extraction tool ran longer than the configured limit.
    #[error("extraction timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The chat transport rejected a request.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl Error {
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
        }
    }

    pub fn not_found(id: impl ToString) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    pub fn corrupt(id: impl ToString, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<teloxide::RequestError> for Error {
    fn from(err: teloxide::RequestError) -> Self {
        Self::Transport(err.to_string())
    }
}
