//! Error types for the preservation ingest workspace

use thiserror::Error;

/// Result type alias for preservation operations
pub type Result<T> = std::result::Result<T, PreserveError>;

/// Main error type shared by every collaborator.
///
/// Collaborators map their backend failures onto these variants at the
/// boundary. Callers decide what to do by variant (see [`is_not_found`] and
/// [`is_fatal`]), never by inspecting the message.
///
/// [`is_not_found`]: PreserveError::is_not_found
/// [`is_fatal`]: PreserveError::is_fatal
#[derive(Error, Debug)]
pub enum PreserveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Illegal path, '{path}' has no top-level bag directory")]
    IllegalPath { path: String },

    #[error("Refusing to delete from bucket '{0}'")]
    UnsafeDeletion(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Metadata store error: {0}")]
    MetadataStore(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl PreserveError {
    /// True when the addressed object or record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PreserveError::NotFound(_))
    }

    /// True for errors that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PreserveError::IllegalPath { .. }
                | PreserveError::UnsafeDeletion(_)
                | PreserveError::Config(_)
        )
    }
}
