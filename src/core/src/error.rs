use thiserror::Error;

/// Klaus artifact error types
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// Reference is malformed or lacks a required tag/digest
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Repository, tag, or expected content layer does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Registry rejected the request after the credential chain was exhausted
    #[error("Authentication failed for {registry}: {message}")]
    Auth { registry: String, message: String },

    /// Archive failed validation or could not be decoded
    #[error("Invalid archive: {0}")]
    ArchiveInvalid(String),

    /// Local cache bookkeeping could not be written
    #[error("Cache error: {0}")]
    Cache(String),

    /// Tag listing returned nothing parseable as a semantic version
    #[error("No semver tags found for {0}")]
    NoSemverTags(String),

    /// Content hash of a fetched blob does not match its descriptor
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Source configuration rejected
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// Container registry error
    #[error("Registry error: {reference} - {message}")]
    Registry { reference: String, message: String },

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ArtifactError {
    fn from(err: serde_json::Error) -> Self {
        ArtifactError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ArtifactError {
    fn from(err: serde_yaml::Error) -> Self {
        ArtifactError::Serialization(err.to_string())
    }
}

/// Result type alias for klaus artifact operations
pub type Result<T> = std::result::Result<T, ArtifactError>;
