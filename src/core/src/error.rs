use std::path::PathBuf;

use thiserror::Error;

/// Stratum error types
#[derive(Error, Debug)]
pub enum StratumError {
    /// A blob, tag, layer or cache entry does not exist
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// A tag resolves to more than one descriptor
    #[error("tag is ambiguous: {name} ({count} candidates)")]
    Ambiguous { name: String, count: usize },

    /// Create on an existing image layout
    #[error("image layout already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// Path exists but is not an OCI image layout
    #[error("not an OCI image layout: {} ({reason})", .path.display())]
    NotAStore { path: PathBuf, reason: String },

    /// Decode-time media type mismatch
    #[error("unsupported media type for {digest}: expected {expected}, found {found}")]
    UnsupportedMediaType {
        digest: String,
        expected: String,
        found: String,
    },

    /// Malformed digest string
    #[error("invalid digest '{digest}': {reason}")]
    InvalidDigest { digest: String, reason: String },

    /// Imported content does not match the expected hash
    #[error("hash mismatch for import {source_path}: expected {expected}, found {actual}")]
    HashMismatch {
        source_path: String,
        expected: String,
        actual: String,
    },

    /// Underlying persistence failure
    #[error("storage error: {context}: {source}")]
    StorageIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The ambient cancellation signal fired
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Persisted build cache could not be decoded
    #[error("build cache {} is corrupt: {reason}", .path.display())]
    CacheCorrupt { path: PathBuf, reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Layer specification could not be normalized
    #[error("invalid layer {layer}: {message}")]
    InvalidLayer { layer: String, message: String },

    /// Layer build failed in the container runtime
    #[error("build of layer {layer} failed: {message}")]
    BuildError { layer: String, message: String },

    /// A command ran in the container and exited unsuccessfully
    #[error("command in layer {layer} exited with status {status}: {command}: {stderr}")]
    CommandFailed {
        layer: String,
        command: String,
        status: i32,
        stderr: String,
    },
}

impl StratumError {
    /// Shorthand for a `StorageIo` error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StratumError::StorageIo {
            context: context.into(),
            source,
        }
    }

    /// Shorthand for a `NotFound` error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        StratumError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Whether this error reports a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StratumError::NotFound { .. })
    }
}

impl From<serde_json::Error> for StratumError {
    fn from(err: serde_json::Error) -> Self {
        StratumError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for StratumError {
    fn from(err: serde_yaml::Error) -> Self {
        StratumError::SerializationError(err.to_string())
    }
}

/// Result type alias for Stratum operations
pub type Result<T> = std::result::Result<T, StratumError>;
