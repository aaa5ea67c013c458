use std::path::PathBuf;

use thiserror::Error;

/// Sandcask error types.
///
/// Every pipeline stage wraps its underlying failure in the variant carrying
/// that stage's name; nothing here retries. Retries, if any, are the outer
/// caller's responsibility.
#[derive(Error, Debug)]
pub enum BundleError {
    /// The requested image transport is not one we know how to resolve.
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// The locator part of an image reference is malformed for its transport.
    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    /// Resolving a reference into a usable source failed (network, auth,
    /// parse).
    #[error("resolution: {0}")]
    Resolution(String),

    /// The archive stream could not be decoded.
    #[error("extraction: corrupt archive: {0}")]
    ArchiveCorrupt(String),

    /// An archive entry attempted to escape the extraction root. Always
    /// fatal, never retried.
    #[error("extraction: {path}: illegal extraction path")]
    IllegalExtractionPath { path: PathBuf },

    /// Streaming layers into the scratch destination failed. The destination
    /// is left indeterminate and must be discarded.
    #[error("copy: {0}")]
    Copy(String),

    /// Writing the fixed bundle scaffold failed.
    #[error("scaffold: {0}")]
    Scaffold(String),

    /// Translating the image configuration into generated scripts failed.
    #[error("translation: {0}")]
    ConfigTranslation(String),

    /// Could not add owner-write permission to the bundle root. Always
    /// surfaced, never downgraded to a warning.
    #[error("scaffold: failed to make {path} writable: {message}")]
    PermissionRepair { path: PathBuf, message: String },

    /// A container-start dispatch failure (no usable shell, no runscript).
    #[error("bootstrap: {0}")]
    Bootstrap(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BundleError {
    fn from(err: serde_json::Error) -> Self {
        BundleError::Serialization(err.to_string())
    }
}

/// Result type alias for Sandcask operations.
pub type Result<T> = std::result::Result<T, BundleError>;
