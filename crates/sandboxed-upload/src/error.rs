//! Error types for the sandboxed upload pipeline.
//!
//! Two layers exist. [`SecureUploadError`] carries the detailed cause and is
//! what the operators and validators return internally; it is logged at the
//! pipeline boundary. [`UploadError`] is what callers of
//! [`SecureFileUploader`](crate::pipeline::SecureFileUploader) see: every
//! security-relevant failure collapses into a single `Rejected` so an
//! adversarial uploader cannot learn which check tripped.

use std::path::PathBuf;

/// Result type for internal upload operations.
pub type Result<T> = std::result::Result<T, SecureUploadError>;

/// Result type returned to callers of the upload API.
pub type UploadResult<T> = std::result::Result<T, UploadError>;

/// Coarse classification of a [`SecureUploadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Declared type, extension, file name or sniffed content refused.
    ValidationRejected,
    /// Source stream longer than the configured maximum.
    SizeExceeded,
    /// Directory creation, write, owner or permission change failed.
    StorageFailure,
    /// Requested stored file does not exist.
    NotFound,
}

/// Detailed errors raised while validating or storing an upload.
#[derive(Debug, thiserror::Error)]
pub enum SecureUploadError {
    /// Declared content type is not on the whitelist
    #[error("Content type not allowed: {content_type}")]
    ContentTypeNotAllowed { content_type: String },

    /// Extension is not whitelisted for the content type
    #[error("Extension '{extension}' not allowed for content type {content_type}")]
    ExtensionNotAllowed {
        content_type: String,
        extension: String,
    },

    /// Sniffed bytes disagree with the declared type or extension
    #[error("Content mismatch: declared {declared}, detected {detected}, extension '{extension}'")]
    ContentMismatch {
        declared: String,
        detected: String,
        extension: String,
    },

    /// User supplied file name failed sanitization
    #[error("Invalid file name {name:?}: {reason}")]
    InvalidFileName { name: String, reason: String },

    /// Source stream exceeded the size bound
    #[error("Upload exceeds maximum size of {max_bytes} bytes")]
    SizeExceeded { max_bytes: u64 },

    /// Filesystem operation failed
    #[error("Storage failure during {operation} on {path:?}: {source}")]
    Storage {
        operation: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configured owner could not be resolved to a platform user
    #[error("Storage owner '{owner}' could not be resolved")]
    OwnerNotResolved { owner: String },

    /// Requested name escapes or is not a valid stored file reference
    #[error("Path validation failed: {path:?} - {reason}")]
    PathValidation { path: PathBuf, reason: String },

    /// Stored file not found
    #[error("File not found: {name}")]
    NotFound { name: String },
}

impl SecureUploadError {
    /// Wrap an I/O error raised by `operation` on `path`.
    pub fn storage(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Shorthand for an [`SecureUploadError::InvalidFileName`].
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFileName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Map this error onto the failure taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ContentTypeNotAllowed { .. }
            | Self::ExtensionNotAllowed { .. }
            | Self::ContentMismatch { .. }
            | Self::InvalidFileName { .. }
            | Self::PathValidation { .. } => ErrorKind::ValidationRejected,
            Self::SizeExceeded { .. } => ErrorKind::SizeExceeded,
            Self::Storage { .. } | Self::OwnerNotResolved { .. } => ErrorKind::StorageFailure,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }
}

/// Error surfaced to callers of the upload API.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UploadError {
    /// Any validation, size or storage failure.
    #[error("File not allowed")]
    Rejected,

    /// The requested stored file does not exist.
    #[error("File not found: {name}")]
    NotFound { name: String },
}

impl From<SecureUploadError> for UploadError {
    fn from(err: SecureUploadError) -> Self {
        match err {
            SecureUploadError::NotFound { name } => Self::NotFound { name },
            _ => Self::Rejected,
        }
    }
}
