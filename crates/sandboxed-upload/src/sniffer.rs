//! Content sniffing using magic number detection
//!
//! The pipeline never trusts a declared content type on its own. A
//! [`ContentSniffer`] looks at the leading bytes of a stream and reports
//! what the content actually is. The default [`InferSniffer`] uses the
//! `infer` crate; file types are determined solely by content, not by
//! file extensions.

use async_trait::async_trait;
use infer::Infer;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Media type reported when content cannot be classified.
pub const UNKNOWN_CONTENT_TYPE: &str = "application/octet-stream";

/// Default number of leading bytes inspected for detection.
pub const DEFAULT_MAX_DETECTION_BYTES: usize = 8192;

/// Detects the real media type of a byte stream.
///
/// Implementations consume as much of `reader` as they need and must
/// return [`UNKNOWN_CONTENT_TYPE`] rather than an error when detection
/// fails.
#[async_trait]
pub trait ContentSniffer: Send + Sync {
    async fn detect(&self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> String;
}

/// [`ContentSniffer`] backed by `infer` signatures.
pub struct InferSniffer {
    infer: Infer,
    max_detection_bytes: usize,
}

impl InferSniffer {
    /// Create a sniffer using the built-in signatures.
    #[must_use]
    pub fn new() -> Self {
        Self {
            infer: Infer::new(),
            max_detection_bytes: DEFAULT_MAX_DETECTION_BYTES,
        }
    }

    /// Create a sniffer with additional matchers registered by `setup`.
    #[must_use]
    pub fn with_custom_matchers<F>(setup: F) -> Self
    where
        F: FnOnce(&mut Infer),
    {
        let mut infer = Infer::new();
        setup(&mut infer);
        Self {
            infer,
            max_detection_bytes: DEFAULT_MAX_DETECTION_BYTES,
        }
    }

    /// Set how many leading bytes are read for detection.
    #[must_use]
    pub fn max_detection_bytes(mut self, bytes: usize) -> Self {
        self.max_detection_bytes = bytes.max(1);
        self
    }

    /// Classify a buffer that is already in memory.
    #[must_use]
    pub fn detect_bytes(&self, content: &[u8]) -> String {
        self.infer.get(content).map_or_else(
            || UNKNOWN_CONTENT_TYPE.to_string(),
            |kind| kind.mime_type().to_string(),
        )
    }
}

impl Default for InferSniffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InferSniffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferSniffer")
            .field("max_detection_bytes", &self.max_detection_bytes)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ContentSniffer for InferSniffer {
    async fn detect(&self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> String {
        let mut buffer = Vec::with_capacity(self.max_detection_bytes);
        let limit = self.max_detection_bytes as u64;
        match reader.take(limit).read_to_end(&mut buffer).await {
            Ok(_) => self.detect_bytes(&buffer),
            Err(e) => {
                tracing::warn!("Content detection failed while reading stream: {}", e);
                UNKNOWN_CONTENT_TYPE.to_string()
            }
        }
    }
}
