//! Request validation against the configured whitelist.
//!
//! [`RequestValidator`] answers three questions: is the declared content
//! type allowed, is the extension allowed for that type, and do the actual
//! bytes agree with both. The last check consults the whitelist for the
//! *detected* type and for the *declared* type, so bytes that sniff as a
//! different allowed type still fail when the extension is illegal for it.

use crate::error::{Result, SecureUploadError};
use crate::policy::ConfigurationProvider;
use crate::sniffer::{ContentSniffer, UNKNOWN_CONTENT_TYPE};
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Result of a single content check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted,
    Rejected(String),
    /// The sniffer could not classify the content. Treated as a rejection.
    Indeterminate,
}

impl ValidationOutcome {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => f.write_str("accepted"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
            Self::Indeterminate => f.write_str("indeterminate"),
        }
    }
}

/// Whitelist and content checks shared by every upload strategy.
#[derive(Clone)]
pub struct RequestValidator {
    config: Arc<dyn ConfigurationProvider>,
    sniffer: Arc<dyn ContentSniffer>,
}

impl RequestValidator {
    pub fn new(config: Arc<dyn ConfigurationProvider>, sniffer: Arc<dyn ContentSniffer>) -> Self {
        Self { config, sniffer }
    }

    #[must_use]
    pub fn is_allowed_content_type(&self, content_type: &str) -> bool {
        self.config.has_content_type(content_type)
    }

    /// `false` when `content_type` is not whitelisted at all.
    #[must_use]
    pub fn is_allowed_extension(&self, content_type: &str, extension: &str) -> bool {
        self.config
            .extensions_for(content_type)
            .is_some_and(|allowed| allowed.iter().any(|e| e == extension))
    }

    /// Sniff `reader` and report whether its content matches `declared` and `extension`.
    ///
    /// Consumes the part of `reader` the sniffer needs.
    pub async fn matches_sniffed_content(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        declared: &str,
        extension: &str,
    ) -> bool {
        self.evaluate_sniffed_content(reader, declared, extension)
            .await
            .is_accepted()
    }

    /// Sniff `reader` and classify the result.
    pub async fn evaluate_sniffed_content(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        declared: &str,
        extension: &str,
    ) -> ValidationOutcome {
        let detected = self.sniffer.detect(reader).await;
        self.evaluate_detected(&detected, declared, extension)
    }

    /// Classify an already detected content type.
    #[must_use]
    pub fn evaluate_detected(&self, detected: &str, declared: &str, extension: &str) -> ValidationOutcome {
        if detected == UNKNOWN_CONTENT_TYPE {
            return ValidationOutcome::Indeterminate;
        }
        if !self.is_allowed_content_type(detected) {
            return ValidationOutcome::Rejected(format!("detected type {detected} is not whitelisted"));
        }
        if !self.is_allowed_extension(detected, extension) {
            return ValidationOutcome::Rejected(format!(
                "extension '{extension}' not allowed for detected type {detected}"
            ));
        }
        if !self.is_allowed_extension(declared, extension) {
            return ValidationOutcome::Rejected(format!(
                "extension '{extension}' not allowed for declared type {declared}"
            ));
        }
        ValidationOutcome::Accepted
    }

    /// Check the declared content type and extension before any byte is read.
    ///
    /// # Errors
    /// [`SecureUploadError::ContentTypeNotAllowed`] or
    /// [`SecureUploadError::ExtensionNotAllowed`].
    pub fn check_declared(&self, content_type: &str, extension: &str) -> Result<()> {
        if !self.is_allowed_content_type(content_type) {
            return Err(SecureUploadError::ContentTypeNotAllowed {
                content_type: content_type.to_string(),
            });
        }
        if !self.is_allowed_extension(content_type, extension) {
            return Err(SecureUploadError::ExtensionNotAllowed {
                content_type: content_type.to_string(),
                extension: extension.to_string(),
            });
        }
        Ok(())
    }

    /// Sniff `reader` and fail unless it matches `declared` and `extension`.
    ///
    /// Returns the detected content type on success.
    ///
    /// # Errors
    /// [`SecureUploadError::ContentMismatch`] for any outcome other than accepted.
    pub async fn verify_content(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        declared: &str,
        extension: &str,
    ) -> Result<String> {
        let detected = self.sniffer.detect(reader).await;
        match self.evaluate_detected(&detected, declared, extension) {
            ValidationOutcome::Accepted => Ok(detected),
            outcome => {
                tracing::debug!(
                    "Content check {} for declared {} / '{}'",
                    outcome,
                    declared,
                    extension
                );
                Err(SecureUploadError::ContentMismatch {
                    declared: declared.to_string(),
                    detected,
                    extension: extension.to_string(),
                })
            }
        }
    }

    /// Re-validate stored content under the current whitelist.
    ///
    /// Stored files carry no declared type, so the detected type stands in
    /// for it.
    ///
    /// # Errors
    /// [`SecureUploadError::ContentMismatch`] when the content is unknown or
    /// no longer whitelisted for `extension`.
    pub async fn verify_stored(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        extension: &str,
    ) -> Result<String> {
        let detected = self.sniffer.detect(reader).await;
        match self.evaluate_detected(&detected, &detected, extension) {
            ValidationOutcome::Accepted => Ok(detected),
            _ => Err(SecureUploadError::ContentMismatch {
                declared: detected.clone(),
                detected,
                extension: extension.to_string(),
            }),
        }
    }
}

impl fmt::Debug for RequestValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestValidator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
