//! Upload orchestration.
//!
//! Two strategies implement [`SecureFileUploader`]:
//!
//! - [`PreValidateUploader`] buffers the whole stream (bounded by the size
//!   limit), validates it in memory and only then writes it.
//! - [`PostValidateUploader`] streams straight to a staged file and sniffs
//!   the staged copy before committing it. Between write and verification
//!   the unverified bytes exist on disk under a staging name that
//!   `list`/`get` never report.
//!
//! Both walk the same [`UploadStage`] sequence and surface every failure
//! except a missing file as [`UploadError::Rejected`].

mod post_validate;
mod pre_validate;

pub use post_validate::PostValidateUploader;
pub use pre_validate::PreValidateUploader;

use crate::error::{ErrorKind, Result, SecureUploadError, UploadError, UploadResult};
use crate::naming::{GeneratedName, NameGenerator, file_extension};
use crate::policy::ConfigurationProvider;
use crate::sniffer::ContentSniffer;
use crate::storage::{StorageOperator, StoredFile};
use crate::validator::RequestValidator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// A single upload: the source stream plus the untrusted name and type the
/// client declared. Consumed by value, so the stream is closed on every
/// exit path.
pub struct UploadRequest {
    reader: Box<dyn AsyncRead + Unpin + Send>,
    file_name: String,
    content_type: String,
}

impl UploadRequest {
    pub fn new<R>(reader: R, file_name: impl Into<String>, content_type: impl Into<String>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            file_name: file_name.into(),
            content_type: content_type.into(),
        }
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Upload API consumed by the host application.
#[async_trait]
pub trait SecureFileUploader: Send + Sync {
    /// Validate and store `request`, returning the stored file.
    async fn upload(&self, request: UploadRequest) -> UploadResult<StoredFile>;

    /// All committed files in the storage directory.
    async fn list(&self) -> UploadResult<Vec<StoredFile>>;

    /// Look up a stored file and re-validate it against the current whitelist.
    async fn get(&self, name: &str) -> UploadResult<StoredFile>;
}

/// Progress of a single upload. Ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UploadStage {
    Start,
    ContentTypeChecked,
    ExtensionChecked,
    Written,
    OwnerSet,
    PermissionsHardened,
    ContentVerified,
    Committed,
}

impl UploadStage {
    /// Whether bytes may exist on disk that a rejection has to remove.
    #[must_use]
    pub fn requires_cleanup(self) -> bool {
        self >= Self::Written && self < Self::Committed
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::ContentTypeChecked => "content-type-checked",
            Self::ExtensionChecked => "extension-checked",
            Self::Written => "written",
            Self::OwnerSet => "owner-set",
            Self::PermissionsHardened => "permissions-hardened",
            Self::ContentVerified => "content-verified",
            Self::Committed => "committed",
        }
    }
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which uploader [`build_uploader`] creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadStrategy {
    /// Buffer then validate then write
    PreValidate,
    /// Write then validate, delete on mismatch
    #[default]
    PostValidate,
}

impl UploadStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreValidate => "pre-validate",
            Self::PostValidate => "post-validate",
        }
    }
}

impl fmt::Display for UploadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "pre-validate" | "prevalidate" => Ok(Self::PreValidate),
            "post-validate" | "postvalidate" => Ok(Self::PostValidate),
            other => Err(format!("unknown upload strategy '{other}'")),
        }
    }
}

/// Create the uploader for `strategy`.
pub fn build_uploader(
    strategy: UploadStrategy,
    config: Arc<dyn ConfigurationProvider>,
    sniffer: Arc<dyn ContentSniffer>,
) -> Box<dyn SecureFileUploader> {
    tracing::debug!("Building {} uploader", strategy);
    match strategy {
        UploadStrategy::PreValidate => Box::new(PreValidateUploader::new(config, sniffer)),
        UploadStrategy::PostValidate => Box::new(PostValidateUploader::new(config, sniffer)),
    }
}

/// Collaborators shared by both strategies.
#[derive(Debug, Clone)]
pub(crate) struct UploadContext {
    pub(crate) config: Arc<dyn ConfigurationProvider>,
    pub(crate) validator: RequestValidator,
    pub(crate) storage: StorageOperator,
}

impl UploadContext {
    pub(crate) fn new(config: Arc<dyn ConfigurationProvider>, sniffer: Arc<dyn ContentSniffer>) -> Self {
        Self {
            validator: RequestValidator::new(Arc::clone(&config), sniffer),
            storage: StorageOperator::new(Arc::clone(&config)),
            config,
        }
    }

    /// Declared type and name checks. Runs before any byte is read.
    pub(crate) fn check_request(
        &self,
        request: &UploadRequest,
        stage: &mut UploadStage,
    ) -> Result<GeneratedName> {
        if !self.validator.is_allowed_content_type(&request.content_type) {
            return Err(SecureUploadError::ContentTypeNotAllowed {
                content_type: request.content_type.clone(),
            });
        }
        *stage = UploadStage::ContentTypeChecked;

        let generated = NameGenerator::new(self.config.naming_mode()).generate(&request.file_name)?;
        self.validator
            .check_declared(&request.content_type, &generated.extension)?;
        *stage = UploadStage::ExtensionChecked;

        Ok(generated)
    }

    /// Log the detailed cause of a failed upload and collapse it.
    pub(crate) fn reject(
        &self,
        request_name: &str,
        stage: UploadStage,
        err: SecureUploadError,
    ) -> UploadError {
        if matches!(err, SecureUploadError::Storage { .. }) {
            tracing::error!(
                "Upload of {:?} failed after stage {} (cleanup: {}): {}",
                request_name,
                stage,
                stage.requires_cleanup(),
                err
            );
        } else {
            tracing::warn!(
                "Upload of {:?} rejected after stage {} (cleanup: {}): {}",
                request_name,
                stage,
                stage.requires_cleanup(),
                err
            );
        }
        err.into()
    }

    pub(crate) async fn list(&self) -> UploadResult<Vec<StoredFile>> {
        self.storage.list().await.map_err(|e| {
            tracing::error!("Listing stored files failed: {}", e);
            UploadError::from(e)
        })
    }

    pub(crate) async fn get(&self, name: &str) -> UploadResult<StoredFile> {
        self.verify_stored(name).await.map_err(|e| {
            match e.kind() {
                ErrorKind::NotFound => tracing::debug!("Stored file {:?}: {}", name, e),
                _ => tracing::warn!("Stored file {:?} rejected on read: {}", name, e),
            }
            UploadError::from(e)
        })
    }

    async fn verify_stored(&self, name: &str) -> Result<StoredFile> {
        let stored = self.storage.lookup(name).await?;
        let extension = file_extension(stored.name())?;
        let mut file = self.storage.open(stored.path()).await?;
        let detected = self.validator.verify_stored(&mut file, extension).await?;
        tracing::debug!("Stored file {:?} verified as {}", name, detected);
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_cleanup_window() {
        assert!(!UploadStage::Start.requires_cleanup());
        assert!(!UploadStage::ExtensionChecked.requires_cleanup());
        assert!(UploadStage::Written.requires_cleanup());
        assert!(UploadStage::ContentVerified.requires_cleanup());
        assert!(!UploadStage::Committed.requires_cleanup());
        assert!(UploadStage::OwnerSet < UploadStage::PermissionsHardened);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("pre-validate".parse::<UploadStrategy>(), Ok(UploadStrategy::PreValidate));
        assert_eq!("POST_VALIDATE".parse::<UploadStrategy>(), Ok(UploadStrategy::PostValidate));
        assert!("eventually".parse::<UploadStrategy>().is_err());
        assert_eq!(UploadStrategy::default(), UploadStrategy::PostValidate);
    }
}
