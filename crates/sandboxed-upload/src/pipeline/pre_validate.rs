//! Buffer-then-validate uploader.

use super::{SecureFileUploader, UploadContext, UploadRequest, UploadStage};
use crate::error::{Result, SecureUploadError, UploadResult};
use crate::policy::ConfigurationProvider;
use crate::sniffer::ContentSniffer;
use crate::storage::StoredFile;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// Reads the whole upload into memory and validates it before anything
/// touches the storage directory.
///
/// Memory use per upload is bounded by the configured maximum size plus one
/// byte.
#[derive(Debug, Clone)]
pub struct PreValidateUploader {
    context: UploadContext,
}

impl PreValidateUploader {
    pub fn new(config: Arc<dyn ConfigurationProvider>, sniffer: Arc<dyn ContentSniffer>) -> Self {
        Self {
            context: UploadContext::new(config, sniffer),
        }
    }

    async fn store(&self, request: UploadRequest, stage: &mut UploadStage) -> Result<StoredFile> {
        let generated = self.context.check_request(&request, stage)?;
        let UploadRequest {
            reader,
            file_name,
            content_type,
        } = request;

        let max_bytes = self.context.config.max_file_size();
        let mut buffer = Vec::new();
        let mut bounded = reader.take(max_bytes.saturating_add(1));
        bounded
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| SecureUploadError::storage("buffer upload", &file_name, e))?;
        drop(bounded);

        if buffer.len() as u64 > max_bytes {
            return Err(SecureUploadError::SizeExceeded { max_bytes });
        }

        let detected = self
            .context
            .validator
            .verify_content(&mut buffer.as_slice(), &content_type, &generated.extension)
            .await?;
        tracing::trace!("Buffered {} bytes of {} for {:?}", buffer.len(), detected, file_name);

        let staged = self
            .context
            .storage
            .write_bounded(&mut buffer.as_slice())
            .await?;
        *stage = UploadStage::Written;

        self.context.storage.assign_owner(staged.path()).await?;
        *stage = UploadStage::OwnerSet;

        self.context.storage.harden_permissions(staged.path()).await?;
        *stage = UploadStage::PermissionsHardened;

        // Content was verified from the buffer before the write.
        *stage = UploadStage::ContentVerified;

        let stored = self
            .context
            .storage
            .commit(staged, &generated.file_name)
            .await?;
        *stage = UploadStage::Committed;
        Ok(stored)
    }
}

#[async_trait]
impl SecureFileUploader for PreValidateUploader {
    async fn upload(&self, request: UploadRequest) -> UploadResult<StoredFile> {
        let file_name = request.file_name.clone();
        let mut stage = UploadStage::Start;
        self.store(request, &mut stage)
            .await
            .map_err(|e| self.context.reject(&file_name, stage, e))
    }

    async fn list(&self) -> UploadResult<Vec<StoredFile>> {
        self.context.list().await
    }

    async fn get(&self, name: &str) -> UploadResult<StoredFile> {
        self.context.get(name).await
    }
}
