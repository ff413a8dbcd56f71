//! Write-then-validate uploader.

use super::{SecureFileUploader, UploadContext, UploadRequest, UploadStage};
use crate::error::{Result, UploadResult};
use crate::policy::ConfigurationProvider;
use crate::sniffer::ContentSniffer;
use crate::storage::StoredFile;
use async_trait::async_trait;
use std::sync::Arc;

/// Streams the upload to a staged file, hardens it, then sniffs the staged
/// copy. A mismatch drops the staged file instead of committing it.
#[derive(Debug, Clone)]
pub struct PostValidateUploader {
    context: UploadContext,
}

impl PostValidateUploader {
    pub fn new(config: Arc<dyn ConfigurationProvider>, sniffer: Arc<dyn ContentSniffer>) -> Self {
        Self {
            context: UploadContext::new(config, sniffer),
        }
    }

    async fn store(&self, request: UploadRequest, stage: &mut UploadStage) -> Result<StoredFile> {
        let generated = self.context.check_request(&request, stage)?;
        let UploadRequest {
            mut reader,
            content_type,
            ..
        } = request;

        let staged = self.context.storage.write_bounded(&mut reader).await?;
        drop(reader);
        *stage = UploadStage::Written;

        self.context.storage.assign_owner(staged.path()).await?;
        *stage = UploadStage::OwnerSet;

        self.context.storage.harden_permissions(staged.path()).await?;
        *stage = UploadStage::PermissionsHardened;

        let mut file = self.context.storage.open(staged.path()).await?;
        let detected = self
            .context
            .validator
            .verify_content(&mut file, &content_type, &generated.extension)
            .await?;
        drop(file);
        *stage = UploadStage::ContentVerified;
        tracing::trace!("Staged upload {:?} verified as {}", staged.path(), detected);

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
impl SecureFileUploader for PostValidateUploader {
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
