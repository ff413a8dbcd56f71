//! Size-bounded storage of upload streams.
//!
//! Bytes are first written to a hidden staging file in the storage
//! directory. A [`StagedFile`] guard owns that file: committing renames it
//! to its final storage name, and dropping an uncommitted guard removes it.
//! Staging files are never reported by [`StorageOperator::list`] or
//! [`StorageOperator::lookup`].

use crate::error::{Result, SecureUploadError};
use crate::policy::ConfigurationProvider;
use crate::security::{
    assign_owner, restrict_file_permissions, set_secure_permissions, validate_path_within_sandbox,
    validate_stored_name,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

const STAGING_PREFIX: &str = ".upload-";
const STAGING_SUFFIX: &str = ".partial";

/// Whether `file_name` is a staging file written by [`StorageOperator::write_bounded`].
#[must_use]
pub fn is_staging_name(file_name: &str) -> bool {
    file_name.starts_with(STAGING_PREFIX) && file_name.ends_with(STAGING_SUFFIX)
}

/// A committed file inside the storage directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    name: String,
    path: PathBuf,
}

impl StoredFile {
    /// Name relative to the storage directory, `/` separated.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// Uncommitted upload bytes. Removed on drop unless committed.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    size: u64,
    released: bool,
}

impl StagedFile {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of bytes written.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Rename the staged file to `target`, replacing any existing file there.
    async fn persist(mut self, target: &Path) -> Result<()> {
        fs::rename(&self.path, target)
            .await
            .map_err(|e| SecureUploadError::storage("commit", target, e))?;
        self.released = true;
        Ok(())
    }

    /// Remove the staged file now instead of on drop.
    pub async fn discard(mut self) {
        self.released = true;
        match fs::remove_file(&self.path).await {
            Ok(()) => tracing::debug!("Discarded staged upload {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove staged upload {:?}: {}", self.path, e),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed uncommitted upload {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove uncommitted upload {:?}: {}", self.path, e),
        }
    }
}

/// Filesystem side of the upload pipeline.
#[derive(Clone)]
pub struct StorageOperator {
    config: Arc<dyn ConfigurationProvider>,
}

impl StorageOperator {
    pub fn new(config: Arc<dyn ConfigurationProvider>) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn storage_directory(&self) -> &Path {
        self.config.storage_directory()
    }

    /// Create the storage directory with owner-only access if it is missing.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or secured.
    pub async fn ensure_directory(&self) -> Result<()> {
        let dir = self.storage_directory();
        if fs::metadata(dir).await.is_ok_and(|m| m.is_dir()) {
            return Ok(());
        }

        fs::create_dir_all(dir)
            .await
            .map_err(|e| SecureUploadError::storage("create storage directory", dir, e))?;
        set_secure_permissions(dir).await?;

        tracing::info!("Created storage directory {:?}", dir);
        Ok(())
    }

    /// Copy at most `max_file_size` bytes of `reader` into a new staged file.
    ///
    /// One extra byte is read to detect oversized streams; in that case the
    /// staged file is removed and [`SecureUploadError::SizeExceeded`] is
    /// returned.
    ///
    /// # Errors
    /// Returns an error on oversize or any I/O failure. No file remains on
    /// any error path.
    pub async fn write_bounded<R>(&self, reader: &mut R) -> Result<StagedFile>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.ensure_directory().await?;

        let max_bytes = self.config.max_file_size();
        let path = self.storage_directory().join(format!(
            "{STAGING_PREFIX}{}{STAGING_SUFFIX}",
            Uuid::new_v4().simple()
        ));

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let file = options
            .open(&path)
            .await
            .map_err(|e| SecureUploadError::storage("create staged file", &path, e))?;

        let mut staged = StagedFile {
            path,
            size: 0,
            released: false,
        };
        // Declared after the guard so the handle is closed before the guard runs.
        let mut file = file;

        let mut bounded = reader.take(max_bytes.saturating_add(1));
        let written = tokio::io::copy(&mut bounded, &mut file)
            .await
            .map_err(|e| SecureUploadError::storage("write", &staged.path, e))?;

        if written > max_bytes {
            tracing::debug!(
                "Upload stream exceeded {} bytes, removing {:?}",
                max_bytes,
                staged.path
            );
            return Err(SecureUploadError::SizeExceeded { max_bytes });
        }

        file.flush()
            .await
            .map_err(|e| SecureUploadError::storage("flush", &staged.path, e))?;
        file.sync_all()
            .await
            .map_err(|e| SecureUploadError::storage("sync", &staged.path, e))?;
        drop(file);

        staged.size = written;
        tracing::trace!("Staged {} bytes at {:?}", written, staged.path);
        Ok(staged)
    }

    /// Give `path` to the configured owner. Skipped when none is configured.
    ///
    /// # Errors
    /// Returns an error if an owner is configured but cannot be resolved or
    /// assigned.
    pub async fn assign_owner(&self, path: &Path) -> Result<()> {
        match self.config.storage_owner() {
            Some(owner) => assign_owner(path, owner).await,
            None => {
                tracing::debug!("No storage owner configured, keeping owner of {:?}", path);
                Ok(())
            }
        }
    }

    /// Restrict `path` to owner read and write where the platform allows it.
    ///
    /// # Errors
    /// Returns an error if the platform supports permissions but the change fails.
    pub async fn harden_permissions(&self, path: &Path) -> Result<()> {
        restrict_file_permissions(path).await.map(|_| ())
    }

    /// Move `staged` to its final storage name.
    ///
    /// # Errors
    /// Returns an error if `name` is not a plain file name or the rename fails.
    /// The staged file is removed in either case.
    pub async fn commit(&self, staged: StagedFile, name: &str) -> Result<StoredFile> {
        validate_stored_name(name)?;
        if name.contains(['/', '\\']) || is_staging_name(name) {
            return Err(SecureUploadError::PathValidation {
                path: PathBuf::from(name),
                reason: "Storage name must be a plain file name".to_string(),
            });
        }

        let path = self.storage_directory().join(name);
        staged.persist(&path).await?;

        tracing::info!("Stored upload as {:?}", path);
        Ok(StoredFile {
            name: name.to_string(),
            path,
        })
    }

    /// Recursively list stored files, sorted by name.
    ///
    /// Returns an empty list when the storage directory does not exist.
    ///
    /// # Errors
    /// Returns an error if a directory cannot be read.
    pub async fn list(&self) -> Result<Vec<StoredFile>> {
        let base = self.storage_directory();
        if !fs::try_exists(base).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut pending = vec![base.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| SecureUploadError::storage("list", &dir, e))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| SecureUploadError::storage("list", &dir, e))?
            {
                let entry_path = entry.path();
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };

                if file_type.is_dir() {
                    pending.push(entry_path);
                    continue;
                }

                if entry.file_name().to_str().is_none_or(is_staging_name) {
                    continue;
                }

                if let Ok(relative) = entry_path.strip_prefix(base)
                    && let Some(name) = relative.to_str()
                {
                    files.push(StoredFile {
                        name: name.replace('\\', "/"),
                        path: entry_path.clone(),
                    });
                }
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Resolve a stored file by name.
    ///
    /// # Errors
    /// [`SecureUploadError::NotFound`] if the storage directory or the file
    /// is missing, [`SecureUploadError::PathValidation`] if `name` is not a
    /// safe relative name or resolves outside the storage directory.
    pub async fn lookup(&self, name: &str) -> Result<StoredFile> {
        validate_stored_name(name)?;

        let not_found = || SecureUploadError::NotFound {
            name: name.to_string(),
        };

        let base = self.storage_directory();
        if !fs::metadata(base).await.is_ok_and(|m| m.is_dir()) {
            return Err(not_found());
        }

        let file_name = Path::new(name)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or_default();
        if is_staging_name(file_name) {
            return Err(not_found());
        }

        let path = base.join(name);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(not_found());
        }

        validate_path_within_sandbox(&path, base)?;

        if !fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
            return Err(not_found());
        }

        Ok(StoredFile {
            name: name.to_string(),
            path,
        })
    }

    /// Open a stored file for reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub async fn open(&self, path: &Path) -> Result<fs::File> {
        fs::File::open(path)
            .await
            .map_err(|e| SecureUploadError::storage("open", path, e))
    }
}

impl std::fmt::Debug for StorageOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageOperator")
            .field("storage_directory", &self.storage_directory())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::StaticConfiguration;

    fn operator(dir: &Path, max: u64) -> StorageOperator {
        let config = StaticConfiguration::builder()
            .storage_directory(dir)
            .max_file_size(max)
            .build();
        StorageOperator::new(Arc::new(config))
    }

    #[tokio::test]
    async fn test_write_and_commit() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let storage = operator(temp_dir.path(), 16);

        let mut reader: &[u8] = b"0123456789";
        let staged = storage.write_bounded(&mut reader).await?;
        assert_eq!(staged.size(), 10);
        assert!(storage.list().await?.is_empty());

        let stored = storage.commit(staged, "digits.txt").await?;
        assert_eq!(stored.name(), "digits.txt");
        assert_eq!(fs::read(stored.path()).await?, b"0123456789");

        let listed = storage.list().await?;
        assert_eq!(listed, vec![stored]);
        Ok(())
    }

    #[tokio::test]
    async fn test_size_boundary() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let storage = operator(temp_dir.path(), 8);

        let mut exact: &[u8] = &[7u8; 8];
        let staged = storage.write_bounded(&mut exact).await?;
        assert_eq!(staged.size(), 8);
        staged.discard().await;

        let mut over: &[u8] = &[7u8; 9];
        let err = storage.write_bounded(&mut over).await.unwrap_err();
        assert!(matches!(err, SecureUploadError::SizeExceeded { max_bytes: 8 }));

        assert_eq!(std::fs::read_dir(temp_dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_stage_is_removed() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let storage = operator(temp_dir.path(), 64);

        let mut reader: &[u8] = b"partial";
        let staged = storage.write_bounded(&mut reader).await?;
        let staged_path = staged.path().to_path_buf();
        assert!(staged_path.exists());
        assert!(is_staging_name(
            staged_path.file_name().and_then(|f| f.to_str()).unwrap_or_default()
        ));

        drop(staged);
        assert!(!staged_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_read_error_leaves_nothing() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let storage = operator(temp_dir.path(), 64);

        let mut reader = tokio_test::io::Builder::new()
            .read(b"some bytes")
            .read_error(std::io::Error::other("connection reset"))
            .build();
        let err = storage.write_bounded(&mut reader).await.unwrap_err();
        assert!(matches!(err, SecureUploadError::Storage { operation: "write", .. }));
        assert_eq!(std::fs::read_dir(temp_dir.path())?.count(), 0);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_created_directory_is_private() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir()?;
        let dir = temp_dir.path().join("uploads");
        let storage = operator(&dir, 64);

        let mut reader: &[u8] = b"x";
        let staged = storage.write_bounded(&mut reader).await?;
        let mode = std::fs::metadata(&dir)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        storage.harden_permissions(staged.path()).await?;
        let mode = std::fs::metadata(staged.path())?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_is_recursive_and_skips_staging()
    -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let storage = operator(temp_dir.path(), 64);

        std::fs::create_dir_all(temp_dir.path().join("nested/deeper"))?;
        std::fs::write(temp_dir.path().join("a.png"), "a")?;
        std::fs::write(temp_dir.path().join("nested/deeper/b.png"), "b")?;
        std::fs::write(temp_dir.path().join(".upload-abc.partial"), "staging")?;

        let names: Vec<String> = storage
            .list()
            .await?
            .into_iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["a.png".to_string(), "nested/deeper/b.png".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_empty() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let temp_dir = tempfile::tempdir()?;
        let storage = operator(&temp_dir.path().join("never-created"), 64);
        assert!(storage.list().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_lookup() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let storage = operator(temp_dir.path(), 64);
        std::fs::write(temp_dir.path().join("present.png"), "p")?;
        std::fs::write(temp_dir.path().join(".upload-abc.partial"), "staging")?;

        let found = storage.lookup("present.png").await?;
        assert_eq!(found.path(), temp_dir.path().join("present.png"));

        assert!(matches!(
            storage.lookup("missing.png").await,
            Err(SecureUploadError::NotFound { .. })
        ));
        assert!(matches!(
            storage.lookup(".upload-abc.partial").await,
            Err(SecureUploadError::NotFound { .. })
        ));
        assert!(matches!(
            storage.lookup("../outside").await,
            Err(SecureUploadError::PathValidation { .. })
        ));
        assert!(matches!(
            storage.lookup("/etc/passwd").await,
            Err(SecureUploadError::PathValidation { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_lookup_without_directory_is_not_found()
    -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let storage = operator(&temp_dir.path().join("missing"), 64);
        assert!(matches!(
            storage.lookup("any.png").await,
            Err(SecureUploadError::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_replaces_existing() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let storage = operator(temp_dir.path(), 64);

        let mut first: &[u8] = b"first";
        let staged = storage.write_bounded(&mut first).await?;
        storage.commit(staged, "same.txt").await?;

        let mut second: &[u8] = b"second";
        let staged = storage.write_bounded(&mut second).await?;
        let stored = storage.commit(staged, "same.txt").await?;

        assert_eq!(fs::read(stored.path()).await?, b"second");
        assert_eq!(storage.list().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_rejects_nested_name() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let storage = operator(temp_dir.path(), 64);

        let mut reader: &[u8] = b"data";
        let staged = storage.write_bounded(&mut reader).await?;
        assert!(storage.commit(staged, "sub/name.txt").await.is_err());
        assert_eq!(std::fs::read_dir(temp_dir.path())?.count(), 0);
        Ok(())
    }
}
