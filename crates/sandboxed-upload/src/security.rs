//! Security utilities for path validation, ownership and permissions.

use crate::error::{Result, SecureUploadError};
use std::path::{Component, Path, PathBuf};

/// Sets secure permissions on a directory (Unix only).
pub async fn set_secure_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        tokio::fs::set_permissions(path, perms)
            .await
            .map_err(|e| SecureUploadError::storage("set directory permissions", path, e))?;
    }

    #[cfg(not(unix))]
    {
        tracing::warn!(
            "Directory permission hardening not supported on this platform, skipping {:?}",
            path
        );
    }

    Ok(())
}

/// Restricts a stored file to owner read and write.
///
/// Returns `false` when the platform has no POSIX permission model and the
/// step was skipped.
pub async fn restrict_file_permissions(path: &Path) -> Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(path, perms)
            .await
            .map_err(|e| SecureUploadError::storage("set file permissions", path, e))?;
        Ok(true)
    }

    #[cfg(not(unix))]
    {
        tracing::warn!(
            "POSIX permissions not supported on this platform, execute bit not stripped for {:?}",
            path
        );
        Ok(false)
    }
}

/// Validates a caller supplied stored-file name before it touches the filesystem.
pub fn validate_stored_name(name: &str) -> Result<()> {
    let reject = |reason: &str| SecureUploadError::PathValidation {
        path: PathBuf::from(name),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(reject("Name cannot be empty"));
    }

    if name.contains('\0') {
        return Err(reject("Name contains null bytes"));
    }

    let path = Path::new(name);
    if path.is_absolute() || name.starts_with(['/', '\\']) {
        return Err(reject("Absolute paths not allowed"));
    }

    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        || name.split(['/', '\\']).any(|segment| segment == "..")
    {
        return Err(reject("Parent directory components not allowed"));
    }

    Ok(())
}

/// Validates that a resolved path is within the specified sandbox directory.
/// Uses OS path resolution to handle symlinks, .., ., etc. properly.
pub fn validate_path_within_sandbox(resolved_path: &Path, sandbox_base: &Path) -> Result<()> {
    let canonical_base =
        sandbox_base
            .canonicalize()
            .map_err(|e| SecureUploadError::PathValidation {
                path: sandbox_base.to_path_buf(),
                reason: format!("Failed to resolve storage directory: {e}"),
            })?;

    let canonical_path =
        resolved_path
            .canonicalize()
            .map_err(|e| SecureUploadError::PathValidation {
                path: resolved_path.to_path_buf(),
                reason: format!("Failed to resolve path: {e}"),
            })?;

    if !canonical_path.starts_with(&canonical_base) {
        return Err(SecureUploadError::PathValidation {
            path: resolved_path.to_path_buf(),
            reason: format!(
                "Path escapes storage directory: resolves to '{}' (outside '{}')",
                canonical_path.display(),
                canonical_base.display()
            ),
        });
    }

    Ok(())
}

/// Looks up the numeric user id of `owner` through the system user database.
#[cfg(unix)]
pub fn resolve_owner(owner: &str) -> Option<u32> {
    const MAX_BUFFER: usize = 1 << 20;

    let name = std::ffi::CString::new(owner).ok()?;
    let mut buffer_len = 1024;

    loop {
        let mut buffer: Vec<libc::c_char> = vec![0; buffer_len];
        // SAFETY: passwd is a plain C struct; all-zero is a valid value for it.
        let mut entry: libc::passwd = unsafe { std::mem::zeroed() };
        let mut found: *mut libc::passwd = std::ptr::null_mut();

        // SAFETY: every pointer refers to a live local of the advertised size,
        // and `entry` is only read when `found` points at it.
        let rc = unsafe {
            libc::getpwnam_r(
                name.as_ptr(),
                &mut entry,
                buffer.as_mut_ptr(),
                buffer.len(),
                &mut found,
            )
        };

        if rc == libc::ERANGE && buffer_len < MAX_BUFFER {
            buffer_len *= 2;
            continue;
        }

        if rc != 0 || found.is_null() {
            return None;
        }

        return Some(entry.pw_uid);
    }
}

#[cfg(not(unix))]
pub fn resolve_owner(_owner: &str) -> Option<u32> {
    None
}

/// Makes `owner` the owner of `path`.
///
/// Failing to resolve the principal is an error, never a silent skip.
pub async fn assign_owner(path: &Path, owner: &str) -> Result<()> {
    let target = path.to_path_buf();
    let principal = owner.to_string();

    tokio::task::spawn_blocking(move || change_owner(&target, &principal))
        .await
        .map_err(|e| SecureUploadError::storage("assign owner", path, std::io::Error::other(e)))?
}

#[cfg(unix)]
fn change_owner(path: &Path, owner: &str) -> Result<()> {
    let uid = resolve_owner(owner).ok_or_else(|| SecureUploadError::OwnerNotResolved {
        owner: owner.to_string(),
    })?;

    std::os::unix::fs::chown(path, Some(uid), None)
        .map_err(|e| SecureUploadError::storage("assign owner", path, e))?;

    tracing::debug!("Assigned owner {} (uid {}) to {:?}", owner, uid, path);
    Ok(())
}

#[cfg(not(unix))]
fn change_owner(_path: &Path, owner: &str) -> Result<()> {
    Err(SecureUploadError::OwnerNotResolved {
        owner: owner.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_stored_name() {
        assert!(validate_stored_name("file.png").is_ok());
        assert!(validate_stored_name("nested/file.png").is_ok());
        assert!(validate_stored_name("./file.png").is_ok());

        assert!(validate_stored_name("").is_err());
        assert!(validate_stored_name("file\0.png").is_err());
        assert!(validate_stored_name("/etc/passwd").is_err());
        assert!(validate_stored_name("../outside.png").is_err());
        assert!(validate_stored_name("nested/../../outside.png").is_err());
        assert!(validate_stored_name("..\\outside.png").is_err());
    }

    #[tokio::test]
    async fn test_validate_path_within_sandbox() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();

        let test_file = base.join("test.png");
        std::fs::write(&test_file, "test content").unwrap();
        assert!(validate_path_within_sandbox(&test_file, base).is_ok());

        let outside_temp = tempfile::tempdir().unwrap();
        let outside_file = outside_temp.path().join("outside.png");
        std::fs::write(&outside_file, "outside content").unwrap();
        assert!(validate_path_within_sandbox(&outside_file, base).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let outside_temp = tempfile::tempdir().unwrap();
        let outside_file = outside_temp.path().join("secret.png");
        std::fs::write(&outside_file, "secret").unwrap();

        let link = temp_dir.path().join("link.png");
        std::os::unix::fs::symlink(&outside_file, &link).unwrap();

        assert!(validate_path_within_sandbox(&link, temp_dir.path()).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_permissions_restricted() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("stored.png");
        std::fs::write(&file, "content").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(restrict_file_permissions(&file).await.unwrap());
        let mode = std::fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_owner() {
        assert_eq!(resolve_owner("root"), Some(0));
        assert_eq!(resolve_owner("no-such-user-7f3a9c"), None);
        assert_eq!(resolve_owner("bad\0name"), None);
    }

    #[tokio::test]
    async fn test_unknown_owner_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("stored.png");
        std::fs::write(&file, "content").unwrap();

        let err = assign_owner(&file, "no-such-user-7f3a9c").await.unwrap_err();
        assert!(matches!(err, SecureUploadError::OwnerNotResolved { .. }));
    }
}
