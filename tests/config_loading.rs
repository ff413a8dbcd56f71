//! Loading configuration sources from disk.

use sandboxed_upload::{ConfigurationProvider, NamingMode, UploadStrategy};
use secure_upload::config::{UploadConfig, defaults};
use std::path::PathBuf;

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn test_missing_sources_use_defaults() -> TestResult {
    let temp_dir = tempfile::tempdir()?;
    let config = UploadConfig::load(
        &temp_dir.path().join("absent.toml"),
        &temp_dir.path().join("absent-whitelist.toml"),
    );

    assert_eq!(config.policy.max_file_size, 10 * 1024 * 1024);
    assert_eq!(
        config.policy.storage_directory,
        PathBuf::from(defaults::DEFAULT_STORAGE_DIRECTORY)
    );
    assert_eq!(config.policy.naming_mode, NamingMode::Secure);
    assert!(config.policy.storage_owner.is_none());
    assert_eq!(config.strategy, UploadStrategy::PostValidate);
    assert!(config.whitelist.is_empty());
    Ok(())
}

#[test]
fn test_sources_loaded_from_files() -> TestResult {
    let temp_dir = tempfile::tempdir()?;
    let policy_file = temp_dir.path().join("secure-upload.toml");
    let whitelist_file = temp_dir.path().join("secure-upload-whitelist.toml");

    std::fs::write(
        &policy_file,
        r#"
max_file_size = "1KiB"
storage_directory = "files"
naming_mode = "ORIGINAL"
upload_strategy = "pre-validate"
"#,
    )?;
    std::fs::write(
        &whitelist_file,
        r#"
"image/jpeg" = "jpg, jpeg"
"text/plain" = "  "
"#,
    )?;

    let config = UploadConfig::load(&policy_file, &whitelist_file);
    let provider = config.provider();

    assert_eq!(provider.max_file_size(), 1024);
    assert_eq!(provider.storage_directory(), std::path::Path::new("files"));
    assert_eq!(provider.naming_mode(), NamingMode::Original);
    assert_eq!(config.strategy, UploadStrategy::PreValidate);
    assert_eq!(
        provider.extensions_for("image/jpeg"),
        Some(&["jpg".to_string(), "jpeg".to_string()][..])
    );
    assert!(!provider.has_content_type("text/plain"));
    Ok(())
}

#[test]
fn test_malformed_sources_degrade() -> TestResult {
    let temp_dir = tempfile::tempdir()?;
    let policy_file = temp_dir.path().join("policy.toml");
    let whitelist_file = temp_dir.path().join("whitelist.toml");

    std::fs::write(&policy_file, "max_file_size = -5\nnaming_mode = \"SHOUTY\"\n")?;
    std::fs::write(&whitelist_file, "this is [not toml")?;

    let config = UploadConfig::load(&policy_file, &whitelist_file);
    assert_eq!(config.policy.max_file_size, defaults::DEFAULT_MAX_FILE_SIZE);
    assert_eq!(config.policy.naming_mode, NamingMode::Secure);
    assert!(config.whitelist.is_empty());
    Ok(())
}

#[test]
fn test_unreadable_source_degrades() -> TestResult {
    let temp_dir = tempfile::tempdir()?;
    // A directory exists but cannot be read as a file.
    let config = UploadConfig::load(temp_dir.path(), temp_dir.path());
    assert_eq!(config.policy.max_file_size, defaults::DEFAULT_MAX_FILE_SIZE);
    assert!(config.whitelist.is_empty());
    Ok(())
}
