//! Loading of the upload policy and the content-type whitelist.
//!
//! Both sources are TOML files and both are optional. Every field is
//! resolved on its own: a missing file, a syntax error or a malformed value
//! logs a warning and falls back to the default for the affected fields
//! only. Loading never fails.
//!
//! Policy source:
//!
//! ```toml
//! max_file_size = "10MB"          # or an integer number of bytes
//! storage_directory = "uploadedfiles"
//! naming_mode = "SECURE"          # or "ORIGINAL"
//! storage_owner = "www-data"      # optional
//! upload_strategy = "post-validate"
//! ```
//!
//! Whitelist source, one key per content type:
//!
//! ```toml
//! "image/png" = "png"
//! "image/jpeg" = ["jpg", "jpeg"]
//! "application/msword" = "doc, dot"
//! ```

pub mod defaults;

use crate::utils::parse_byte_size;
use anyhow::{Context, Result};
use sandboxed_upload::{NamingMode, StaticConfiguration, UploadPolicy, UploadStrategy, Whitelist};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Raw policy file. Values stay untyped so each can degrade on its own.
#[derive(Debug, Default, Deserialize)]
struct PolicySource {
    max_file_size: Option<toml::Value>,
    storage_directory: Option<toml::Value>,
    naming_mode: Option<toml::Value>,
    storage_owner: Option<toml::Value>,
    upload_strategy: Option<toml::Value>,
    #[serde(flatten)]
    unknown: toml::Table,
}

/// Fully resolved application configuration.
#[derive(Debug, Clone, Default)]
pub struct UploadConfig {
    pub policy: UploadPolicy,
    pub whitelist: Whitelist,
    pub strategy: UploadStrategy,
}

impl UploadConfig {
    /// Load both sources. Missing or malformed input falls back to defaults.
    pub fn load(config_file: &Path, whitelist_file: &Path) -> Self {
        let (policy, strategy) = match read_source(config_file) {
            Ok(Some(contents)) => Self::policy_from_toml(&contents, config_file),
            Ok(None) => {
                info!(
                    "Policy file {} not found, using defaults",
                    config_file.display()
                );
                (UploadPolicy::default(), UploadStrategy::default())
            }
            Err(e) => {
                warn!("{:#}, using default policy", e);
                (UploadPolicy::default(), UploadStrategy::default())
            }
        };

        let whitelist = match read_source(whitelist_file) {
            Ok(Some(contents)) => Self::whitelist_from_toml(&contents, whitelist_file),
            Ok(None) => {
                warn!(
                    "Whitelist file {} not found, no content types are permitted",
                    whitelist_file.display()
                );
                Whitelist::default()
            }
            Err(e) => {
                warn!("{:#}, no content types are permitted", e);
                Whitelist::default()
            }
        };

        info!(
            "Upload policy: max_file_size={} storage_directory={} naming_mode={} owner={:?} strategy={} whitelisted_types={}",
            policy.max_file_size,
            policy.storage_directory.display(),
            policy.naming_mode,
            policy.storage_owner,
            strategy,
            whitelist.len()
        );

        Self {
            policy,
            whitelist,
            strategy,
        }
    }

    /// Resolve the policy from TOML text. `origin` is only used in log messages.
    pub fn policy_from_toml(contents: &str, origin: &Path) -> (UploadPolicy, UploadStrategy) {
        let source: PolicySource = match toml::from_str(contents) {
            Ok(source) => source,
            Err(e) => {
                warn!(
                    "Failed to parse policy file {}: {}, using defaults",
                    origin.display(),
                    e
                );
                PolicySource::default()
            }
        };

        for key in source.unknown.keys() {
            warn!("Ignoring unknown policy key '{}' in {}", key, origin.display());
        }

        let mut policy = UploadPolicy::default();

        if let Some(value) = source.max_file_size {
            match parse_max_file_size(&value) {
                Ok(bytes) => policy = policy.max_file_size(bytes),
                Err(reason) => warn!(
                    "Invalid max_file_size {}: {}, using default {}",
                    value, reason, policy.max_file_size
                ),
            }
        }

        if let Some(value) = source.storage_directory {
            match value.as_str().map(str::trim) {
                Some(dir) if !dir.is_empty() => policy = policy.storage_directory(PathBuf::from(dir)),
                _ => warn!(
                    "Invalid storage_directory {}, using default {}",
                    value,
                    policy.storage_directory.display()
                ),
            }
        }

        if let Some(value) = source.naming_mode {
            match value.as_str().map(str::parse::<NamingMode>) {
                Some(Ok(mode)) => policy = policy.naming_mode(mode),
                Some(Err(reason)) => warn!("{}, using {}", reason, NamingMode::default()),
                None => warn!("Invalid naming_mode {}, using {}", value, NamingMode::default()),
            }
        }

        if let Some(value) = source.storage_owner {
            match value.as_str() {
                Some(owner) => policy = policy.storage_owner(Some(owner)),
                None => warn!("Invalid storage_owner {}, no owner will be assigned", value),
            }
        }

        let strategy = match source.upload_strategy {
            Some(value) => match value.as_str().map(str::parse::<UploadStrategy>) {
                Some(Ok(strategy)) => strategy,
                Some(Err(reason)) => {
                    warn!("{}, using {}", reason, UploadStrategy::default());
                    UploadStrategy::default()
                }
                None => {
                    warn!("Invalid upload_strategy {}, using {}", value, UploadStrategy::default());
                    UploadStrategy::default()
                }
            },
            None => UploadStrategy::default(),
        };

        debug!("Policy resolved from {}", origin.display());
        (policy, strategy)
    }

    /// Resolve the whitelist from TOML text. `origin` is only used in log messages.
    pub fn whitelist_from_toml(contents: &str, origin: &Path) -> Whitelist {
        let table: toml::Table = match toml::from_str(contents) {
            Ok(table) => table,
            Err(e) => {
                warn!(
                    "Failed to parse whitelist file {}: {}, no content types are permitted",
                    origin.display(),
                    e
                );
                return Whitelist::default();
            }
        };

        let mut whitelist = Whitelist::new();
        for (content_type, value) in &table {
            match value {
                toml::Value::String(list) => {
                    whitelist.insert_list(content_type, list);
                }
                toml::Value::Array(items) => {
                    let extensions: Vec<&str> = items
                        .iter()
                        .filter_map(|item| {
                            let ext = item.as_str();
                            if ext.is_none() {
                                warn!(
                                    "Ignoring non-string extension {} for content type '{}'",
                                    item, content_type
                                );
                            }
                            ext
                        })
                        .collect();
                    whitelist.insert(content_type, extensions);
                }
                other => warn!(
                    "Invalid extensions {} for content type '{}'. Content type not permitted.",
                    other, content_type
                ),
            }
        }

        debug!(
            "Whitelist resolved from {}: {} content types",
            origin.display(),
            whitelist.len()
        );
        whitelist
    }

    /// Freeze into the provider consumed by the upload pipeline.
    #[must_use]
    pub fn provider(&self) -> StaticConfiguration {
        StaticConfiguration::new(self.policy.clone(), self.whitelist.clone())
    }
}

/// Read a configuration source. `Ok(None)` when the file does not exist.
fn read_source(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Some(contents))
}

fn parse_max_file_size(value: &toml::Value) -> std::result::Result<u64, String> {
    let bytes = match value {
        toml::Value::Integer(n) => u64::try_from(*n).map_err(|_| format!("{n} is negative"))?,
        toml::Value::String(s) => parse_byte_size(s)?,
        other => return Err(format!("expected bytes or a size string, got {}", other.type_str())),
    };

    if bytes == 0 {
        return Err("size must be positive".to_string());
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> &'static Path {
        Path::new("test.toml")
    }

    #[test]
    fn test_full_policy() {
        let (policy, strategy) = UploadConfig::policy_from_toml(
            r#"
                max_file_size = "512KiB"
                storage_directory = "/srv/uploads"
                naming_mode = "original"
                storage_owner = " www-data "
                upload_strategy = "pre-validate"
            "#,
            origin(),
        );

        assert_eq!(policy.max_file_size, 512 * 1024);
        assert_eq!(policy.storage_directory, PathBuf::from("/srv/uploads"));
        assert_eq!(policy.naming_mode, NamingMode::Original);
        assert_eq!(policy.storage_owner.as_deref(), Some("www-data"));
        assert_eq!(strategy, UploadStrategy::PreValidate);
    }

    #[test]
    fn test_fields_degrade_independently() {
        let (policy, strategy) = UploadConfig::policy_from_toml(
            r#"
                max_file_size = -5
                storage_directory = "kept"
                naming_mode = "RANDOM"
                upload_strategy = 3
            "#,
            origin(),
        );

        assert_eq!(policy.max_file_size, defaults::DEFAULT_MAX_FILE_SIZE);
        assert_eq!(policy.storage_directory, PathBuf::from("kept"));
        assert_eq!(policy.naming_mode, NamingMode::Secure);
        assert_eq!(strategy, UploadStrategy::PostValidate);
    }

    #[test]
    fn test_unparsable_policy_uses_defaults() {
        let (policy, strategy) = UploadConfig::policy_from_toml("max_file_size = = 1", origin());
        assert_eq!(policy, UploadPolicy::default());
        assert_eq!(strategy, UploadStrategy::default());
    }

    #[test]
    fn test_max_file_size_forms() {
        assert_eq!(parse_max_file_size(&toml::Value::Integer(2048)), Ok(2048));
        assert_eq!(parse_max_file_size(&toml::Value::String("1KiB".into())), Ok(1024));
        assert!(parse_max_file_size(&toml::Value::Integer(0)).is_err());
        assert!(parse_max_file_size(&toml::Value::Boolean(true)).is_err());
    }

    #[test]
    fn test_whitelist_forms() {
        let whitelist = UploadConfig::whitelist_from_toml(
            r#"
                "image/jpeg" = "jpg, jpeg"
                "image/png" = ["png", 7, " PNG "]
                "text/plain" = "  "
                "application/pdf" = 12
            "#,
            origin(),
        );

        assert_eq!(
            whitelist.extensions_for("image/jpeg"),
            Some(&["jpg".to_string(), "jpeg".to_string()][..])
        );
        assert_eq!(
            whitelist.extensions_for("image/png"),
            Some(&["png".to_string(), "PNG".to_string()][..])
        );
        assert!(!whitelist.contains("text/plain"));
        assert!(!whitelist.contains("application/pdf"));
        assert_eq!(whitelist.len(), 2);
    }
}
