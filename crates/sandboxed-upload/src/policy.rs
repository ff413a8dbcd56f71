//! Upload policy, content-type whitelist and the configuration contract.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default maximum upload size: 10 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Default storage directory, relative to the working directory.
pub const DEFAULT_STORAGE_DIRECTORY: &str = "uploadedfiles";

/// How stored file names are derived from the user supplied name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NamingMode {
    /// Sanitized original base name plus a timestamp
    Original,
    /// Random UUID plus a timestamp
    #[default]
    Secure,
}

impl NamingMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Original => "ORIGINAL",
            Self::Secure => "SECURE",
        }
    }
}

impl fmt::Display for NamingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NamingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ORIGINAL" => Ok(Self::Original),
            "SECURE" => Ok(Self::Secure),
            other => Err(format!("unknown naming mode '{other}'")),
        }
    }
}

/// Scalar storage policy. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPolicy {
    /// Largest accepted upload in bytes
    pub max_file_size: u64,
    /// Directory receiving stored files
    pub storage_directory: PathBuf,
    /// Naming strategy for stored files
    pub naming_mode: NamingMode,
    /// Principal that must own stored files, if any
    pub storage_owner: Option<String>,
}

impl UploadPolicy {
    /// Create a policy with the defaults: 10 MiB, `uploadedfiles`, SECURE naming, no owner.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            storage_directory: PathBuf::from(DEFAULT_STORAGE_DIRECTORY),
            naming_mode: NamingMode::Secure,
            storage_owner: None,
        }
    }

    /// Set the maximum file size. Zero is ignored.
    #[must_use]
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        if bytes > 0 {
            self.max_file_size = bytes;
        } else {
            tracing::warn!("Ignoring non-positive maximum file size, keeping {}", self.max_file_size);
        }
        self
    }

    /// Set the storage directory.
    #[must_use]
    pub fn storage_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_directory = path.into();
        self
    }

    /// Set the naming mode.
    #[must_use]
    pub const fn naming_mode(mut self, mode: NamingMode) -> Self {
        self.naming_mode = mode;
        self
    }

    /// Require stored files to be owned by `owner`. Blank names clear the requirement.
    #[must_use]
    pub fn storage_owner(mut self, owner: Option<impl Into<String>>) -> Self {
        self.storage_owner = owner
            .map(Into::into)
            .map(|o: String| o.trim().to_string())
            .filter(|o| !o.is_empty());
        self
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Content type to allowed extensions mapping.
///
/// Extensions keep their configured order and case. Content types without
/// any extension are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    entries: BTreeMap<String, Vec<String>>,
}

impl Whitelist {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `content_type` with `extensions`, trimming blanks and duplicates.
    ///
    /// Returns `false` and leaves the whitelist unchanged when no usable
    /// extension remains.
    pub fn insert<I, S>(&mut self, content_type: &str, extensions: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let content_type = content_type.trim();
        let mut allowed: Vec<String> = Vec::new();
        for ext in extensions {
            let ext = ext.as_ref().trim();
            if !ext.is_empty() && !allowed.iter().any(|a| a == ext) {
                allowed.push(ext.to_string());
            }
        }

        if content_type.is_empty() || allowed.is_empty() {
            tracing::warn!(
                "Extensions not configured for content type '{}'. Content type not permitted.",
                content_type
            );
            return false;
        }

        self.entries.insert(content_type.to_string(), allowed);
        true
    }

    /// Insert an entry whose extensions are given as a comma-separated list.
    pub fn insert_list(&mut self, content_type: &str, extensions: &str) -> bool {
        self.insert(content_type, extensions.split(','))
    }

    /// Builder-style variant of [`Whitelist::insert_list`].
    #[must_use]
    pub fn allow(mut self, content_type: &str, extensions: &str) -> Self {
        self.insert_list(content_type, extensions);
        self
    }

    #[must_use]
    pub fn extensions_for(&self, content_type: &str) -> Option<&[String]> {
        self.entries.get(content_type).map(Vec::as_slice)
    }

    #[must_use]
    pub fn contains(&self, content_type: &str) -> bool {
        self.entries.contains_key(content_type)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn content_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Read-only source of whitelist and policy data.
///
/// Implementations are fixed at construction; every accessor is a pure read.
pub trait ConfigurationProvider: Send + Sync + fmt::Debug {
    /// Allowed extensions for `content_type`, `None` when the type is not whitelisted.
    fn extensions_for(&self, content_type: &str) -> Option<&[String]>;

    fn has_content_type(&self, content_type: &str) -> bool {
        self.extensions_for(content_type).is_some()
    }

    fn max_file_size(&self) -> u64;

    fn storage_directory(&self) -> &Path;

    fn naming_mode(&self) -> NamingMode;

    fn storage_owner(&self) -> Option<&str>;
}

/// In-memory [`ConfigurationProvider`].
#[derive(Debug, Clone, Default)]
pub struct StaticConfiguration {
    policy: UploadPolicy,
    whitelist: Whitelist,
}

impl StaticConfiguration {
    #[must_use]
    pub const fn new(policy: UploadPolicy, whitelist: Whitelist) -> Self {
        Self { policy, whitelist }
    }

    #[must_use]
    pub fn builder() -> StaticConfigurationBuilder {
        StaticConfigurationBuilder::default()
    }

    #[must_use]
    pub const fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }
}

impl ConfigurationProvider for StaticConfiguration {
    fn extensions_for(&self, content_type: &str) -> Option<&[String]> {
        self.whitelist.extensions_for(content_type)
    }

    fn max_file_size(&self) -> u64 {
        self.policy.max_file_size
    }

    fn storage_directory(&self) -> &Path {
        &self.policy.storage_directory
    }

    fn naming_mode(&self) -> NamingMode {
        self.policy.naming_mode
    }

    fn storage_owner(&self) -> Option<&str> {
        self.policy.storage_owner.as_deref()
    }
}

/// Builder for [`StaticConfiguration`].
#[derive(Debug, Default)]
pub struct StaticConfigurationBuilder {
    policy: UploadPolicy,
    whitelist: Whitelist,
}

impl StaticConfigurationBuilder {
    #[must_use]
    pub fn policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.policy = self.policy.max_file_size(bytes);
        self
    }

    #[must_use]
    pub fn storage_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.policy = self.policy.storage_directory(path);
        self
    }

    #[must_use]
    pub fn naming_mode(mut self, mode: NamingMode) -> Self {
        self.policy = self.policy.naming_mode(mode);
        self
    }

    #[must_use]
    pub fn storage_owner(mut self, owner: impl Into<String>) -> Self {
        self.policy = self.policy.storage_owner(Some(owner));
        self
    }

    /// Whitelist `content_type` with a comma-separated extension list.
    #[must_use]
    pub fn allow(mut self, content_type: &str, extensions: &str) -> Self {
        self.whitelist.insert_list(content_type, extensions);
        self
    }

    #[must_use]
    pub fn whitelist(mut self, whitelist: Whitelist) -> Self {
        self.whitelist = whitelist;
        self
    }

    #[must_use]
    pub fn build(self) -> StaticConfiguration {
        StaticConfiguration::new(self.policy, self.whitelist)
    }
}
