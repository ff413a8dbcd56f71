//! Storage name generation from untrusted user file names.
//!
//! Both naming modes re-append a validated extension and a second
//! resolution timestamp (`YYYYMMDDHHMMSS`, local time). In ORIGINAL mode two
//! uploads of the same name within one second produce the same storage
//! name and the later one replaces the earlier.

use crate::error::{Result, SecureUploadError};
use crate::policy::NamingMode;
use chrono::Local;
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

const BASE_NAME_PATTERN: &str = r"^[\p{L}\p{N}\p{Zs}\p{Pd}\p{Pc}]{1,50}$";
const EXTENSION_PATTERN: &str = r"^[\p{L}\p{N}]{1,4}$";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

fn base_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(BASE_NAME_PATTERN).expect("base name pattern is valid"))
}

fn extension_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(EXTENSION_PATTERN).expect("extension pattern is valid"))
}

/// Strip any directory prefix, accepting both `/` and `\` separators.
fn file_name_part(name: &str) -> &str {
    name.rfind(['/', '\\']).map_or(name, |idx| &name[idx + 1..])
}

/// Split a bare file name into base name and extension at the last dot.
fn split_extension(name: &str) -> (&str, &str) {
    let file_name = file_name_part(name);
    file_name
        .rfind('.')
        .map_or((file_name, ""), |idx| (&file_name[..idx], &file_name[idx + 1..]))
}

/// Extract and validate the extension of `file_name`.
///
/// The extension must be 1 to 4 letters or digits, so names without an
/// extension are rejected.
pub fn file_extension(file_name: &str) -> Result<&str> {
    let (_, extension) = split_extension(file_name);
    if extension_regex().is_match(extension) {
        Ok(extension)
    } else if extension.is_empty() {
        Err(SecureUploadError::invalid_name(file_name, "missing extension"))
    } else {
        Err(SecureUploadError::invalid_name(
            file_name,
            "extension must be 1-4 letters or digits",
        ))
    }
}

/// Extract and validate the base name (name without extension) of `file_name`.
///
/// Letters, digits, spaces, dashes and connector punctuation only, 1 to 50
/// characters. Violations are rejected rather than rewritten.
pub fn sanitized_base_name(file_name: &str) -> Result<&str> {
    let (base, _) = split_extension(file_name);
    if base_name_regex().is_match(base) {
        Ok(base)
    } else {
        Err(SecureUploadError::invalid_name(
            file_name,
            "base name must be 1-50 letters, digits, spaces, dashes or underscores",
        ))
    }
}

/// A validated storage name and the extension it ends with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedName {
    pub file_name: String,
    pub extension: String,
}

/// Derives storage names according to a [`NamingMode`].
#[derive(Debug, Clone, Copy)]
pub struct NameGenerator {
    mode: NamingMode,
}

impl NameGenerator {
    #[must_use]
    pub const fn new(mode: NamingMode) -> Self {
        Self { mode }
    }

    #[must_use]
    pub const fn mode(&self) -> NamingMode {
        self.mode
    }

    /// Generate a storage name for the user supplied `file_name`.
    ///
    /// # Errors
    /// Returns [`SecureUploadError::InvalidFileName`] when the base name or
    /// the extension fails validation.
    pub fn generate(&self, file_name: &str) -> Result<GeneratedName> {
        let base = sanitized_base_name(file_name)?;
        let extension = file_extension(file_name)?;
        let timestamp = Local::now().format(TIMESTAMP_FORMAT);

        let file_name = match self.mode {
            NamingMode::Original => format!("{base}_{timestamp}.{extension}"),
            NamingMode::Secure => format!("{}_{timestamp}.{extension}", Uuid::new_v4().simple()),
        };

        Ok(GeneratedName {
            file_name,
            extension: extension.to_string(),
        })
    }
}
