//! Configuration default values
//!
//! Policy defaults live in `sandboxed_upload::policy` and are re-exported
//! here so every default is reachable from one place.
pub use sandboxed_upload::{DEFAULT_MAX_FILE_SIZE, DEFAULT_STORAGE_DIRECTORY};

// Configuration sources
pub const DEFAULT_CONFIG_FILE: &str = "secure-upload.toml";
pub const DEFAULT_WHITELIST_FILE: &str = "secure-upload-whitelist.toml";
pub const CONFIG_FILE_ENV: &str = "SECURE_UPLOAD_CONFIG";
pub const WHITELIST_FILE_ENV: &str = "SECURE_UPLOAD_WHITELIST";

// Logging
pub const DEFAULT_LOG_LEVEL: &str = "info";
