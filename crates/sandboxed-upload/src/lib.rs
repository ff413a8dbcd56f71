//! # Sandboxed Upload
//!
//! Validated, size-bounded storage of untrusted file uploads.
//!
//! An upload is only committed when its declared content type, the
//! extension of its file name and the type detected from its bytes all
//! agree with a configured whitelist. Everything else is rejected with a
//! single uniform error, and no partially written file is left where
//! [`SecureFileUploader::list`] or [`SecureFileUploader::get`] can see it.
//!
//! ## Features
//!
//! - **Whitelist Enforcement**: content type to extension mapping, checked for both
//!   the declared and the detected type
//! - **Magic Number Detection**: content sniffing via the `infer` crate, pluggable
//!   through [`ContentSniffer`]
//! - **Size Bounding**: streams are cut off one byte past the limit and rejected
//! - **Safe Naming**: user names are validated, never trusted; stored names are a
//!   timestamped base name or a random UUID
//! - **Staged Writes**: bytes land in a hidden staging file that is renamed on
//!   success and removed on any failure
//! - **Post-write Hardening**: optional owner assignment and owner-only permissions (Unix)
//! - **Two Strategies**: buffer-then-validate or write-then-validate
//!
//! ## Basic Usage
//!
//! ```rust
//! use sandboxed_upload::{
//!     InferSniffer, SecureFileUploader, StaticConfiguration, UploadRequest, UploadStrategy,
//!     build_uploader,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StaticConfiguration::builder()
//!     .storage_directory("/var/lib/myapp/uploads")
//!     .max_file_size(5 * 1024 * 1024)
//!     .allow("image/png", "png")
//!     .allow("image/jpeg", "jpg,jpeg")
//!     .build();
//!
//! let uploader = build_uploader(
//!     UploadStrategy::PostValidate,
//!     Arc::new(config),
//!     Arc::new(InferSniffer::new()),
//! );
//!
//! let file = tokio::fs::File::open("holiday.png").await?;
//! let stored = uploader
//!     .upload(UploadRequest::new(file, "holiday.png", "image/png"))
//!     .await?;
//! println!("Stored as {}", stored.name());
//!
//! // Re-validated against the current whitelist on every read
//! let again = uploader.get(stored.name()).await?;
//! # let _ = again;
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Content Detection
//!
//! ```rust
//! use sandboxed_upload::InferSniffer;
//!
//! let sniffer = InferSniffer::with_custom_matchers(|infer| {
//!     infer.add("application/x-custom", "cst", |buf| buf.starts_with(b"CUSTOM"));
//! })
//! .max_detection_bytes(4096);
//! assert_eq!(sniffer.detect_bytes(b"CUSTOM data"), "application/x-custom");
//! ```
//!
//! ## Security Features
//!
//! - **Uniform Rejection**: callers see `File not allowed`, the cause is only logged
//! - **Double Type Check**: the extension must be allowed for the detected *and*
//!   the declared type
//! - **Lookup Containment**: stored names with `..`, absolute paths or null bytes are
//!   refused, and symlinks must resolve inside the storage directory
//! - **Secure Permissions**: a storage directory created by the library is `0700`,
//!   stored files are `0600` (Unix)

pub mod error;
pub mod naming;
pub mod pipeline;
pub mod policy;
pub mod security;
pub mod sniffer;
pub mod storage;
pub mod validator;

pub use error::{ErrorKind, Result, SecureUploadError, UploadError, UploadResult};
pub use naming::{GeneratedName, NameGenerator};
pub use pipeline::{
    PostValidateUploader, PreValidateUploader, SecureFileUploader, UploadRequest, UploadStage,
    UploadStrategy, build_uploader,
};
pub use policy::{
    ConfigurationProvider, DEFAULT_MAX_FILE_SIZE, DEFAULT_STORAGE_DIRECTORY, NamingMode,
    StaticConfiguration, StaticConfigurationBuilder, UploadPolicy, Whitelist,
};
pub use sniffer::{ContentSniffer, InferSniffer, UNKNOWN_CONTENT_TYPE};
pub use storage::{StagedFile, StorageOperator, StoredFile};
pub use validator::{RequestValidator, ValidationOutcome};
