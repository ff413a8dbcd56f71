//! Utility modules for the secure-upload application

pub mod human_format;

pub use human_format::{format_bytes, parse_byte_size};
