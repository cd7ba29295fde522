//! Path validation and security utilities.
//!
//! Blob paths are derived from model names, revisions and file names that
//! arrive from remote URLs. Everything is funnelled through [`validate`]
//! before it touches a backend so that nothing escapes the storage root.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a storage path for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use modelhub_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("models/org/m/v1/w.bin").is_ok());
/// assert!(validate_path("models/org/m/main/onnx/model.onnx").is_ok());
/// assert!(validate_path("a/../w.bin").is_ok()); // (never leaves storage root)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err()); // (leaves storage root)
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("models/./org//m/../m/v1/w.bin/").unwrap(),
///     Path::new("models/org/m/v1/w.bin")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    // Use Rust's built-in path component parser for robust handling. Means we
    // don't have to deal with non-UTF8, or the maniacs on Unix that use
    // backslashes in their filenames.
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls. Reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Stricter than [`validate`]: the path must already be in its normalized
/// form. Remote-supplied file names are checked with this, since a name
/// that only becomes safe after normalization (`a/../b`) was never honest.
///
/// ```
/// use modelhub_storage::is_canonical_path;
/// assert!(is_canonical_path("onnx/model.onnx"));
/// assert!(!is_canonical_path("onnx/../model.onnx"));
/// assert!(!is_canonical_path("/model.onnx"));
/// assert!(!is_canonical_path("model.onnx/"));
/// ```
pub fn is_canonical(path: impl AsRef<str>) -> bool {
    let path = path.as_ref();
    match validate(path) {
        Ok(normalized) => normalized.to_str() == Some(path),
        Err(_) => false,
    }
}
