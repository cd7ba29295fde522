//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for blob operations across different backends (local
//! filesystem, in-memory for tests).

mod local;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use self::local::LocalBackend;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockBackend;
use crate::error::{Error, Result};
use crate::file::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::io::AsyncWrite;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;
pub type BoxAsyncWrite = Box<dyn AsyncWrite + Send + Unpin + 'static>;

/// Unified interface for blob storage backends.
///
/// All storage operations are asynchronous; model payloads are routinely
/// hundreds of megabytes and arrive over the network.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations should
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use modelhub_storage::{backend::StorageBackend, error::Result};
///
/// async fn cached_size(backend: &dyn StorageBackend) -> Result<u64> {
///     let path = Path::new("models/org/m/v1/w.bin");
///     if backend.exists(path).await? {
///         Ok(backend.stat(path).await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend (used for logging only).
    fn name(&self) -> &str;

    /// List all files matching an optional prefix.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream file metadata matching an optional prefix.
    ///
    /// Prefix matching is component-based: `models/org` matches
    /// `models/org/m/v1/w.bin` but not `models/organisation/...`. A prefix
    /// that doesn't exist yields an empty stream, not an error.
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Total bytes stored under an optional prefix.
    ///
    /// This is the "estimate" used for quota admission. The default sums a
    /// listing; backends with a cheaper source of truth should override it.
    async fn usage(&self, prefix: Option<&Path>) -> Result<u64> {
        self.list_stream(prefix)
            .try_fold(0u64, |total, info| async move { Ok::<_, Error>(total.saturating_add(info.size)) })
            .await
    }

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file contents.
    ///
    /// Creates a new file or overwrites an existing file with the provided
    /// data. Implementations should create parent directories as needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Open a file for streaming writes, creating or truncating it.
    ///
    /// # Notes
    /// - Implementations should create parent directories as needed.
    /// - Callers must `shutdown()` the writer once done. Some backends
    ///   (the mock) buffer everything and only commit on shutdown.
    async fn writer(&self, path: &Path) -> Result<BoxAsyncWrite>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Move a file, replacing whatever is at `to`.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if `from` does
    /// not exist. Implementations should create parent directories as needed.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Recursively delete everything under a directory.
    ///
    /// Deleting a directory that doesn't exist is not an error.
    async fn delete_dir(&self, path: &Path) -> Result<()>;

    /// Get file metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;

    /// Resolve a storage path to a path on the local filesystem, if this
    /// backend has one. Consumers that hand files to native code (inference
    /// runtimes) need this.
    fn local_path(&self, _path: &Path) -> Option<PathBuf> {
        None
    }
}
