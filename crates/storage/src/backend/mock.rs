//! In-memory storage backend for testing.

use super::{BoxAsyncWrite, FileInfoStream};
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::task::{Context, Poll};
use time::UtcDateTime;
use tokio::io::AsyncWrite;

type Files = HashMap<PathBuf, (UtcDateTime, Vec<u8>)>;

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a (synchronous) [`RwLock`] so that
/// streaming writers can commit from inside `poll_shutdown`. The lock is
/// never held across an await point.
///
/// # Examples
///
/// ```
/// use modelhub_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("models/org/m/v1/w.bin", b"weights"),
/// ]);
/// assert!(backend.exists(Path::new("models/org/m/v1/w.bin")).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MockBackend {
    name: String,
    storage: Arc<RwLock<Files>>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        let now = UtcDateTime::now();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                // The panic here is DELIBERATE. MockBackend is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: Arc::new(RwLock::new(map)),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn files(&self) -> Result<RwLockReadGuard<'_, Files>> {
        Ok(self.storage.read().map_err(|_| ErrorKind::BackendError("mock storage lock poisoned".to_string()))?)
    }

    fn files_mut(&self) -> Result<RwLockWriteGuard<'_, Files>> {
        Ok(self.storage.write().map_err(|_| ErrorKind::BackendError("mock storage lock poisoned".to_string()))?)
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

/// Buffers everything written and commits it to the shared map on shutdown,
/// the same way an object store only sees a file once the upload completes.
struct MockWriter {
    path: PathBuf,
    buffer: Vec<u8>,
    storage: Arc<RwLock<Files>>,
}
impl AsyncWrite for MockWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.get_mut().buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let data = std::mem::take(&mut this.buffer);
        Poll::Ready(match this.storage.write() {
            Ok(mut files) => {
                files.insert(this.path.clone(), (UtcDateTime::now(), data));
                Ok(())
            },
            Err(_) => Err(io::Error::other("mock storage lock poisoned")),
        })
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        // Snapshot matching entries up front; the lock must not be held
        // across yield points.
        let entries: Result<Vec<FileInfo>> = self.files().map(|files| {
            files
                .iter()
                .filter(|(path, _)| match &validated_prefix {
                    Some(pfx) => path.starts_with(pfx),
                    None => true,
                })
                .map(|(path, (inserted, data))| FileInfo::new(path.clone(), data.len() as u64, *inserted))
                .collect()
        });
        Box::pin(stream! {
            match entries {
                Ok(entries) => for entry in entries {
                    yield Ok(entry);
                },
                Err(e) => yield Err(e),
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.files()?.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let data = self.files()?.get(&path).map(|(_, data)| data.clone());
        data.ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        self.files_mut()?.insert(path, (UtcDateTime::now(), data.to_vec()));
        Ok(())
    }

    async fn writer(&self, path: &Path) -> Result<BoxAsyncWrite> {
        let path = validate_path(path)?;
        Ok(Box::new(MockWriter {
            path,
            buffer: Vec::new(),
            storage: Arc::clone(&self.storage),
        }))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        let removed = self.files_mut()?.remove(&path);
        removed.map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let (from, to) = (validate_path(from)?, validate_path(to)?);
        let mut files = self.files_mut()?;
        let (_, data) = files.remove(&from).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(from)))?;
        files.insert(to, (UtcDateTime::now(), data));
        Ok(())
    }

    async fn delete_dir(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        self.files_mut()?.retain(|file, _| !file.starts_with(&path));
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let info = self.files()?.get(&path).map(|(inserted, data)| FileInfo::new(path.clone(), data.len() as u64, *inserted));
        info.ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }
}
