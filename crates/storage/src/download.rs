use crate::BackendHandle;
use crate::error::{ErrorKind, Result};
use bytes::Bytes;
use exn::ResultExt;
use futures::{Stream, StreamExt};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// Streams a network response body straight into storage.
///
/// Each chunk is written as it arrives and `on_progress` is told the running
/// total afterwards, so callers can relay byte-level progress without ever
/// buffering the whole payload. The target is created (or truncated) before
/// the first chunk and only considered complete once the writer has been shut
/// down; returns the number of bytes written.
///
/// A failing chunk aborts the transfer with [`ErrorKind::Stream`], keeping the
/// source error in the tree. Whatever was written so far is left in place for
/// the caller to discard.
#[instrument(skip_all, fields(backend = backend.name(), path = %path.display()))]
pub async fn download<S, E>(
    backend: &BackendHandle,
    path: &Path,
    body: S,
    mut on_progress: impl FnMut(u64) + Send,
) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut writer = backend.writer(path).await?;
    let mut body = std::pin::pin!(body);
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.or_raise(|| ErrorKind::Stream(path.to_path_buf()))?;
        writer.write_all(&chunk).await.map_err(ErrorKind::Io)?;
        written += chunk.len() as u64;
        on_progress(written);
    }
    writer.shutdown().await.map_err(ErrorKind::Io)?;
    tracing::debug!(bytes = written, "Download stored");
    Ok(written)
}
