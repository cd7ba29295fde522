//! Outbound requests to the model hub.
//!
//! The client only needs two things from the network: a HEAD for ETag
//! revalidation and a streaming GET. [`ReqwestTransport`] serves `http(s)`
//! through reqwest and reads `file:` URLs (bundled models) from disk.

use crate::error::{ErrorKind, Result};
use async_stream::stream;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use exn::{OptionExt, ResultExt};
use futures::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::AsyncReadExt;
use url::Url;

pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;
pub type TransportHandle = std::sync::Arc<dyn Transport + Send + Sync>;

const FILE_CHUNK_SIZE: usize = 256 * 1024;

/// A successful GET: response headers plus a body still to be read.
pub struct Response {
    pub headers: Vec<(String, String)>,
    pub body: ByteStream,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Response headers of a HEAD request. Non-success statuses are errors.
    async fn head(&self, url: &Url) -> Result<Vec<(String, String)>>;

    /// Start a GET. Non-success statuses are errors.
    async fn get(&self, url: &Url) -> Result<Response>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}
impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .or_raise(|| ErrorKind::Transport)?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn file_path(url: &Url) -> Result<PathBuf> {
        url.to_file_path().ok().ok_or_raise(|| ErrorKind::InvalidUrlFormat(url.to_string()))
    }

    fn check_status(url: &Url, response: &reqwest::Response) -> Result<()> {
        let status = response.status();
        if !status.is_success() {
            exn::bail!(ErrorKind::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect()
}

fn file_stream(mut file: tokio::fs::File) -> ByteStream {
    Box::pin(stream! {
        loop {
            let mut chunk = BytesMut::with_capacity(FILE_CHUNK_SIZE);
            match file.read_buf(&mut chunk).await {
                Ok(0) => break,
                Ok(_) => yield Ok(chunk.freeze()),
                Err(err) => {
                    yield Err(err);
                    break;
                },
            }
        }
    })
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn head(&self, url: &Url) -> Result<Vec<(String, String)>> {
        if url.scheme() == "file" {
            let metadata = tokio::fs::metadata(Self::file_path(url)?).await.or_raise(|| ErrorKind::Transport)?;
            return Ok(vec![("content-length".to_string(), metadata.len().to_string())]);
        }
        let response = self.client.head(url.clone()).send().await.or_raise(|| ErrorKind::Transport)?;
        Self::check_status(url, &response)?;
        Ok(header_pairs(response.headers()))
    }

    async fn get(&self, url: &Url) -> Result<Response> {
        if url.scheme() == "file" {
            let file = tokio::fs::File::open(Self::file_path(url)?).await.or_raise(|| ErrorKind::Transport)?;
            let length = file.metadata().await.or_raise(|| ErrorKind::Transport)?.len();
            return Ok(Response {
                headers: vec![("content-length".to_string(), length.to_string())],
                body: file_stream(file),
            });
        }
        let response = self.client.get(url.clone()).send().await.or_raise(|| ErrorKind::Transport)?;
        Self::check_status(url, &response)?;
        Ok(Response {
            headers: header_pairs(response.headers()),
            body: Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other))),
        })
    }
}
