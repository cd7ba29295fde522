//! Hub Client Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A hub client error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for hub client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The URL is neither root-relative nor under the configured hub root.
    #[display("invalid URL format: {_0}")]
    InvalidUrlFormat(#[error(not(source))] String),
    /// The URL is under the hub root but doesn't follow the URL template.
    #[display("invalid model URL: {_0}")]
    InvalidModelUrl(#[error(not(source))] String),
    #[display("invalid URL template: {_0}")]
    InvalidTemplate(#[error(not(source))] String),
    /// A model, revision or file name failed validation; names the field.
    #[display("invalid {_0}")]
    InvalidInput(#[error(not(source))] &'static str),
    /// The allow/deny rules refuse this URL.
    #[display("URL is not allowed: {_0}")]
    Forbidden(#[error(not(source))] String),
    /// The origin answered with a non-success status.
    #[display("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[display("transport error")]
    Transport,
    /// Fetching or storing a file failed; the cause is attached.
    #[display("download failed: {_0}")]
    Download(#[error(not(source))] String),
    #[display("cache error")]
    Cache,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport | Self::Download(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns `true` for allow/deny rejections, which callers special-case.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden(_))
    }

    /// Short name of the error category, as reported in telemetry.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidUrlFormat(_) => "InvalidUrlFormat",
            Self::InvalidModelUrl(_) => "InvalidModelUrl",
            Self::InvalidTemplate(_) => "InvalidTemplate",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Forbidden(_) => "Forbidden",
            Self::Status { .. } => "Status",
            Self::Transport => "Transport",
            Self::Download(_) => "Download",
            Self::Cache => "Cache",
        }
    }
}
