//! Blob storage for cached model files.
//!
//! Everything the cache persists besides metadata lives here: model file
//! payloads at `{namespace}/{model}/{revision}/{file}` and owner icons. The
//! metadata database is never authoritative about whether a payload exists;
//! a [`StorageBackend`] is.

pub mod backend;
mod download;
pub mod error;
pub mod file;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::download::download;
pub use crate::file::FileInfo;
pub use crate::path::{is_canonical as is_canonical_path, validate as validate_path};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
