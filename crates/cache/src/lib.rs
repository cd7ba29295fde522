//! Reference-counted, quota-bounded cache for remotely hosted model files.
//!
//! # Architecture
//! The cache keeps three metadata collections in SQLite and payloads in a
//! blob store:
//! - **Headers**: cached HTTP metadata per `(model, revision, file)` plus
//!   size and usage timestamps.
//! - **Tasks**: which named task each file serves. A file stays cached while
//!   at least one task still references it.
//! - **Engine references**: which consumers currently hold each file. A file
//!   is only deleted on behalf of an engine once no other engine holds it.
//!
//! The database is not the source of truth for payloads. A headers row
//! without a blob is a cache miss, never an error.

mod db;
mod engine;
pub mod error;
mod icons;
mod models;
mod repo;
pub mod telemetry;

pub use crate::db::Database;
pub use crate::engine::{
    CacheOptions, DeleteModels, FileEntry, FileListing, ListFiles, ListingSummary, ModelCache, ModelEntry, Payload,
    PutRequest, SCHEMA_EPOCH,
};
pub use crate::icons::OwnerIcons;
pub use crate::models::{
    DEFAULT_CONTENT_TYPE, FileKey, Headers, NO_ETAG, Owner, ResponseHeaders, TaskRecord, TaskSelector,
};
pub use crate::repo::{EngineRelease, Repository, TaskFilter};
