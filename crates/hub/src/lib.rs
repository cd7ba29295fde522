//! Client for a remote model hub, backed by the model cache.
//!
//! Every file request goes through the same steps:
//! 1. Validate the model, revision and file name, then derive the remote URL
//!    and the cache key (models are namespaced by hub hostname).
//! 2. Check the URL against the allow/deny rules. A denied origin also loses
//!    whatever was cached from it.
//! 3. Decide between cache and network. Pinned revisions are served whenever
//!    cached; `main` is revalidated with a HEAD request for its ETag.
//! 4. On a miss, stream the response into the blob store and admit it into
//!    the cache, reporting progress and download telemetry along the way.

mod client;
pub mod error;
mod flight;
mod model_url;
mod policy;
pub mod progress;
mod session;
pub mod transport;
mod validate;

pub use crate::client::{FileRequest, HubClient, MAIN_REVISION, ModelFile};
pub use crate::model_url::{ModelUrl, UrlOptions, UrlTemplate, parse_url};
pub use crate::policy::UrlPolicy;
pub use crate::transport::{ReqwestTransport, Transport, TransportHandle};
pub use crate::validate::{check_file, check_input, check_model, check_revision};
