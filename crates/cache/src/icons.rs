//! Per-owner icon cache.
//!
//! Each `(hub, owner)` has at most one icon blob. Icons are decorative: they
//! are dropped once the owner has no cached files left, and failing to do so
//! never fails anything else.

use crate::Repository;
use crate::error::{ErrorKind, Result};
use crate::models::Owner;
use exn::ResultExt;
use modelhub_storage::BackendHandle;
use tracing::instrument;

#[derive(Clone)]
pub struct OwnerIcons {
    repo: Repository,
    backend: BackendHandle,
    namespace: String,
}
impl OwnerIcons {
    pub fn new(repo: Repository, backend: BackendHandle, namespace: impl Into<String>) -> Self {
        Self {
            repo,
            backend,
            namespace: namespace.into(),
        }
    }

    pub async fn get(&self, owner: &Owner) -> Result<Option<Vec<u8>>> {
        match self.backend.read(&owner.icon_path(&self.namespace)).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.raise(ErrorKind::Storage)),
        }
    }

    pub async fn put(&self, owner: &Owner, icon: &[u8]) -> Result<()> {
        self.backend.write(&owner.icon_path(&self.namespace), icon).await.or_raise(|| ErrorKind::Storage)
    }

    /// Delete the owner's icon if none of their files remain cached.
    ///
    /// Returns whether an icon was removed.
    #[instrument(skip_all, fields(hub = %owner.hub, owner = %owner.name))]
    pub async fn prune(&self, owner: &Owner) -> Result<bool> {
        if self.repo.count_headers_for_owner(owner).await? > 0 {
            return Ok(false);
        }
        match self.backend.delete(&owner.icon_path(&self.namespace)).await {
            Ok(()) => {
                tracing::debug!("Pruned owner icon");
                Ok(true)
            },
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err.raise(ErrorKind::Storage)),
        }
    }
}
