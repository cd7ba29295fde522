//! The cache engine: admission, lookups, reference counting and purges.
//!
//! Metadata lives in the [`Repository`]; payloads live in the blob store at
//! `{namespace}/{model}/{revision}/{file}`. Headers existing is never taken as
//! proof of a payload. Every existence check also asks the blob store.
//!
//! Downloads are streamed to a staging path under `{namespace}.partial` and
//! only moved into the namespace once admitted, so quota usage never counts
//! bytes that are still in flight.

use crate::error::{Error, ErrorKind, Result};
use crate::icons::OwnerIcons;
use crate::models::{FileKey, Headers, Owner, ResponseHeaders, TaskRecord, TaskSelector, now};
use crate::repo::TaskFilter;
use crate::telemetry::{TelemetryEvent, TelemetryHandle};
use crate::{Database, Repository};
use exn::{OptionExt, ResultExt};
use modelhub_config::CacheSettings;
use modelhub_storage::BackendHandle;
use modelhub_storage::backend::LocalBackend;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::UtcDateTime;
use tokio::sync::Mutex;
use tracing::instrument;

const STAGING_SUFFIX: &str = ".partial";

/// Bumped whenever the metadata layout changes incompatibly with blobs
/// already on disk. Opening a cache written under another epoch starts over.
pub const SCHEMA_EPOCH: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    pub namespace: String,
    pub icon_namespace: String,
    pub max_size_bytes: u64,
}
impl From<&CacheSettings> for CacheOptions {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            namespace: settings.namespace.clone(),
            icon_namespace: settings.icon_namespace.clone(),
            max_size_bytes: settings.max_size_bytes(),
        }
    }
}
impl Default for CacheOptions {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

/// What `put` stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Bytes to write at the file's blob path.
    Bytes(Vec<u8>),
    /// Already streamed to the file's staging path (see
    /// [`ModelCache::staging_path`]). Moved into place once admitted.
    Stored,
}

#[derive(Debug, Clone)]
pub struct PutRequest {
    pub engine_id: String,
    pub task_name: String,
    pub key: FileKey,
    pub payload: Payload,
    pub headers: ResponseHeaders,
}

pub struct DeleteModels<'a> {
    pub selector: TaskSelector,
    /// Matched tasks for which this returns `false` are kept.
    pub filter: Option<TaskFilter<'a>>,
    pub deleted_by: String,
}

/// Which files to list. Either a task, or a complete model/revision pair.
#[derive(Debug, Clone, Default)]
pub struct ListFiles {
    pub task_name: Option<String>,
    pub model: Option<String>,
    pub revision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub key: FileKey,
    pub headers: Headers,
    pub engine_ids: BTreeSet<String>,
}

/// Aggregates across every listed file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingSummary {
    pub total_size: u64,
    pub last_used: Option<UtcDateTime>,
    pub update_date: Option<UtcDateTime>,
    pub engine_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileListing {
    pub files: Vec<FileEntry>,
    pub metadata: ListingSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ModelEntry {
    pub task_name: String,
    pub model: String,
    pub revision: String,
}

pub struct ModelCache {
    repo: Repository,
    backend: BackendHandle,
    icons: OwnerIcons,
    telemetry: TelemetryHandle,
    options: CacheOptions,
    // Held from the quota check until the payload is written, so two
    // admissions in this process can't both fit into the same free space.
    admission: Mutex<()>,
}

impl ModelCache {
    /// Open the cache, discarding everything if it was written under a
    /// different schema epoch. Leftover staged downloads are always dropped.
    #[instrument(skip_all, fields(backend = backend.name(), namespace = %options.namespace))]
    pub async fn open(
        db: &Database,
        backend: BackendHandle,
        telemetry: TelemetryHandle,
        options: CacheOptions,
    ) -> Result<Self> {
        let repo = Repository::from(db);
        let staging = format!("{}{STAGING_SUFFIX}", options.namespace);
        backend.delete_dir(Path::new(&staging)).await.or_raise(|| ErrorKind::Storage)?;
        let epoch = repo.epoch().await?;
        if epoch != Some(SCHEMA_EPOCH) {
            tracing::info!(from = ?epoch, to = SCHEMA_EPOCH, "Schema epoch changed, discarding cached files");
            for namespace in [&options.namespace, &options.icon_namespace] {
                backend.delete_dir(Path::new(namespace)).await.or_raise(|| ErrorKind::Storage)?;
            }
            repo.reset(SCHEMA_EPOCH).await?;
        }
        Ok(Self {
            icons: OwnerIcons::new(repo.clone(), Arc::clone(&backend), &options.icon_namespace),
            repo,
            backend,
            telemetry,
            options,
            admission: Mutex::new(()),
        })
    }

    /// Open a filesystem-backed cache as described by configuration.
    pub async fn from_settings(settings: &CacheSettings, telemetry: TelemetryHandle) -> Result<Self> {
        let db = Database::connect(settings.database_path()).await?;
        let backend: BackendHandle =
            Arc::new(LocalBackend::new("local", &settings.root).or_raise(|| ErrorKind::Storage)?);
        Self::open(&db, backend, telemetry, CacheOptions::from(settings)).await
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    pub fn icons(&self) -> &OwnerIcons {
        &self.icons
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Deterministic blob path of a file.
    pub fn blob_path(&self, key: &FileKey) -> PathBuf {
        PathBuf::from(format!("{}/{}/{}/{}", self.options.namespace, key.model, key.revision, key.file))
    }

    /// Where a download of the file is streamed before admission.
    pub fn staging_path(&self, key: &FileKey) -> PathBuf {
        PathBuf::from(format!(
            "{}{STAGING_SUFFIX}/{}/{}/{}",
            self.options.namespace, key.model, key.revision, key.file
        ))
    }

    /// Filesystem path of a file, when the backend has one.
    pub fn local_path(&self, key: &FileKey) -> Option<PathBuf> {
        self.backend.local_path(&self.blob_path(key))
    }

    /// Bytes currently stored under the model namespace.
    pub async fn usage(&self) -> Result<u64> {
        self.backend.usage(Some(Path::new(&self.options.namespace))).await.or_raise(|| ErrorKind::Storage)
    }

    /// Headers exist *and* the blob exists. A mismatch is a miss, not an error.
    pub async fn file_exists(&self, key: &FileKey) -> Result<bool> {
        if !self.repo.has_headers(key).await? {
            return Ok(false);
        }
        let exists = self.backend.exists(&self.blob_path(key)).await.or_raise(|| ErrorKind::Storage)?;
        if !exists {
            tracing::debug!(%key, "Headers present without a blob");
        }
        Ok(exists)
    }

    pub async fn get_headers(&self, key: &FileKey) -> Result<Option<Headers>> {
        self.repo.get_headers(key).await
    }

    /// Replace the full headers record; callers keep the fields they want.
    pub async fn set_headers(&self, key: &FileKey, headers: &Headers) -> Result<()> {
        self.repo.put_headers(key, headers).await
    }

    /// Read a cached file on behalf of an engine.
    ///
    /// Records the engine as a consumer and bumps `last_used`. Returns `None`
    /// without headers; does not check for the blob beforehand, so a missing
    /// blob surfaces as [`ErrorKind::Storage`] and records nothing. Use
    /// [`file_exists`] first when that matters.
    ///
    /// [`file_exists`]: Self::file_exists
    #[instrument(skip_all, fields(%key, engine = engine_id))]
    pub async fn get_file(&self, engine_id: &str, key: &FileKey) -> Result<Option<(Vec<u8>, Headers)>> {
        let Some(mut headers) = self.repo.get_headers(key).await? else {
            return Ok(None);
        };
        let data = self.backend.read(&self.blob_path(key)).await.or_raise(|| ErrorKind::Storage)?;
        self.repo.add_engine_ref(key, engine_id).await?;
        headers.last_used = now();
        self.repo.put_headers(key, &headers).await?;
        Ok(Some((data, headers)))
    }

    /// Bump `last_used` without reading the payload.
    pub async fn touch(&self, key: &FileKey) -> Result<Option<Headers>> {
        let Some(mut headers) = self.repo.get_headers(key).await? else {
            return Ok(None);
        };
        headers.last_used = now();
        self.repo.put_headers(key, &headers).await?;
        Ok(Some(headers))
    }

    /// Record that `engine_id` uses this file for `task_name`. Idempotent.
    pub async fn update_task(&self, engine_id: &str, task_name: &str, key: &FileKey) -> Result<()> {
        self.repo.associate(engine_id, &TaskRecord::new(task_name, key.clone())).await
    }

    /// Admit a file into the cache, returning the write timestamp.
    ///
    /// Fails with [`ErrorKind::QuotaExceeded`] before any write when the file
    /// would take the namespace over its size limit. Bytes already on disk at
    /// the file's own blob path don't count towards usage since they're being
    /// replaced.
    #[instrument(skip_all, fields(key = %request.key, engine = %request.engine_id))]
    pub async fn put(&self, request: PutRequest) -> Result<UtcDateTime> {
        let PutRequest { engine_id, task_name, key, payload, headers } = request;
        let path = self.blob_path(&key);
        let _admission = self.admission.lock().await;

        let replaced = self.blob_size(&path).await?;
        let file_size = match (headers.file_size, &payload) {
            (Some(size), _) => size,
            (None, Payload::Bytes(data)) => data.len() as u64,
            (None, Payload::Stored) => self.blob_size(&self.staging_path(&key)).await?.ok_or_raise(|| ErrorKind::Storage)?,
        };
        let usage = self.usage().await?.saturating_sub(replaced.unwrap_or(0));
        if usage.saturating_add(file_size) > self.options.max_size_bytes {
            let available = self.options.max_size_bytes.saturating_sub(usage);
            tracing::warn!(file_size, available, "Refusing to admit file over quota");
            exn::bail!(ErrorKind::QuotaExceeded { requested: file_size, available });
        }

        let at = now();
        let task = TaskRecord::new(task_name, key.clone());
        let headers = headers.normalize(file_size, at);
        let write_blob = async {
            match &payload {
                Payload::Bytes(data) => self.backend.write(&path, data).await.or_raise(|| ErrorKind::Storage),
                Payload::Stored => {
                    self.backend.rename(&self.staging_path(&key), &path).await.or_raise(|| ErrorKind::Storage)
                },
            }
        };
        futures::try_join!(write_blob, self.repo.associate(&engine_id, &task), self.repo.put_headers(&key, &headers))?;
        tracing::debug!(file_size, "Admitted file");
        Ok(at)
    }

    /// Drop every reference `engine_id` holds, deleting files it was the last
    /// consumer of.
    #[instrument(skip_all, fields(engine = engine_id))]
    pub async fn delete_files_by_engine(&self, engine_id: &str, deleted_by: &str) -> Result<()> {
        let release = self.repo.release_engine(engine_id).await?;
        for (model, revision) in release.models {
            self.telemetry.record(TelemetryEvent::ModelDeletion {
                model: Some(model),
                revision: Some(revision),
                deleted_by: deleted_by.to_string(),
            });
        }
        for key in &release.orphaned {
            self.delete_file(key).await?;
        }
        Ok(())
    }

    /// Delete headers and blob, then prune the owner's icon.
    async fn delete_file(&self, key: &FileKey) -> Result<()> {
        let forget = async {
            self.repo.delete_headers(key).await?;
            self.prune_icon(key).await;
            Ok::<_, Error>(())
        };
        futures::try_join!(forget, self.remove_blob(key))?;
        Ok(())
    }

    /// Purge task records and every file no surviving task still needs.
    ///
    /// Returns the purged files.
    #[instrument(skip_all, fields(selector = ?request.selector, by = %request.deleted_by))]
    pub async fn delete_models(&self, request: DeleteModels<'_>) -> Result<Vec<FileKey>> {
        let (_, model, revision) = request.selector.binds();
        self.telemetry.record(TelemetryEvent::ModelDeletion {
            model: model.map(str::to_string),
            revision: revision.map(str::to_string),
            deleted_by: request.deleted_by.clone(),
        });
        let purged = self.repo.purge_tasks(&request.selector, request.filter).await?;
        futures::future::try_join_all(purged.iter().map(|key| async move {
            let (removed, ()) = futures::join!(self.remove_blob(key), self.prune_icon(key));
            removed
        }))
        .await?;
        tracing::info!(files = purged.len(), "Purged model files");
        Ok(purged)
    }

    /// Remove a staged download that was never admitted (e.g. over quota).
    pub async fn discard_staged(&self, key: &FileKey) -> Result<()> {
        match self.backend.delete(&self.staging_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.raise(ErrorKind::Storage)),
        }
    }

    pub async fn list_files(&self, query: ListFiles) -> Result<FileListing> {
        let pairs = match (query.task_name, query.model, query.revision) {
            (_, Some(model), Some(revision)) => vec![(model, revision)],
            (Some(task), model, revision) => {
                let mut pairs = self.repo.model_revisions_for_task(&task).await?;
                pairs.retain(|(m, r)| {
                    model.as_ref().is_none_or(|model| model == m) && revision.as_ref().is_none_or(|revision| revision == r)
                });
                pairs
            },
            _ => exn::bail!(ErrorKind::InvalidQuery("listing files needs a task name or a model and revision")),
        };

        let mut listing = FileListing::default();
        for (model, revision) in pairs {
            let mut engines = self.repo.engine_ids_for_model_revision(&model, &revision).await?;
            for (key, headers) in self.repo.headers_for_model_revision(&model, &revision).await? {
                let engine_ids = engines.remove(&key).unwrap_or_default();
                let summary = &mut listing.metadata;
                summary.total_size = summary.total_size.saturating_add(headers.file_size);
                summary.last_used = summary.last_used.max(Some(headers.last_used));
                summary.update_date = summary.update_date.max(Some(headers.last_updated));
                summary.engine_ids.extend(engine_ids.iter().cloned());
                listing.files.push(FileEntry { key, headers, engine_ids });
            }
        }
        Ok(listing)
    }

    pub async fn list_models(&self) -> Result<Vec<ModelEntry>> {
        Ok(self
            .repo
            .unique_task_models()
            .await?
            .into_iter()
            .map(|(task_name, model, revision)| ModelEntry { task_name, model, revision })
            .collect())
    }

    async fn blob_size(&self, path: &Path) -> Result<Option<u64>> {
        match self.backend.stat(path).await {
            Ok(info) => Ok(Some(info.size)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.raise(ErrorKind::Storage)),
        }
    }

    async fn remove_blob(&self, key: &FileKey) -> Result<()> {
        match self.backend.delete(&self.blob_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.raise(ErrorKind::Storage)),
        }
    }

    async fn prune_icon(&self, key: &FileKey) {
        let Some(owner) = Owner::from_model(&key.model) else {
            return;
        };
        if let Err(err) = self.icons.prune(&owner).await {
            tracing::warn!(hub = %owner.hub, owner = %owner.name, error = ?err, "Failed to prune owner icon");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NO_ETAG;
    use crate::telemetry::RecordingTelemetry;
    use modelhub_storage::StorageBackend;
    use modelhub_storage::backend::MockBackend;
    use rstest::{fixture, rstest};

    struct Harness {
        cache: ModelCache,
        backend: MockBackend,
        telemetry: Arc<RecordingTelemetry>,
    }

    async fn harness_with(max_size_bytes: u64) -> Harness {
        let db = Database::connect_in_memory().await.unwrap();
        let backend = MockBackend::default();
        let telemetry = Arc::new(RecordingTelemetry::default());
        let options = CacheOptions {
            namespace: "models".to_string(),
            icon_namespace: "icons".to_string(),
            max_size_bytes,
        };
        let cache = ModelCache::open(&db, Arc::new(backend.clone()), telemetry.clone(), options).await.unwrap();
        Harness { cache, backend, telemetry }
    }

    #[fixture]
    async fn harness() -> Harness {
        harness_with(1024 * 1024).await
    }

    fn key(file: &str) -> FileKey {
        FileKey::new("org/m", "v1", file)
    }

    fn put(engine: &str, task: &str, key: FileKey, data: &[u8]) -> PutRequest {
        PutRequest {
            engine_id: engine.to_string(),
            task_name: task.to_string(),
            key,
            payload: Payload::Bytes(data.to_vec()),
            headers: ResponseHeaders::default(),
        }
    }

    #[rstest]
    #[tokio::test]
    async fn test_put_then_get(#[future] harness: Harness) {
        let h = harness.await;
        let written_at = h.cache.put(put("e1", "classify", key("w.bin"), &[7u8; 500])).await.unwrap();
        assert!(h.cache.file_exists(&key("w.bin")).await.unwrap());

        let (data, headers) = h.cache.get_file("e1", &key("w.bin")).await.unwrap().unwrap();
        assert_eq!(data.len(), 500);
        assert_eq!(headers.file_size, 500);
        assert_eq!(headers.etag, NO_ETAG);
        assert!(headers.last_used >= written_at);
        assert_eq!(h.cache.get_headers(&key("w.bin")).await.unwrap(), Some(headers));
    }

    #[rstest]
    #[tokio::test]
    async fn test_get_file_records_consumer(#[future] harness: Harness) {
        let h = harness.await;
        h.cache.put(put("e1", "classify", key("w.bin"), b"weights")).await.unwrap();
        let (data, _) = h.cache.get_file("e2", &key("w.bin")).await.unwrap().unwrap();
        assert_eq!(data, b"weights");
        assert_eq!(
            h.cache.repo.engine_ids(&key("w.bin")).await.unwrap(),
            BTreeSet::from(["e1".to_string(), "e2".to_string()])
        );

        // e2 still holds the file after e1 lets go.
        h.cache.delete_files_by_engine("e1", "test").await.unwrap();
        assert!(h.cache.file_exists(&key("w.bin")).await.unwrap());
        assert_eq!(h.cache.repo.engine_ids(&key("w.bin")).await.unwrap(), BTreeSet::from(["e2".to_string()]));
    }

    #[rstest]
    #[tokio::test]
    async fn test_get_file_with_missing_blob_records_nothing(#[future] harness: Harness) {
        let h = harness.await;
        h.cache.put(put("e1", "classify", key("w.bin"), b"weights")).await.unwrap();
        h.backend.delete(Path::new("models/org/m/v1/w.bin")).await.unwrap();
        let err = h.cache.get_file("e2", &key("w.bin")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Storage));
        assert_eq!(h.cache.repo.engine_ids(&key("w.bin")).await.unwrap(), BTreeSet::from(["e1".to_string()]));
    }

    #[rstest]
    #[tokio::test]
    async fn test_get_file_without_headers(#[future] harness: Harness) {
        let h = harness.await;
        assert_eq!(h.cache.get_file("e1", &key("w.bin")).await.unwrap(), None);
    }

    #[rstest]
    #[tokio::test]
    async fn test_update_task_is_idempotent(#[future] harness: Harness) {
        let h = harness.await;
        h.cache.update_task("e1", "classify", &key("w.bin")).await.unwrap();
        h.cache.update_task("e1", "classify", &key("w.bin")).await.unwrap();
        assert_eq!(h.cache.repo.engine_ids(&key("w.bin")).await.unwrap(), BTreeSet::from(["e1".to_string()]));
        assert_eq!(h.cache.repo.tasks(&TaskSelector::All).await.unwrap().len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_reference_counted_deletion(#[future] harness: Harness) {
        let h = harness.await;
        h.cache.put(put("e1", "classify", key("w.bin"), b"weights")).await.unwrap();
        h.cache.put(put("e2", "classify", key("w.bin"), b"weights")).await.unwrap();

        h.cache.delete_files_by_engine("e1", "test").await.unwrap();
        assert!(h.cache.file_exists(&key("w.bin")).await.unwrap());
        assert_eq!(h.cache.repo.engine_ids(&key("w.bin")).await.unwrap(), BTreeSet::from(["e2".to_string()]));

        h.cache.delete_files_by_engine("e2", "test").await.unwrap();
        assert!(!h.cache.file_exists(&key("w.bin")).await.unwrap());
        assert!(!h.backend.exists(Path::new("models/org/m/v1/w.bin")).await.unwrap());
        // One event per (model, revision), per call.
        assert_eq!(h.telemetry.deletions(), 2);
    }

    #[tokio::test]
    async fn test_quota_rejects_without_writing() {
        let h = harness_with(1000).await;
        h.cache.put(put("e1", "t", key("a.bin"), &[0u8; 600])).await.unwrap();
        let err = h.cache.put(put("e1", "t", key("b.bin"), &[0u8; 500])).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::QuotaExceeded { requested: 500, available: 400 }));
        assert_eq!(h.cache.get_headers(&key("b.bin")).await.unwrap(), None);
        assert!(!h.backend.exists(Path::new("models/org/m/v1/b.bin")).await.unwrap());
        assert!(h.cache.repo.tasks_for_file(&key("b.bin")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quota_ignores_blob_being_replaced() {
        let h = harness_with(1000).await;
        h.cache.put(put("e1", "t", key("a.bin"), &[0u8; 600])).await.unwrap();
        h.cache.put(put("e1", "t", key("a.bin"), &[1u8; 900])).await.unwrap();
        assert_eq!(h.cache.usage().await.unwrap(), 900);
    }

    fn stored(engine: &str, key: FileKey) -> PutRequest {
        PutRequest {
            payload: Payload::Stored,
            ..put(engine, "t", key, b"")
        }
    }

    #[tokio::test]
    async fn test_quota_rejects_anything_once_over() {
        let h = harness_with(100).await;
        h.backend.write(Path::new("models/org/m/v1/big.bin"), &[0u8; 200]).await.unwrap();
        let err = h.cache.put(put("e1", "t", key("empty.bin"), b"")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::QuotaExceeded { requested: 0, available: 0 }));
        assert_eq!(h.cache.get_headers(&key("empty.bin")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stored_payload_is_moved_into_place() {
        let h = harness_with(1000).await;
        let staged = h.cache.staging_path(&key("w.bin"));
        assert_eq!(staged, Path::new("models.partial/org/m/v1/w.bin"));
        h.backend.write(&staged, &[0u8; 800]).await.unwrap();
        h.cache.put(stored("e1", key("w.bin"))).await.unwrap();
        assert_eq!(h.cache.get_headers(&key("w.bin")).await.unwrap().unwrap().file_size, 800);
        assert!(h.cache.file_exists(&key("w.bin")).await.unwrap());
        assert!(!h.backend.exists(&staged).await.unwrap());
    }

    #[tokio::test]
    async fn test_staged_downloads_do_not_count_towards_quota() {
        let h = harness_with(1000).await;
        for file in ["a.bin", "b.bin"] {
            h.backend.write(&h.cache.staging_path(&key(file)), &[0u8; 600]).await.unwrap();
        }
        assert_eq!(h.cache.usage().await.unwrap(), 0);
        h.cache.put(stored("e1", key("a.bin"))).await.unwrap();
        let err = h.cache.put(stored("e1", key("b.bin"))).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::QuotaExceeded { requested: 600, available: 400 }));

        // The rejected download is still staged until the caller discards it.
        assert!(h.backend.exists(&h.cache.staging_path(&key("b.bin"))).await.unwrap());
        h.cache.discard_staged(&key("b.bin")).await.unwrap();
        assert!(!h.backend.exists(&h.cache.staging_path(&key("b.bin"))).await.unwrap());
        // Nothing staged is fine too.
        h.cache.discard_staged(&key("b.bin")).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_drops_leftover_staged_downloads() {
        let db = Database::connect_in_memory().await.unwrap();
        let backend = MockBackend::default();
        let handle: BackendHandle = Arc::new(backend.clone());
        let telemetry: TelemetryHandle = Arc::new(RecordingTelemetry::default());
        ModelCache::open(&db, Arc::clone(&handle), Arc::clone(&telemetry), CacheOptions::default()).await.unwrap();
        backend.write(Path::new("models/org/m/v1/w.bin"), b"kept").await.unwrap();
        backend.write(Path::new("models.partial/org/m/v1/x.bin"), b"half").await.unwrap();

        ModelCache::open(&db, handle, telemetry, CacheOptions::default()).await.unwrap();
        assert!(backend.exists(Path::new("models/org/m/v1/w.bin")).await.unwrap());
        assert!(!backend.exists(Path::new("models.partial/org/m/v1/x.bin")).await.unwrap());
    }

    #[rstest]
    #[tokio::test]
    async fn test_blob_divergence_is_a_miss(#[future] harness: Harness) {
        let h = harness.await;
        h.cache.put(put("e1", "t", key("w.bin"), b"weights")).await.unwrap();
        h.backend.delete(Path::new("models/org/m/v1/w.bin")).await.unwrap();
        assert!(h.cache.get_headers(&key("w.bin")).await.unwrap().is_some());
        assert!(!h.cache.file_exists(&key("w.bin")).await.unwrap());
    }

    #[rstest]
    #[tokio::test]
    async fn test_cascading_task_deletion(#[future] harness: Harness) {
        let h = harness.await;
        h.cache.put(put("e1", "t1", key("w.bin"), b"weights")).await.unwrap();
        h.cache.update_task("e1", "t2", &key("w.bin")).await.unwrap();

        let purged = h
            .cache
            .delete_models(DeleteModels {
                selector: TaskSelector::Task("t1".to_string()),
                filter: None,
                deleted_by: "test".to_string(),
            })
            .await
            .unwrap();
        assert!(purged.is_empty());
        assert!(h.cache.file_exists(&key("w.bin")).await.unwrap());

        let purged = h
            .cache
            .delete_models(DeleteModels {
                selector: TaskSelector::Task("t2".to_string()),
                filter: None,
                deleted_by: "test".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(purged, vec![key("w.bin")]);
        assert!(!h.backend.exists(Path::new("models/org/m/v1/w.bin")).await.unwrap());
        // One event up front per call, regardless of what was purged.
        assert_eq!(h.telemetry.deletions(), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn test_delete_models_prunes_owner_icon(#[future] harness: Harness) {
        let h = harness.await;
        let owner = Owner::from_model("org/m").unwrap();
        h.cache.icons().put(&owner, b"png").await.unwrap();
        h.cache.put(put("e1", "t", key("w.bin"), b"weights")).await.unwrap();
        h.cache
            .delete_models(DeleteModels {
                selector: TaskSelector::ModelRevision { model: "org/m".to_string(), revision: "v1".to_string() },
                filter: None,
                deleted_by: "test".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(h.cache.icons().get(&owner).await.unwrap(), None);
    }

    #[rstest]
    #[tokio::test]
    async fn test_list_files(#[future] harness: Harness) {
        let h = harness.await;
        h.cache.put(put("e1", "t", key("a.bin"), &[0u8; 10])).await.unwrap();
        h.cache.put(put("e2", "t", key("b.bin"), &[0u8; 20])).await.unwrap();
        h.cache.put(put("e1", "u", FileKey::new("org/other", "v2", "c.bin"), &[0u8; 5])).await.unwrap();

        let listing = h.cache.list_files(ListFiles { task_name: Some("t".to_string()), ..Default::default() }).await.unwrap();
        assert_eq!(listing.files.len(), 2);
        assert_eq!(listing.files[0].key, key("a.bin"));
        assert_eq!(listing.files[0].engine_ids, BTreeSet::from(["e1".to_string()]));
        assert_eq!(listing.metadata.total_size, 30);
        assert_eq!(listing.metadata.engine_ids, BTreeSet::from(["e1".to_string(), "e2".to_string()]));
        assert!(listing.metadata.last_used.is_some());

        let listing = h
            .cache
            .list_files(ListFiles {
                model: Some("org/other".to_string()),
                revision: Some("v2".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(listing.metadata.total_size, 5);

        let err = h.cache.list_files(ListFiles { model: Some("org/m".to_string()), ..Default::default() }).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidQuery(_)));
    }

    #[rstest]
    #[tokio::test]
    async fn test_list_models(#[future] harness: Harness) {
        let h = harness.await;
        h.cache.put(put("e1", "t", key("a.bin"), b"a")).await.unwrap();
        h.cache.put(put("e1", "t", key("b.bin"), b"b")).await.unwrap();
        h.cache.put(put("e1", "u", key("a.bin"), b"a")).await.unwrap();
        let models = h.cache.list_models().await.unwrap();
        assert_eq!(
            models.iter().map(|m| m.task_name.as_str()).collect::<Vec<_>>(),
            vec!["t", "u"]
        );
    }

    #[tokio::test]
    async fn test_epoch_change_wipes_blobs() {
        let db = Database::connect_in_memory().await.unwrap();
        let backend = MockBackend::with_files([("models/org/m/v1/stale.bin", b"old".to_vec()), ("icons/local/org/icon", b"png".to_vec())]);
        let telemetry: TelemetryHandle = Arc::new(RecordingTelemetry::default());
        let handle: BackendHandle = Arc::new(backend.clone());
        ModelCache::open(&db, Arc::clone(&handle), Arc::clone(&telemetry), CacheOptions::default()).await.unwrap();
        assert!(backend.list(None).await.unwrap().is_empty());

        // Same epoch: nothing is discarded.
        backend.write(Path::new("models/org/m/v1/w.bin"), b"new").await.unwrap();
        ModelCache::open(&db, handle, telemetry, CacheOptions::default()).await.unwrap();
        assert!(backend.exists(Path::new("models/org/m/v1/w.bin")).await.unwrap());
    }

    #[tokio::test]
    async fn test_from_settings_uses_local_paths() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CacheSettings {
            root: dir.path().to_path_buf(),
            ..CacheSettings::default()
        };
        let cache = ModelCache::from_settings(&settings, Arc::new(RecordingTelemetry::default())).await.unwrap();
        cache.put(put("e1", "t", key("w.bin"), b"weights")).await.unwrap();
        let local = cache.local_path(&key("w.bin")).unwrap();
        assert_eq!(local, dir.path().join("models/org/m/v1/w.bin"));
        assert_eq!(std::fs::read(local).unwrap(), b"weights");
    }
}
