//! The hub client: decides between the cache and the network for each file.

use crate::error::{ErrorKind, Result};
use crate::flight::KeyedLocks;
use crate::policy::UrlPolicy;
use crate::progress::{ProgressCallback, ProgressKind, ProgressMetadata, ProgressStatus, Reporter};
use crate::session::{Session, Sessions};
use crate::transport::{ReqwestTransport, TransportHandle};
use crate::model_url::{ModelUrl, UrlOptions};
use crate::validate::check_input;
use exn::{OptionExt, ResultExt};
use modelhub_cache::telemetry::{DownloadEvent, DownloadStep, TelemetryEvent, TelemetryHandle};
use modelhub_cache::{DeleteModels, FileKey, Headers, ModelCache, Payload, PutRequest, ResponseHeaders, TaskSelector};
use modelhub_config::{Config, HubSettings};
use modelhub_storage::error::ErrorKind as StorageErrorKind;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;
use url::Url;

/// The only revision whose contents may change under the same name.
pub const MAIN_REVISION: &str = "main";

/// One file, requested on behalf of an engine and task.
#[derive(Debug, Clone, Default)]
pub struct FileRequest {
    pub engine_id: String,
    pub task_name: String,
    /// `owner/name` on the configured hub.
    pub model: String,
    pub revision: String,
    pub file: String,
    /// Groups the files of one logical download for telemetry.
    pub session_id: Option<String>,
    pub feature_id: Option<String>,
}

/// A cached file, ready to be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFile {
    pub key: FileKey,
    /// Path within the cache's blob store.
    pub blob_path: PathBuf,
    /// Filesystem path, when the cache is on local disk.
    pub local_path: Option<PathBuf>,
    pub headers: Headers,
}

pub struct HubClient {
    cache: Arc<ModelCache>,
    transport: TransportHandle,
    telemetry: TelemetryHandle,
    policy: UrlPolicy,
    urls: UrlOptions,
    file_pattern: Regex,
    etag_timeout: Duration,
    sessions: Sessions,
    in_flight: KeyedLocks<FileKey>,
}

impl HubClient {
    pub fn new(
        cache: Arc<ModelCache>,
        transport: TransportHandle,
        telemetry: TelemetryHandle,
        settings: &HubSettings,
    ) -> Result<Self> {
        let file_pattern = Regex::new(&settings.file_pattern)
            .or_raise(|| ErrorKind::InvalidInput("file pattern"))?;
        Ok(Self {
            cache,
            transport,
            telemetry,
            policy: UrlPolicy::from_settings(settings),
            urls: UrlOptions::from_settings(settings)?,
            file_pattern,
            etag_timeout: Duration::from_millis(settings.etag_timeout_ms),
            sessions: Sessions::default(),
            in_flight: KeyedLocks::default(),
        })
    }

    /// A client over a filesystem cache and the network, as configured.
    pub async fn from_config(config: &Config, telemetry: TelemetryHandle) -> Result<Self> {
        let cache = ModelCache::from_settings(&config.cache, Arc::clone(&telemetry))
            .await
            .or_raise(|| ErrorKind::Cache)?;
        let transport = Arc::new(ReqwestTransport::new()?);
        Self::new(Arc::new(cache), transport, telemetry, &config.hub)
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    pub fn parse_url(&self, url: &str) -> Result<ModelUrl> {
        self.urls.parse(url)
    }

    /// Cache key of a hub model file; models are namespaced by hub host.
    pub fn file_key(&self, model: &str, revision: &str, file: &str) -> FileKey {
        FileKey::new(format!("{}/{model}", self.urls.hostname()), revision, file)
    }

    /// The origin's current ETag for `url`.
    ///
    /// Only a policy rejection is an error. Unreachable origins, timeouts and
    /// responses without an ETag all come back as `None`.
    #[instrument(skip_all, fields(%url))]
    pub async fn get_etag(&self, url: &Url) -> Result<Option<String>> {
        self.policy.check(url.as_str())?;
        match tokio::time::timeout(self.etag_timeout, self.transport.head(url)).await {
            Ok(Ok(headers)) => Ok(headers.into_iter().find(|(name, _)| name.eq_ignore_ascii_case("etag")).map(|(_, v)| v)),
            Ok(Err(err)) => {
                tracing::debug!(error = ?err, "ETag lookup failed");
                Ok(None)
            },
            Err(_) => {
                tracing::debug!(timeout = ?self.etag_timeout, "ETag lookup timed out");
                Ok(None)
            },
        }
    }

    /// Serve a file from the cache, downloading it first when needed.
    ///
    /// Pinned revisions are trusted whenever both headers and blob are
    /// present. `main` is revalidated against the origin's ETag, and the
    /// cached copy is kept when the origin can't be reached. Concurrent
    /// requests for the same file wait on each other, so only the first one
    /// downloads.
    #[instrument(skip_all, fields(model = %request.model, revision = %request.revision, file = %request.file))]
    pub async fn get_model_data_as_file(
        &self,
        request: &FileRequest,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<ModelFile> {
        check_input(&request.model, &request.revision, &request.file, &self.file_pattern)?;
        let url = self.urls.file_url(&request.model, &request.revision, &request.file)?;
        let key = self.file_key(&request.model, &request.revision, &request.file);
        let reporter = Reporter::new(progress, ProgressMetadata {
            model: request.model.clone(),
            revision: request.revision.clone(),
            file: request.file.clone(),
            url: url.to_string(),
            task_name: request.task_name.clone(),
        });

        if let Err(err) = self.policy.check(url.as_str()) {
            // A denied origin must not keep being served from the cache.
            if let Err(purge) = self.purge_denied(&key).await {
                tracing::warn!(%key, error = ?purge, "Failed to purge model from denied origin");
            }
            return Err(err);
        }

        let _in_flight = self.in_flight.lock(&key).await;
        if self.is_cached(&url, &key).await? {
            reporter.status(ProgressKind::LoadFromCache, ProgressStatus::Initiate, true);
            self.cache.update_task(&request.engine_id, &request.task_name, &key).await.or_raise(|| ErrorKind::Cache)?;
            let headers = self.cache.touch(&key).await.or_raise(|| ErrorKind::Cache)?.ok_or_raise(|| ErrorKind::Cache)?;
            reporter.status(ProgressKind::LoadFromCache, ProgressStatus::Done, true);
            tracing::debug!("Serving from cache");
            return Ok(self.model_file(key, headers));
        }

        reporter.status(ProgressKind::Download, ProgressStatus::Initiate, true);
        let started = Instant::now();
        if let Some(session_id) = &request.session_id {
            let opened = self.sessions.start(session_id, || Session {
                started,
                engine_id: request.engine_id.clone(),
                feature_id: request.feature_id.clone(),
                model: request.model.clone(),
                revision: request.revision.clone(),
                failed: false,
            });
            if opened {
                self.record(request, DownloadStep::StartDownload, Duration::ZERO, None);
            }
        }
        self.record(request, DownloadStep::StartFileDownload, Duration::ZERO, None);

        let result = self.download(request, &url, &key, &reporter).await;
        if let Some(session_id) = &request.session_id {
            self.sessions.record_file(session_id, result.is_ok());
        }
        match result {
            Ok(headers) => {
                reporter.status(ProgressKind::Download, ProgressStatus::Done, true);
                self.record(request, DownloadStep::EndFileDownloadSuccess, started.elapsed(), None);
                tracing::info!(bytes = headers.file_size, "Downloaded model file");
                Ok(self.model_file(key, headers))
            },
            Err(err) => {
                self.record(request, DownloadStep::EndFileDownloadFailed, started.elapsed(), Some(err.name()));
                reporter.status(ProgressKind::Download, ProgressStatus::Done, false);
                tracing::warn!(error = ?err, "Model file download failed");
                Err(err.raise(ErrorKind::Download(url.to_string())))
            },
        }
    }

    /// Close a download session, emitting its final telemetry event.
    ///
    /// Returns `false` without emitting anything when the session never
    /// started a download or was already closed. The session counts as failed
    /// when `error` is given or when any of its files failed.
    pub fn notify_model_download_complete(&self, session_id: &str, error: Option<&str>) -> bool {
        let Some(session) = self.sessions.finish(session_id) else {
            return false;
        };
        let (step, error) = match (error, session.failed) {
            (Some(error), _) => (DownloadStep::EndDownloadFailed, Some(error.to_string())),
            (None, true) => (DownloadStep::EndDownloadFailed, Some("FileDownloadFailed".to_string())),
            (None, false) => (DownloadStep::EndDownloadSuccess, None),
        };
        self.telemetry.record(TelemetryEvent::ModelDownload(DownloadEvent {
            download_id: session_id.to_string(),
            feature_id: session.feature_id,
            engine_id: session.engine_id,
            model: session.model,
            revision: session.revision,
            step,
            duration: session.started.elapsed(),
            error,
        }));
        true
    }

    async fn is_cached(&self, url: &Url, key: &FileKey) -> Result<bool> {
        if key.revision != MAIN_REVISION || url.scheme() == "file" {
            return self.cache.file_exists(key).await.or_raise(|| ErrorKind::Cache);
        }
        let remote = self.get_etag(url).await?;
        let Some(cached) = self.cache.get_headers(key).await.or_raise(|| ErrorKind::Cache)? else {
            return Ok(false);
        };
        if remote.is_some_and(|remote| remote != cached.etag) {
            tracing::debug!(cached = %cached.etag, "ETag changed");
            return Ok(false);
        }
        self.cache.file_exists(key).await.or_raise(|| ErrorKind::Cache)
    }

    /// Stream the file to its staging path and admit it, discarding the staged
    /// copy if either step fails. A previously cached copy stays untouched
    /// until admission succeeds.
    async fn download(&self, request: &FileRequest, url: &Url, key: &FileKey, reporter: &Reporter<'_>) -> Result<Headers> {
        let response = self.transport.get(url).await?;
        let headers = ResponseHeaders::from_pairs(response.headers.iter().map(|(n, v)| (n.as_str(), v.as_str())));
        let total = headers.content_length;
        let mut last = None;
        let stored = modelhub_storage::download(self.cache.backend(), &self.cache.staging_path(key), response.body, |written| {
            reporter.bytes(last.is_none(), written, written - last.unwrap_or(0), total);
            last = Some(written);
        })
        .await
        .map_err(|err| {
            let kind = match &*err {
                StorageErrorKind::Stream(_) => ErrorKind::Transport,
                _ => ErrorKind::Cache,
            };
            err.raise(kind)
        });
        let admitted = match stored {
            Ok(written) => self
                .cache
                .put(PutRequest {
                    engine_id: request.engine_id.clone(),
                    task_name: request.task_name.clone(),
                    key: key.clone(),
                    payload: Payload::Stored,
                    headers: headers.with_file_size(written),
                })
                .await
                .or_raise(|| ErrorKind::Cache),
            Err(err) => Err(err),
        };
        if let Err(err) = admitted {
            if let Err(discard) = self.cache.discard_staged(key).await {
                tracing::warn!(error = ?discard, "Failed to discard partial download");
            }
            return Err(err);
        }
        self.cache.get_headers(key).await.or_raise(|| ErrorKind::Cache)?.ok_or_raise(|| ErrorKind::Cache)
    }

    async fn purge_denied(&self, key: &FileKey) -> modelhub_cache::error::Result<()> {
        if self.cache.get_headers(key).await?.is_none() {
            return Ok(());
        }
        let purged = self
            .cache
            .delete_models(DeleteModels {
                selector: TaskSelector::ModelRevision {
                    model: key.model.clone(),
                    revision: key.revision.clone(),
                },
                filter: None,
                deleted_by: "url_policy".to_string(),
            })
            .await?;
        tracing::info!(%key, files = purged.len(), "Purged model from denied origin");
        Ok(())
    }

    fn model_file(&self, key: FileKey, headers: Headers) -> ModelFile {
        ModelFile {
            blob_path: self.cache.blob_path(&key),
            local_path: self.cache.local_path(&key),
            key,
            headers,
        }
    }

    fn record(&self, request: &FileRequest, step: DownloadStep, duration: Duration, error: Option<&str>) {
        self.telemetry.record(TelemetryEvent::ModelDownload(DownloadEvent {
            download_id: request.session_id.clone().unwrap_or_default(),
            feature_id: request.feature_id.clone(),
            engine_id: request.engine_id.clone(),
            model: request.model.clone(),
            revision: request.revision.clone(),
            step,
            duration,
            error: error.map(str::to_string),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Progress;
    use crate::transport::mock::MockTransport;
    use modelhub_cache::telemetry::RecordingTelemetry;
    use modelhub_cache::{CacheOptions, Database, NO_ETAG};
    use modelhub_config::{RuleFilter, UrlRule};
    use modelhub_storage::StorageBackend;
    use modelhub_storage::backend::MockBackend;
    use rstest::{fixture, rstest};
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;

    const ROOT: &str = "https://hub.example/";

    struct Harness {
        client: HubClient,
        cache: Arc<ModelCache>,
        backend: MockBackend,
        transport: Arc<MockTransport>,
        telemetry: Arc<RecordingTelemetry>,
    }
    impl Harness {
        /// Another client over the same cache, with different hub settings.
        fn client_with(&self, settings: &HubSettings) -> HubClient {
            HubClient::new(Arc::clone(&self.cache), self.transport.clone(), self.telemetry.clone(), settings).unwrap()
        }
    }

    fn settings() -> HubSettings {
        HubSettings {
            root_url: ROOT.to_string(),
            ..HubSettings::default()
        }
    }

    async fn harness_with(settings: HubSettings, max_size_bytes: u64) -> Harness {
        let db = Database::connect_in_memory().await.unwrap();
        let backend = MockBackend::default();
        let telemetry = Arc::new(RecordingTelemetry::default());
        let options = CacheOptions {
            max_size_bytes,
            ..CacheOptions::default()
        };
        let cache = Arc::new(ModelCache::open(&db, Arc::new(backend.clone()), telemetry.clone(), options).await.unwrap());
        let transport = Arc::new(MockTransport::default());
        let client = HubClient::new(Arc::clone(&cache), transport.clone(), telemetry.clone(), &settings).unwrap();
        Harness { client, cache, backend, transport, telemetry }
    }

    #[fixture]
    async fn harness() -> Harness {
        harness_with(settings(), 1024 * 1024).await
    }

    fn request(revision: &str) -> FileRequest {
        FileRequest {
            engine_id: "e1".to_string(),
            task_name: "classify".to_string(),
            model: "org/m".to_string(),
            revision: revision.to_string(),
            file: "w.bin".to_string(),
            session_id: Some("s1".to_string()),
            feature_id: Some("alt-text".to_string()),
        }
    }

    fn url(revision: &str) -> String {
        format!("{ROOT}org/m/{revision}/w.bin")
    }

    fn key(revision: &str) -> FileKey {
        FileKey::new("hub.example/org/m", revision, "w.bin")
    }

    #[rstest]
    #[tokio::test]
    async fn test_download_then_serve_pinned_from_cache(#[future] harness: Harness) {
        let h = harness.await;
        h.transport.serve(&url("v1"), &[5u8; 500], Some("\"abc\""));

        let file = h.client.get_model_data_as_file(&request("v1"), None).await.unwrap();
        assert_eq!(file.key, key("v1"));
        assert_eq!(file.blob_path, Path::new("models/hub.example/org/m/v1/w.bin"));
        assert_eq!(file.local_path, None);
        assert_eq!(file.headers.file_size, 500);
        assert_eq!(file.headers.etag(), Some("\"abc\""));
        assert_eq!(h.backend.read(&file.blob_path).await.unwrap().len(), 500);

        let again = h.client.get_model_data_as_file(&request("v1"), None).await.unwrap();
        assert_eq!(again.headers.etag, file.headers.etag);
        assert!(again.headers.last_used >= file.headers.last_used);
        // Pinned revisions never revalidate.
        assert_eq!((h.transport.heads(), h.transport.gets()), (0, 1));
        assert_eq!(
            h.telemetry.download_steps(),
            vec![DownloadStep::StartDownload, DownloadStep::StartFileDownload, DownloadStep::EndFileDownloadSuccess]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_progress_events(#[future] harness: Harness) {
        let h = harness.await;
        h.transport.serve(&url("v1"), &[5u8; 400], None);
        let seen = Mutex::new(Vec::new());
        let callback = |p: Progress| seen.lock().unwrap().push((p.kind, p.status, p.ok, p.total_loaded));

        h.client.get_model_data_as_file(&request("v1"), Some(&callback)).await.unwrap();
        h.client.get_model_data_as_file(&request("v1"), Some(&callback)).await.unwrap();
        assert_eq!(seen.into_inner().unwrap(), vec![
            (ProgressKind::Download, ProgressStatus::Initiate, true, 0),
            (ProgressKind::Download, ProgressStatus::SizeEstimate, true, 200),
            (ProgressKind::Download, ProgressStatus::InProgress, true, 400),
            (ProgressKind::Download, ProgressStatus::Done, true, 0),
            (ProgressKind::LoadFromCache, ProgressStatus::Initiate, true, 0),
            (ProgressKind::LoadFromCache, ProgressStatus::Done, true, 0),
        ]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_main_revalidation(#[future] harness: Harness) {
        let h = harness.await;
        h.transport.serve(&url("main"), b"first", Some("\"1\""));
        h.client.get_model_data_as_file(&request("main"), None).await.unwrap();
        assert_eq!(h.transport.gets(), 1);

        // Same ETag: served from cache.
        h.client.get_model_data_as_file(&request("main"), None).await.unwrap();
        assert_eq!((h.transport.heads(), h.transport.gets()), (2, 1));

        // Origin unreachable: the cached copy is trusted.
        h.transport.offline_heads.store(true, Ordering::SeqCst);
        h.client.get_model_data_as_file(&request("main"), None).await.unwrap();
        assert_eq!(h.transport.gets(), 1);
        h.transport.offline_heads.store(false, Ordering::SeqCst);

        // Changed ETag: downloaded again.
        h.transport.serve(&url("main"), b"second!", Some("\"2\""));
        let file = h.client.get_model_data_as_file(&request("main"), None).await.unwrap();
        assert_eq!(h.transport.gets(), 2);
        assert_eq!(file.headers.etag, "\"2\"");
        assert_eq!(h.backend.read(&file.blob_path).await.unwrap(), b"second!");
    }

    #[rstest]
    #[tokio::test]
    async fn test_main_without_etag_stays_cached(#[future] harness: Harness) {
        let h = harness.await;
        h.transport.serve(&url("main"), b"weights", None);
        let file = h.client.get_model_data_as_file(&request("main"), None).await.unwrap();
        assert_eq!(file.headers.etag, NO_ETAG);
        h.client.get_model_data_as_file(&request("main"), None).await.unwrap();
        assert_eq!(h.transport.gets(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_missing_blob_is_downloaded_again(#[future] harness: Harness) {
        let h = harness.await;
        h.transport.serve(&url("v1"), b"weights", None);
        let file = h.client.get_model_data_as_file(&request("v1"), None).await.unwrap();
        h.backend.delete(&file.blob_path).await.unwrap();

        let file = h.client.get_model_data_as_file(&request("v1"), None).await.unwrap();
        assert_eq!(h.transport.gets(), 2);
        assert_eq!(h.backend.read(&file.blob_path).await.unwrap(), b"weights");
    }

    #[rstest]
    #[tokio::test]
    async fn test_denied_origin_purges_cached_model(#[future] harness: Harness) {
        let h = harness.await;
        h.transport.serve(&url("v1"), b"weights", None);
        h.client.get_model_data_as_file(&request("v1"), None).await.unwrap();

        let denying = h.client_with(&HubSettings {
            rules: vec![UrlRule {
                filter: RuleFilter::Deny,
                url_prefix: format!("{ROOT}org/"),
            }],
            ..settings()
        });
        let err = denying.get_model_data_as_file(&request("v1"), None).await.unwrap_err();
        assert!(err.is_forbidden());
        assert_eq!(h.cache.get_headers(&key("v1")).await.unwrap(), None);
        assert!(!h.backend.exists(Path::new("models/hub.example/org/m/v1/w.bin")).await.unwrap());
        assert_eq!(h.transport.gets(), 1);

        let url = Url::parse(&url("main")).unwrap();
        assert!(denying.get_etag(&url).await.unwrap_err().is_forbidden());
        assert_eq!(h.transport.heads(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_concurrent_requests_share_one_download(#[future] harness: Harness) {
        let h = harness.await;
        h.transport.serve(&url("v1"), &[1u8; 64], None);
        let (req_a, req_b) = (request("v1"), request("v1"));
        let (a, b) = tokio::join!(
            h.client.get_model_data_as_file(&req_a, None),
            h.client.get_model_data_as_file(&req_b, None),
        );
        assert_eq!(a.unwrap().headers.file_size, 64);
        assert_eq!(b.unwrap().headers.file_size, 64);
        assert_eq!(h.transport.gets(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_failed_download(#[future] harness: Harness) {
        let h = harness.await;
        h.transport.serve(&url("v1"), b"weights", None);
        h.transport.broken_bodies.store(true, Ordering::SeqCst);

        let err = h.client.get_model_data_as_file(&request("v1"), None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Download(url) if url.ends_with("/org/m/v1/w.bin")));
        assert_eq!(h.cache.get_headers(&key("v1")).await.unwrap(), None);
        assert!(!h.backend.exists(Path::new("models/hub.example/org/m/v1/w.bin")).await.unwrap());

        let failed = h.telemetry.events().into_iter().find_map(|event| match event {
            TelemetryEvent::ModelDownload(event) if event.step == DownloadStep::EndFileDownloadFailed => Some(event),
            _ => None,
        });
        assert_eq!(failed.unwrap().error.as_deref(), Some("Transport"));

        assert!(h.client.notify_model_download_complete("s1", None));
        assert_eq!(h.telemetry.download_steps().last(), Some(&DownloadStep::EndDownloadFailed));
    }

    #[rstest]
    #[tokio::test]
    async fn test_missing_remote_file(#[future] harness: Harness) {
        let h = harness.await;
        let err = h.client.get_model_data_as_file(&request("v1"), None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Download(_)));
        assert_eq!(h.telemetry.download_steps().last(), Some(&DownloadStep::EndFileDownloadFailed));
    }

    #[tokio::test]
    async fn test_over_quota_download_is_discarded() {
        let h = harness_with(settings(), 100).await;
        h.transport.serve(&url("v1"), &[0u8; 200], None);
        let err = h.client.get_model_data_as_file(&request("v1"), None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Download(_)));
        assert_eq!(h.cache.usage().await.unwrap(), 0);
        assert_eq!(h.cache.get_headers(&key("v1")).await.unwrap(), None);
        // Nothing is left staged either.
        assert!(h.backend.list(None).await.unwrap().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_session_finalizer_runs_once(#[future] harness: Harness) {
        let h = harness.await;
        assert!(!h.client.notify_model_download_complete("s1", None));

        h.transport.serve(&url("v1"), b"a", None);
        h.transport.serve(&format!("{ROOT}org/m/v1/config.json"), b"{}", None);
        h.client.get_model_data_as_file(&request("v1"), None).await.unwrap();
        let config = FileRequest {
            file: "config.json".to_string(),
            ..request("v1")
        };
        h.client.get_model_data_as_file(&config, None).await.unwrap();

        assert!(h.client.notify_model_download_complete("s1", None));
        assert!(!h.client.notify_model_download_complete("s1", None));
        assert_eq!(h.telemetry.download_steps(), vec![
            DownloadStep::StartDownload,
            DownloadStep::StartFileDownload,
            DownloadStep::EndFileDownloadSuccess,
            DownloadStep::StartFileDownload,
            DownloadStep::EndFileDownloadSuccess,
            DownloadStep::EndDownloadSuccess,
        ]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_invalid_input_never_reaches_the_network(#[future] harness: Harness) {
        let h = harness.await;
        let traversal = FileRequest {
            file: "../../etc/passwd".to_string(),
            ..request("v1")
        };
        let err = h.client.get_model_data_as_file(&traversal, None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidInput("file")));
        assert_eq!(h.transport.gets(), 0);
        assert!(h.telemetry.events().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_parse_url(#[future] harness: Harness) {
        let h = harness.await;
        let parsed = h.client.parse_url("https://hub.example/org/m/v1/onnx/w.bin").unwrap();
        assert_eq!(parsed.model_with_hostname, "hub.example/org/m");
        assert_eq!(h.client.file_key(&parsed.model, &parsed.revision, &parsed.file), FileKey::new("hub.example/org/m", "v1", "onnx/w.bin"));
    }

    #[tokio::test]
    async fn test_bundled_models_skip_revalidation() {
        let bundle = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(bundle.path().join("org/m/main")).await.unwrap();
        tokio::fs::write(bundle.path().join("org/m/main/w.bin"), b"bundled").await.unwrap();
        let root = Url::from_directory_path(bundle.path()).unwrap();

        let h = harness_with(settings(), 1024).await;
        let client = HubClient::new(
            Arc::clone(&h.cache),
            Arc::new(ReqwestTransport::new().unwrap()),
            h.telemetry.clone(),
            &HubSettings {
                root_url: root.to_string(),
                ..HubSettings::default()
            },
        )
        .unwrap();
        let file = client.get_model_data_as_file(&request("main"), None).await.unwrap();
        assert_eq!(file.key.model, "local/org/m");
        assert_eq!(h.backend.read(&file.blob_path).await.unwrap(), b"bundled");

        tokio::fs::remove_file(bundle.path().join("org/m/main/w.bin")).await.unwrap();
        // No HEAD for bundled files; the cached copy is served.
        client.get_model_data_as_file(&request("main"), None).await.unwrap();
    }
}
