//! Progress notifications for a single file request.

use derive_more::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProgressKind {
    #[display("LOAD_FROM_CACHE")]
    LoadFromCache,
    #[display("DOWNLOAD")]
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProgressStatus {
    #[display("INITIATE")]
    Initiate,
    /// First byte-level update; `total` is the origin's announced size.
    #[display("SIZE_ESTIMATE")]
    SizeEstimate,
    #[display("IN_PROGRESS")]
    InProgress,
    #[display("DONE")]
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressMetadata {
    pub model: String,
    pub revision: String,
    pub file: String,
    pub url: String,
    pub task_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub kind: ProgressKind,
    pub status: ProgressStatus,
    pub ok: bool,
    pub metadata: ProgressMetadata,
    /// Percentage, when the total size is known.
    pub progress: Option<f64>,
    pub total_loaded: u64,
    /// Bytes added since the previous update.
    pub current_loaded: u64,
    pub total: Option<u64>,
}

pub type ProgressCallback<'a> = &'a (dyn Fn(Progress) + Send + Sync);

/// Builds and delivers updates for one file; a missing callback is a no-op.
pub(crate) struct Reporter<'a> {
    callback: Option<ProgressCallback<'a>>,
    metadata: ProgressMetadata,
}
impl<'a> Reporter<'a> {
    pub fn new(callback: Option<ProgressCallback<'a>>, metadata: ProgressMetadata) -> Self {
        Self { callback, metadata }
    }

    pub fn status(&self, kind: ProgressKind, status: ProgressStatus, ok: bool) {
        self.emit(Progress {
            kind,
            status,
            ok,
            metadata: self.metadata.clone(),
            progress: None,
            total_loaded: 0,
            current_loaded: 0,
            total: None,
        });
    }

    /// A download byte-count update. `first` tags it as the size estimate.
    pub fn bytes(&self, first: bool, total_loaded: u64, current_loaded: u64, total: Option<u64>) {
        self.emit(Progress {
            kind: ProgressKind::Download,
            status: match first {
                true => ProgressStatus::SizeEstimate,
                false => ProgressStatus::InProgress,
            },
            ok: true,
            metadata: self.metadata.clone(),
            progress: total.filter(|t| *t > 0).map(|t| total_loaded as f64 * 100.0 / t as f64),
            total_loaded,
            current_loaded,
            total,
        });
    }

    fn emit(&self, progress: Progress) {
        if let Some(callback) = self.callback {
            callback(progress);
        }
    }
}
