//! Fire-and-forget lifecycle events.
//!
//! Recording an event must never fail or block the operation that emits it,
//! so [`Telemetry::record`] is synchronous and infallible.

use derive_more::Display;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type TelemetryHandle = Arc<dyn Telemetry + Send + Sync>;

pub trait Telemetry {
    fn record(&self, event: TelemetryEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DownloadStep {
    #[display("start_download")]
    StartDownload,
    #[display("start_file_download")]
    StartFileDownload,
    #[display("end_file_download_success")]
    EndFileDownloadSuccess,
    #[display("end_file_download_failed")]
    EndFileDownloadFailed,
    #[display("end_download_success")]
    EndDownloadSuccess,
    #[display("end_download_failed")]
    EndDownloadFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadEvent {
    /// The download session this event belongs to.
    pub download_id: String,
    pub feature_id: Option<String>,
    pub engine_id: String,
    pub model: String,
    pub revision: String,
    pub step: DownloadStep,
    /// Time since the file (or session) started downloading.
    pub duration: Duration,
    /// Kind of error that ended a failed step.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    /// Files were purged. `None` means "every model" / "every revision".
    ModelDeletion {
        model: Option<String>,
        revision: Option<String>,
        deleted_by: String,
    },
    ModelDownload(DownloadEvent),
}

/// Emits every event as a `tracing` event on the `modelhub::telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;
impl Telemetry for TracingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::ModelDeletion { model, revision, deleted_by } => tracing::info!(
                target: "modelhub::telemetry",
                model = model.as_deref().unwrap_or("*"),
                revision = revision.as_deref().unwrap_or("*"),
                deleted_by = %deleted_by,
                "model deletion"
            ),
            TelemetryEvent::ModelDownload(event) => tracing::info!(
                target: "modelhub::telemetry",
                download_id = %event.download_id,
                feature_id = event.feature_id.as_deref(),
                engine_id = %event.engine_id,
                model = %event.model,
                revision = %event.revision,
                step = %event.step,
                duration_ms = event.duration.as_millis() as u64,
                error = event.error.as_deref(),
                "model download"
            ),
        }
    }
}

/// Keeps every event in memory for later inspection.
///
/// Not gated behind `#[cfg(test)]` so dependant crates can assert on events
/// in their own tests.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}
impl RecordingTelemetry {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Download steps in the order they were recorded.
    pub fn download_steps(&self) -> Vec<DownloadStep> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TelemetryEvent::ModelDownload(download) => Some(download.step),
                TelemetryEvent::ModelDeletion { .. } => None,
            })
            .collect()
    }

    pub fn deletions(&self) -> usize {
        self.events().iter().filter(|event| matches!(event, TelemetryEvent::ModelDeletion { .. })).count()
    }
}
impl Telemetry for RecordingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
