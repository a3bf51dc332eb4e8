//! Test-run reporting.
//!
//! A [`Reporter`] stamps each step outcome with the run id and a timestamp
//! and fans it out to any number of [`ReportSink`]s. Sink failures are
//! logged and swallowed: reporting never fails a test.
//!
//! Built-in sinks:
//! - [`TracingSink`] emits each event through `tracing`
//! - [`JsonlSink`] appends JSON Lines to a file (screenshots omitted)
//! - [`MemorySink`] keeps events in memory for assertions
//! - [`BroadcastSink`] forwards events to live subscribers

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::uidrive_dir;
use crate::page::Page;

/// Outcome of a reported step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Info,
    Pass,
    Fail,
    Skip,
}

/// One reported step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEvent {
    pub id: Uuid,
    /// Shared by every event of one [`Reporter`].
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Name of the test the step belongs to.
    pub test: String,
    pub status: ReportStatus,
    pub message: String,
    /// Base64-encoded PNG attached to the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Arc<String>>,
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destination for report events.
pub trait ReportSink: Send + Sync {
    fn notify(&self, event: &ReportEvent) -> Result<(), ReportError>;
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn notify(&self, event: &ReportEvent) -> Result<(), ReportError> {
        let screenshot = event.screenshot.is_some();
        match event.status {
            ReportStatus::Fail => {
                error!(test = %event.test, screenshot, "FAIL: {}", event.message)
            }
            ReportStatus::Skip => warn!(test = %event.test, "SKIP: {}", event.message),
            ReportStatus::Pass => info!(test = %event.test, "PASS: {}", event.message),
            ReportStatus::Info => info!(test = %event.test, "{}", event.message),
        }
        Ok(())
    }
}

/// Appends events as JSON Lines.
///
/// Screenshots are dropped from the file to keep it small.
pub struct JsonlSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::options().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// A sink writing to `~/.uidrive/reports/{name}_{timestamp}.jsonl`.
    pub fn in_reports_dir(name: &str) -> Result<Self, ReportError> {
        Self::in_dir(uidrive_dir().join("reports"), name)
    }

    /// A sink writing to `{dir}/{name}_{timestamp}.jsonl`.
    pub fn in_dir(dir: impl AsRef<Path>, name: &str) -> Result<Self, ReportError> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        Self::create(dir.as_ref().join(format!("{name}_{timestamp}.jsonl")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonlSink {
    fn notify(&self, event: &ReportEvent) -> Result<(), ReportError> {
        let line = serde_json::to_string(&ReportEvent {
            screenshot: None,
            ..event.clone()
        })?;
        let mut writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for JsonlSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlSink").field("path", &self.path).finish()
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ReportEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl ReportSink for MemorySink {
    fn notify(&self, event: &ReportEvent) -> Result<(), ReportError> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Forwards events to live subscribers. Having none is not an error.
#[derive(Debug)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ReportEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReportEvent> {
        self.tx.subscribe()
    }
}

impl ReportSink for BroadcastSink {
    fn notify(&self, event: &ReportEvent) -> Result<(), ReportError> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

/// Fans step outcomes out to the configured sinks.
pub struct Reporter {
    run_id: Uuid,
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    /// A reporter with a fresh run id and no sinks.
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Build an event and deliver it to every sink.
    pub fn record(
        &self,
        test: &str,
        status: ReportStatus,
        message: impl Into<String>,
        screenshot: Option<String>,
    ) -> ReportEvent {
        let event = ReportEvent {
            id: Uuid::new_v4(),
            run_id: self.run_id,
            timestamp: Utc::now(),
            test: test.to_string(),
            status,
            message: message.into(),
            screenshot: screenshot.map(Arc::new),
        };
        for sink in &self.sinks {
            if let Err(e) = sink.notify(&event) {
                warn!(error = %e, "report sink failed");
            }
        }
        event
    }

    pub fn info(&self, test: &str, message: impl Into<String>) -> ReportEvent {
        self.record(test, ReportStatus::Info, message, None)
    }

    pub fn pass(&self, test: &str, message: impl Into<String>) -> ReportEvent {
        self.record(test, ReportStatus::Pass, message, None)
    }

    pub fn fail(&self, test: &str, message: impl Into<String>) -> ReportEvent {
        self.record(test, ReportStatus::Fail, message, None)
    }

    pub fn skip(&self, test: &str, message: impl Into<String>) -> ReportEvent {
        self.record(test, ReportStatus::Skip, message, None)
    }

    /// Report a failure with a screenshot of the current screen attached.
    ///
    /// If the screenshot cannot be taken the failure is reported without one.
    pub async fn fail_with_screenshot(&self, test: &str, message: impl Into<String>, page: &Page) -> ReportEvent {
        let screenshot = match page.screenshot().await {
            Ok(png) => Some(png),
            Err(e) => {
                warn!(error = %e, "failure screenshot unavailable");
                None
            }
        };
        self.record(test, ReportStatus::Fail, message, screenshot)
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("run_id", &self.run_id)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
