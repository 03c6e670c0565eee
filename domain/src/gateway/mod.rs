//! Contract with the camera/NVR gateway that exports recorded footage.
//!
//! The orchestrator only ever talks to a [`CameraGateway`]; the HTTP client in
//! [`nvr_http`] is the production implementation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset};
use entity::Id;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use utoipa::ToSchema;

pub mod nvr_http;

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl TimeWindow {
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Splits `window` into consecutive segments no longer than `segment_duration`.
///
/// The last segment is shorter when the window is not an exact multiple of the
/// segment length. An empty window, or a non-positive segment length, yields no segments.
pub fn plan_segments(window: TimeWindow, segment_duration: Duration) -> Vec<TimeWindow> {
    if window.is_empty() || segment_duration <= Duration::zero() {
        return Vec::new();
    }

    let mut segments = Vec::new();
    let mut start = window.start;
    while start < window.end {
        let end = (start + segment_duration).min(window.end);
        segments.push(TimeWindow::new(start, end));
        start = end;
    }
    segments
}

/// One export job accepted by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportTask {
    /// 1-based position of the segment within the recording window.
    pub chunk_number: i32,
    pub task_id: String,
    pub window: TimeWindow,
}

/// State of an export job as reported by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportStatus {
    Pending,
    Ready,
    Failed(String),
}

/// A chunk file available on local disk.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedChunk {
    pub path: PathBuf,
    pub size_bytes: i64,
    /// True when the file was already present and no transfer happened.
    pub cached: bool,
}

/// Result of probing whether a court has a working camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CameraAvailability {
    pub court_id: Id,
    pub available: bool,
    pub camera_id: Option<String>,
    /// Why the camera cannot be used, when `available` is false.
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Gateway unreachable or answering with a server error.
    Unavailable,
    /// Gateway refused the export request.
    Rejected,
    Timeout,
    RateLimited,
    /// No camera is provisioned for the court, or the export task is unknown.
    NotFound,
    /// The requested window is older than the NVR keeps footage.
    OutOfRetention,
    /// The gateway answered with something we cannot interpret.
    Protocol,
    /// Writing the fetched file to local disk failed.
    Io,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Transient errors are worth retrying; everything else fails the recording at once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            GatewayErrorKind::Unavailable
                | GatewayErrorKind::Timeout
                | GatewayErrorKind::RateLimited
                | GatewayErrorKind::Io
        )
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "camera gateway error ({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for GatewayError {}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::new(GatewayErrorKind::Io, err.to_string())
    }
}

#[async_trait]
pub trait CameraGateway: Send + Sync {
    /// Checks that the court has a provisioned, reachable camera.
    async fn check_availability(&self, court_id: Id) -> Result<CameraAvailability, GatewayError>;

    /// Splits `window` into segments and starts one export job per segment.
    async fn request_export(
        &self,
        court_id: Id,
        window: TimeWindow,
    ) -> Result<Vec<ExportTask>, GatewayError>;

    /// Non-blocking status check of one export job.
    async fn poll_export_status(&self, task_id: &str) -> Result<ExportStatus, GatewayError>;

    /// Downloads a ready export to `destination`.
    ///
    /// Idempotent: when `destination` already holds a complete file, nothing is
    /// transferred and its metadata is returned.
    async fn fetch_chunk(
        &self,
        task_id: &str,
        destination: &Path,
    ) -> Result<FetchedChunk, GatewayError>;
}

/// Returns the metadata of an already fetched chunk file, if one exists and is non-empty.
pub(crate) async fn existing_chunk(destination: &Path) -> Option<FetchedChunk> {
    let metadata = tokio::fs::metadata(destination).await.ok()?;
    (metadata.is_file() && metadata.len() > 0).then(|| FetchedChunk {
        path: destination.to_path_buf(),
        size_bytes: metadata.len() as i64,
        cached: true,
    })
}
