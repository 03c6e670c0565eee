//! HTTP client for the NVR export gateway.
//!
//! Endpoints used:
//!
//! - `GET  /api/v1/courts/{court_id}/camera` -> `{ "camera_id": "...", "online": true }`
//! - `POST /api/v1/exports` with `{ "court_id", "segments": [{ "chunk_number", "start", "end" }] }`
//!   -> `{ "tasks": [{ "chunk_number", "task_id" }] }`
//! - `GET  /api/v1/exports/{task_id}` -> `{ "status": "pending" | "ready" | "failed", "error": null }`
//! - `GET  /api/v1/exports/{task_id}/file` -> raw chunk bytes

use super::{
    existing_chunk, plan_segments, CameraAvailability, CameraGateway, ExportStatus, ExportTask,
    FetchedChunk, GatewayError, GatewayErrorKind, TimeWindow,
};
use crate::backoff::Backoff;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use entity::Id;
use futures_util::StreamExt;
use log::*;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::RetryTransientMiddleware;
use serde::{Deserialize, Serialize};
use service::config::Config;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone)]
pub struct NvrGatewaySettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub segment_duration: Duration,
    pub connect_timeout: Duration,
    /// Retries of a single HTTP request on connection errors and 5xx/429 answers.
    pub max_http_retries: u32,
    pub backoff: Backoff,
}

impl NvrGatewaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.camera_gateway_url().trim_end_matches('/').to_string(),
            api_key: config.camera_gateway_api_key(),
            segment_duration: config.segment_duration(),
            connect_timeout: Duration::from_secs(10),
            max_http_retries: 3,
            backoff: Backoff::new(Duration::from_millis(500), Duration::from_secs(10)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CameraResponse {
    camera_id: Option<String>,
    #[serde(default)]
    online: bool,
}

#[derive(Debug, Serialize)]
struct ExportRequest {
    court_id: Id,
    segments: Vec<ExportSegment>,
}

#[derive(Debug, Serialize)]
struct ExportSegment {
    chunk_number: i32,
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

#[derive(Debug, Deserialize)]
struct ExportResponse {
    tasks: Vec<ExportTaskResponse>,
}

#[derive(Debug, Deserialize)]
struct ExportTaskResponse {
    chunk_number: i32,
    task_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ExportState {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug, Deserialize)]
struct ExportStatusResponse {
    status: ExportState,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    code: Option<String>,
    message: Option<String>,
}

pub struct NvrHttpGateway {
    client: ClientWithMiddleware,
    base_url: String,
    segment_duration: chrono::Duration,
}

impl NvrHttpGateway {
    pub fn new(settings: NvrGatewaySettings) -> Result<Self, GatewayError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(api_key) = &settings.api_key {
            let mut header_value =
                reqwest::header::HeaderValue::from_str(api_key).map_err(|e| {
                    warn!("Failed to create gateway auth header: {:?}", e);
                    GatewayError::new(GatewayErrorKind::Protocol, "Invalid API key format")
                })?;
            header_value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, header_value);
        }

        // No overall request timeout: chunk downloads are bounded by the
        // orchestrator's per-stage timeouts instead.
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(settings.connect_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| GatewayError::new(GatewayErrorKind::Protocol, e.to_string()))?;

        let retry_policy = settings.backoff.with_max_retries(settings.max_http_retries);
        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let segment_duration = chrono::Duration::from_std(settings.segment_duration)
            .map_err(|e| GatewayError::new(GatewayErrorKind::Protocol, e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url,
            segment_duration,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", self.base_url)
    }

    async fn send(
        &self,
        request: reqwest_middleware::RequestBuilder,
    ) -> Result<reqwest::Response, GatewayError> {
        let response = request.send().await.map_err(middleware_error)?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

#[async_trait]
impl CameraGateway for NvrHttpGateway {
    async fn check_availability(&self, court_id: Id) -> Result<CameraAvailability, GatewayError> {
        debug!("Checking camera availability for court {court_id}");

        let result = self
            .send(self.client.get(self.url(&format!("courts/{court_id}/camera"))))
            .await;

        match result {
            Ok(response) => {
                let camera: CameraResponse = response.json().await.map_err(reqwest_error)?;
                Ok(CameraAvailability {
                    court_id,
                    available: camera.online,
                    reason: (!camera.online).then(|| "camera is offline".to_string()),
                    camera_id: camera.camera_id,
                })
            }
            Err(err) if err.kind == GatewayErrorKind::NotFound => Ok(CameraAvailability {
                court_id,
                available: false,
                camera_id: None,
                reason: Some("no camera provisioned for court".to_string()),
            }),
            Err(err) => Err(err),
        }
    }

    async fn request_export(
        &self,
        court_id: Id,
        window: TimeWindow,
    ) -> Result<Vec<ExportTask>, GatewayError> {
        let segments = plan_segments(window, self.segment_duration);
        if segments.is_empty() {
            return Err(GatewayError::new(
                GatewayErrorKind::Rejected,
                "recording window is empty",
            ));
        }

        debug!(
            "Requesting export of {} segments for court {court_id}",
            segments.len()
        );

        let request = ExportRequest {
            court_id,
            segments: segments
                .iter()
                .zip(1..)
                .map(|(segment, chunk_number)| ExportSegment {
                    chunk_number,
                    start: segment.start,
                    end: segment.end,
                })
                .collect(),
        };

        let response = self
            .send(self.client.post(self.url("exports")).json(&request))
            .await?;
        let accepted: ExportResponse = response.json().await.map_err(reqwest_error)?;

        if accepted.tasks.len() != segments.len() {
            return Err(GatewayError::new(
                GatewayErrorKind::Protocol,
                format!(
                    "gateway accepted {} of {} segments",
                    accepted.tasks.len(),
                    segments.len()
                ),
            ));
        }

        let mut tasks = accepted
            .tasks
            .into_iter()
            .map(|task| {
                let index = usize::try_from(task.chunk_number - 1).ok();
                match index.and_then(|i| segments.get(i)) {
                    Some(window) => Ok(ExportTask {
                        chunk_number: task.chunk_number,
                        task_id: task.task_id,
                        window: *window,
                    }),
                    None => Err(GatewayError::new(
                        GatewayErrorKind::Protocol,
                        format!("unknown chunk number {} in export response", task.chunk_number),
                    )),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        tasks.sort_by_key(|task| task.chunk_number);

        info!("Gateway accepted {} export tasks for court {court_id}", tasks.len());
        Ok(tasks)
    }

    async fn poll_export_status(&self, task_id: &str) -> Result<ExportStatus, GatewayError> {
        let response = self
            .send(self.client.get(self.url(&format!("exports/{task_id}"))))
            .await?;
        let status: ExportStatusResponse = response.json().await.map_err(reqwest_error)?;

        Ok(match status.status {
            ExportState::Pending => ExportStatus::Pending,
            ExportState::Ready => ExportStatus::Ready,
            ExportState::Failed => ExportStatus::Failed(
                status
                    .error
                    .unwrap_or_else(|| "export failed".to_string()),
            ),
        })
    }

    async fn fetch_chunk(
        &self,
        task_id: &str,
        destination: &Path,
    ) -> Result<FetchedChunk, GatewayError> {
        if let Some(existing) = existing_chunk(destination).await {
            debug!("Chunk for task {task_id} already at {}", destination.display());
            return Ok(existing);
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self
            .send(self.client.get(self.url(&format!("exports/{task_id}/file"))))
            .await?;

        // Stream into a side file so an interrupted transfer never looks complete.
        let partial = destination.with_extension("part");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut size_bytes: i64 = 0;
        let mut body = response.bytes_stream();
        while let Some(bytes) = body.next().await {
            let bytes = bytes.map_err(reqwest_error)?;
            file.write_all(&bytes).await?;
            size_bytes += bytes.len() as i64;
        }
        file.flush().await?;
        drop(file);

        if size_bytes == 0 {
            tokio::fs::remove_file(&partial).await.ok();
            return Err(GatewayError::new(
                GatewayErrorKind::Protocol,
                format!("export {task_id} returned an empty file"),
            ));
        }

        tokio::fs::rename(&partial, destination).await?;
        info!("Fetched export {task_id} ({size_bytes} bytes)");

        Ok(FetchedChunk {
            path: destination.to_path_buf(),
            size_bytes,
            cached: false,
        })
    }
}

fn reqwest_error(err: reqwest::Error) -> GatewayError {
    let kind = if err.is_timeout() {
        GatewayErrorKind::Timeout
    } else if err.is_decode() {
        GatewayErrorKind::Protocol
    } else {
        GatewayErrorKind::Unavailable
    };
    GatewayError::new(kind, err.to_string())
}

fn middleware_error(err: reqwest_middleware::Error) -> GatewayError {
    match err {
        reqwest_middleware::Error::Reqwest(err) => reqwest_error(err),
        reqwest_middleware::Error::Middleware(err) => {
            GatewayError::new(GatewayErrorKind::Unavailable, err.to_string())
        }
    }
}

async fn error_from_response(response: reqwest::Response) -> GatewayError {
    let status = response.status();
    let body: Option<ErrorResponse> = response.json().await.ok();
    let code = body.as_ref().and_then(|b| b.code.clone());
    let message = body
        .and_then(|b| b.message)
        .unwrap_or_else(|| format!("gateway answered {status}"));

    let kind = match (status, code.as_deref()) {
        (_, Some("out_of_retention")) | (StatusCode::GONE, _) => GatewayErrorKind::OutOfRetention,
        (StatusCode::NOT_FOUND, _) => GatewayErrorKind::NotFound,
        (StatusCode::TOO_MANY_REQUESTS, _) => GatewayErrorKind::RateLimited,
        (StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT, _) => GatewayErrorKind::Timeout,
        (status, _) if status.is_server_error() => GatewayErrorKind::Unavailable,
        (status, _) if status.is_client_error() => GatewayErrorKind::Rejected,
        _ => GatewayErrorKind::Protocol,
    };

    warn!("Camera gateway error {status}: {message}");
    GatewayError::new(kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::{Matcher, Server, ServerGuard};

    fn gateway(server: &ServerGuard) -> NvrHttpGateway {
        NvrHttpGateway::new(NvrGatewaySettings {
            base_url: server.url(),
            api_key: Some("test_api_key".to_string()),
            segment_duration: Duration::from_secs(15 * 60),
            connect_timeout: Duration::from_secs(1),
            max_http_retries: 0,
            backoff: Backoff::default(),
        })
        .unwrap()
    }

    fn window() -> TimeWindow {
        let utc = FixedOffset::east_opt(0).unwrap();
        TimeWindow::new(
            utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
            utc.with_ymd_and_hms(2026, 3, 14, 9, 45, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn request_export_sends_one_segment_per_chunk() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/exports")
            .match_header(API_KEY_HEADER, "test_api_key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "court_id": 3,
                "segments": [
                    { "chunk_number": 1, "start": "2026-03-14T09:00:00+00:00", "end": "2026-03-14T09:15:00+00:00" },
                    { "chunk_number": 2, "start": "2026-03-14T09:15:00+00:00", "end": "2026-03-14T09:30:00+00:00" },
                    { "chunk_number": 3, "start": "2026-03-14T09:30:00+00:00", "end": "2026-03-14T09:45:00+00:00" }
                ]
            })))
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"tasks":[
                    {"chunk_number":2,"task_id":"t-2"},
                    {"chunk_number":1,"task_id":"t-1"},
                    {"chunk_number":3,"task_id":"t-3"}
                ]}"#,
            )
            .create_async()
            .await;

        let tasks = gateway(&server).request_export(3, window()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(
            tasks.iter().map(|t| t.task_id.as_str()).collect::<Vec<_>>(),
            vec!["t-1", "t-2", "t-3"]
        );
        assert_eq!(tasks[2].window.end, window().end);
    }

    #[tokio::test]
    async fn out_of_retention_is_a_permanent_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/v1/exports")
            .with_status(422)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":"out_of_retention","message":"footage expired"}"#)
            .create_async()
            .await;

        let err = gateway(&server)
            .request_export(3, window())
            .await
            .unwrap_err();

        assert_eq!(err.kind, GatewayErrorKind::OutOfRetention);
        assert_eq!(err.message, "footage expired");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn rate_limiting_is_transient() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v1/exports/t-1")
            .with_status(429)
            .create_async()
            .await;

        let err = gateway(&server).poll_export_status("t-1").await.unwrap_err();

        assert_eq!(err.kind, GatewayErrorKind::RateLimited);
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn poll_reports_failed_exports_with_their_reason() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v1/exports/t-2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"failed","error":"disk error on NVR"}"#)
            .create_async()
            .await;

        let status = gateway(&server).poll_export_status("t-2").await.unwrap();

        assert_eq!(status, ExportStatus::Failed("disk error on NVR".to_string()));
    }

    #[tokio::test]
    async fn missing_camera_is_reported_as_unavailable() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v1/courts/8/camera")
            .with_status(404)
            .create_async()
            .await;

        let availability = gateway(&server).check_availability(8).await.unwrap();

        assert!(!availability.available);
        assert_eq!(availability.camera_id, None);
    }

    #[tokio::test]
    async fn fetch_chunk_downloads_once_and_then_reuses_the_file() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/exports/t-1/file")
            .with_status(200)
            .with_body(vec![7u8; 1024])
            .expect(1)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("rec").join("chunk-0001.bin");
        let gateway = gateway(&server);

        let first = gateway.fetch_chunk("t-1", &destination).await.unwrap();
        let second = gateway.fetch_chunk("t-1", &destination).await.unwrap();

        mock.assert_async().await;
        assert_eq!(first.size_bytes, 1024);
        assert!(!first.cached);
        assert_eq!(second.size_bytes, 1024);
        assert!(second.cached);
    }
}
