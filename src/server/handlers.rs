//! Route handlers.
//!
//! - POST   /api/schedule                      - Schedule an exact-time capture
//! - GET    /api/jobs                          - List pending jobs
//! - DELETE /api/jobs/{job_id}                 - Cancel a job
//! - GET    /api/screenshots                   - List saved screenshots
//! - POST   /api/screenshot/now                - Capture immediately
//! - GET    /api/screenshot/{filename}         - Serve a screenshot
//! - GET    /api/screenshot/{filename}/download - Serve as attachment

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ApiError;
use super::AppState;
use crate::capture::CaptureResult;
use crate::registry::{self, ScheduledJob};
use crate::screenshots::{self, ScreenshotInfo};

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub datetime: String,
    #[serde(default)]
    pub recurring: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    pub success: bool,
    pub job_id: String,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: String,
    pub datetime: DateTime<Utc>,
    pub recurring: bool,
    pub scheduled: DateTime<Utc>,
}

impl From<ScheduledJob> for JobView {
    fn from(job: ScheduledJob) -> Self {
        Self {
            id: job.id,
            datetime: job.target_instant,
            recurring: job.recurring,
            scheduled: job.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobView>,
}

#[derive(Debug, Serialize)]
pub struct ScreenshotListResponse {
    pub screenshots: Vec<ScreenshotInfo>,
}

pub async fn schedule(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let Json(req) = body?;
    let target = registry::parse_instant(&req.datetime)?;
    let job = state.registry.schedule(target, req.recurring)?;
    Ok(Json(ScheduleResponse {
        success: true,
        job_id: job.id,
        scheduled_for: job.target_instant,
    }))
}

pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<JobListResponse> {
    Json(JobListResponse {
        jobs: state.registry.list().into_iter().map(JobView::from).collect(),
    })
}

pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.cancel(&job_id)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn list_screenshots(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ScreenshotListResponse>, ApiError> {
    let screenshots = screenshots::list(state.routine.output_dir()).await?;
    Ok(Json(ScreenshotListResponse { screenshots }))
}

pub async fn capture_now(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CaptureResult>, ApiError> {
    info!("manual capture requested");
    let result = state.routine.capture().await;
    if result.success {
        Ok(Json(result))
    } else {
        Err(ApiError::Capture(
            result.error.unwrap_or_else(|| "capture failed".to_string()),
        ))
    }
}

pub async fn screenshot(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = read_screenshot(&state, &filename).await?;
    Ok(([(header::CONTENT_TYPE, "image/png".to_string())], bytes))
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bytes = read_screenshot(&state, &filename).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    ))
}

async fn read_screenshot(state: &AppState, filename: &str) -> Result<Vec<u8>, ApiError> {
    let path = screenshots::resolve(state.routine.output_dir(), filename)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(screenshots::ScreenshotError::from)?;
    Ok(bytes)
}
