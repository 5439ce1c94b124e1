use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::error::RagError;
use crate::github;
use crate::models::{IndexRequest, IndexResponse, JobStatusResponse};
use crate::state::AppState;

/// POST /index - queue an ingestion job for a repository URL.
pub async fn enqueue_index(
    State(state): State<AppState>,
    Json(req): Json<IndexRequest>,
) -> Result<(StatusCode, Json<IndexResponse>), RagError> {
    let repo = github::parse_repo_url(&req.github_url)?;
    let job_id = state.jobs.enqueue(repo)?;
    Ok((StatusCode::ACCEPTED, Json(IndexResponse { job_id })))
}

/// GET /index/status/{jobId} - job state, progress, and terminal result.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, RagError> {
    state
        .jobs
        .status(&job_id)
        .map(Json)
        .ok_or_else(|| RagError::not_found(format!("job {job_id} not found")))
}
