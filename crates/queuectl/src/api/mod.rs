use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::api::models::{
    ConfigEntry, EnqueueResponse, ErrorBody, JobLogResponse, ListJobsQuery, SetConfigRequest,
    StopWorkersResponse,
};
use crate::error::QueueError;
use crate::jobs::{Job, JobSpec, Metrics, Queue};

pub mod models;

#[derive(Clone)]
pub struct ApiState {
    pub queue: Queue,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Jobs
        .route("/jobs", get(list_jobs).post(enqueue_job))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/log", get(get_job_log))
        // Dead-letter queue
        .route("/dlq", get(list_dlq))
        .route("/dlq/:id/retry", post(retry_dead_job))
        // Config, metrics, workers
        .route("/config", get(list_config))
        .route("/config/:key", get(get_config).put(set_config))
        .route("/metrics", get(metrics))
        .route("/workers", get(list_workers))
        .route("/workers/stop", post(stop_workers))
        .with_state(state)
}

/// Maps store-layer errors onto HTTP statuses with a JSON body.
pub struct ApiError(QueueError);

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            QueueError::InvalidSpec(_) | QueueError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            QueueError::DuplicateId(_) => StatusCode::CONFLICT,
            QueueError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "admin api request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn enqueue_job(
    State(state): State<ApiState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let spec = JobSpec::from_value(body)?;
    let job_id = state.queue.enqueue(spec).await?;
    Ok((StatusCode::CREATED, Json(EnqueueResponse { job_id })))
}

pub async fn list_jobs(
    State(state): State<ApiState>,
    Query(q): Query<ListJobsQuery>,
) -> ApiResult<Vec<Job>> {
    let filter = q.into_filter()?;
    Ok(Json(state.queue.list_jobs(&filter).await?))
}

pub async fn get_job(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<Job> {
    Ok(Json(state.queue.get_status(&id).await?))
}

pub async fn get_job_log(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<JobLogResponse> {
    let log = state.queue.read_log(&id).await?;
    Ok(Json(JobLogResponse { job_id: id, log }))
}

pub async fn list_dlq(State(state): State<ApiState>) -> ApiResult<Vec<Job>> {
    Ok(Json(state.queue.dlq_list().await?))
}

pub async fn retry_dead_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Job> {
    Ok(Json(state.queue.dlq_retry(&id).await?))
}

pub async fn list_config(State(state): State<ApiState>) -> ApiResult<Vec<ConfigEntry>> {
    let entries = state
        .queue
        .config_list()
        .await?
        .into_iter()
        .map(|(key, value)| ConfigEntry { key, value })
        .collect();
    Ok(Json(entries))
}

pub async fn get_config(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> ApiResult<ConfigEntry> {
    let value = state.queue.config_get(&key).await?;
    Ok(Json(ConfigEntry { key, value }))
}

pub async fn set_config(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Json(body): Json<SetConfigRequest>,
) -> ApiResult<ConfigEntry> {
    state.queue.config_set(&key, &body.value_string()).await?;
    let value = state.queue.config_get(&key).await?;
    Ok(Json(ConfigEntry { key, value }))
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub now_utc: DateTime<Utc>,
    #[serde(flatten)]
    pub metrics: Metrics,
}

pub async fn metrics(State(state): State<ApiState>) -> ApiResult<MetricsResponse> {
    let metrics = state.queue.metrics().await?;
    Ok(Json(MetricsResponse {
        now_utc: Utc::now(),
        metrics,
    }))
}

pub async fn list_workers(
    State(state): State<ApiState>,
) -> ApiResult<Vec<crate::jobs::WorkerRecord>> {
    Ok(Json(state.queue.active_workers().await?))
}

pub async fn stop_workers(State(state): State<ApiState>) -> ApiResult<StopWorkersResponse> {
    let signalled = state.queue.stop_workers().await?;
    Ok(Json(StopWorkersResponse { signalled }))
}

/// Bind `addr` and serve the admin router until the listener fails.
pub async fn serve(addr: &str, state: ApiState) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "admin api listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
