use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::StoreError;
use crate::models::video::VideoRecord;
use crate::services::ingest::{self, IngestError, Submission};

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 500;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error carrying the HTTP status it maps to.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        let status = match &err {
            IngestError::EmptyFile => StatusCode::BAD_REQUEST,
            IngestError::Gps(_) => StatusCode::UNPROCESSABLE_ENTITY,
            IngestError::NotFound(_) => StatusCode::NOT_FOUND,
            IngestError::Terminal(_) => StatusCode::CONFLICT,
            IngestError::Storage(_) | IngestError::Queue(_) => StatusCode::BAD_GATEWAY,
            IngestError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "Ingestion failed");
        }
        Self::new(status, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Record lookup failed");
        Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
    }
}

/// PUT /api/v1/cctv — upload a CCTV video with its GPS track.
pub async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Submission>), ApiError> {
    let mut file: Option<(Vec<u8>, Option<String>)> = None;
    let mut gps_coords: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
                file = Some((data.to_vec(), filename));
            }
            Some("gps_coords") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
                gps_coords = Some(text);
            }
            _ => {}
        }
    }

    let (data, filename) =
        file.ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "missing file field"))?;
    let gps_coords = gps_coords.ok_or_else(|| {
        ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "missing gps_coords field")
    })?;

    let submission = ingest::submit_video(&state, &data, filename.as_deref(), &gps_coords).await?;
    Ok((StatusCode::ACCEPTED, Json(submission)))
}

/// GET /api/v1/cctv/{video_id}
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<Uuid>,
) -> Result<Json<VideoRecord>, ApiError> {
    state
        .store
        .get(video_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("video {video_id} not found")))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

/// GET /api/v1/cctv?limit=N — most recent records first.
pub async fn list_videos(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<VideoRecord>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    Ok(Json(state.store.list(limit).await?))
}

#[derive(Debug, Serialize)]
pub struct RequeueResponse {
    pub video_id: Uuid,
    pub entry_id: String,
}

/// POST /api/v1/cctv/{video_id}/requeue
pub async fn requeue_video(
    State(state): State<AppState>,
    Path(video_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RequeueResponse>), ApiError> {
    let entry_id = ingest::requeue(&state, video_id).await?;
    Ok((StatusCode::ACCEPTED, Json(RequeueResponse { video_id, entry_id })))
}
