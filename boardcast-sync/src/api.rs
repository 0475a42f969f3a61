//! HTTP surface: the live-sync WebSocket endpoint plus history, snapshot and
//! image endpoints.
//!
//! | method | path                | auth            |
//! |--------|---------------------|-----------------|
//! | GET    | `/api/ws`           | `?token=`       |
//! | GET    | `/api/history`      | bearer          |
//! | GET    | `/api/snapshots`    | bearer          |
//! | POST   | `/api/snapshots`    | bearer          |
//! | DELETE | `/api/snapshots`    | bearer          |
//! | POST   | `/api/upload`       | bearer          |
//! | GET    | `/api/images/:id`   | none            |

use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::admission::{admit, TokenVerifier};
use crate::config::SyncConfig;
use crate::connection;
use crate::error::{Result, SyncError, ValidationError};
use crate::hub::HubHandle;
use crate::storage::{HistoryRecord, ImageRecord, SnapshotRecord, StoreError, WorkspaceStore};

/// Slack above the image cap for multipart framing and headers.
const UPLOAD_OVERHEAD: usize = 64 * 1024;

/// Shared state for every handler.
#[derive(Clone)]
pub struct ApiState {
    pub hub: HubHandle,
    pub store: Arc<WorkspaceStore>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub config: Arc<SyncConfig>,
}

/// Build the `/api` router.
pub fn router(state: ApiState) -> Router {
    let body_limit = state.store.max_image_bytes() as usize + UPLOAD_OVERHEAD;
    Router::new()
        .route("/api/ws", get(live_sync))
        .route("/api/history", get(history))
        .route(
            "/api/snapshots",
            get(list_snapshots)
                .post(create_snapshot)
                .delete(delete_snapshot),
        )
        .route("/api/upload", post(upload_image))
        .route("/api/images/:id", get(get_image))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct LiveSyncParams {
    token: Option<String>,
}

async fn live_sync(
    State(state): State<ApiState>,
    Query(params): Query<LiveSyncParams>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let admitted = admit(state.verifier.as_ref(), params.token.as_deref()).map_err(|e| {
        log::warn!("Rejected live-sync connection: {e}");
        SyncError::from(e)
    })?;
    Ok(ws.on_upgrade(move |socket| async move {
        connection::serve(socket, state.hub.clone(), &state.config, admitted).await;
    }))
}

fn authorize(state: &ApiState, headers: &HeaderMap) -> Result<()> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    admit(state.verifier.as_ref(), token).map_err(|e| {
        log::warn!("Rejected request: {e}");
        SyncError::from(e)
    })?;
    Ok(())
}

/// Run a store call on the blocking pool.
async fn with_store<T, F>(state: &ApiState, f: F) -> Result<T>
where
    F: FnOnce(&WorkspaceStore) -> std::result::Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(&state.store);
    let value = tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| StoreError::DatabaseError(format!("Failed to join store task: {e}")))??;
    Ok(value)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    tab_id: Option<String>,
    limit: Option<usize>,
}

async fn history(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<HistoryRecord>>> {
    authorize(&state, &headers)?;
    let tab_id = params
        .tab_id
        .filter(|id| !id.is_empty())
        .ok_or(ValidationError::MissingField("tabId"))?;
    let limit = match params.limit {
        Some(0) | None => state.config.history_default_limit,
        Some(n) => n,
    };
    let records = with_store(&state, move |store| store.list_history(&tab_id, limit)).await?;
    Ok(Json(records))
}

async fn list_snapshots(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SnapshotRecord>>> {
    authorize(&state, &headers)?;
    let limit = state.config.snapshot_list_limit;
    let snapshots = with_store(&state, move |store| store.list_snapshots(limit)).await?;
    Ok(Json(snapshots))
}

#[derive(Debug, Deserialize)]
struct CreateSnapshotRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
}

async fn create_snapshot(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<CreateSnapshotRequest>,
) -> Result<(StatusCode, Json<SnapshotRecord>)> {
    authorize(&state, &headers)?;
    if request.name.trim().is_empty() {
        return Err(ValidationError::MissingField("name").into());
    }
    let description = request.description.filter(|d| !d.is_empty());

    // Read lock is released before the store write.
    let tabs = state.hub.tabs().await;
    let tab_count = tabs.len();
    let name = request.name;
    let record =
        with_store(&state, move |store| store.create_snapshot(&name, description, &tabs)).await?;
    log::info!(
        "Created snapshot {} '{}' with {tab_count} tabs",
        record.id,
        record.name
    );
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Deserialize)]
struct DeleteSnapshotRequest {
    id: u64,
}

async fn delete_snapshot(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<DeleteSnapshotRequest>,
) -> Result<StatusCode> {
    authorize(&state, &headers)?;
    let id = request.id;
    with_store(&state, move |store| store.delete_snapshot(id)).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub image_id: String,
    pub image_url: String,
}

async fn upload_image(
    State(state): State<ApiState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    authorize(&state, &headers)?;
    let limit = state.store.max_image_bytes();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| upload_error(e, limit))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field.bytes().await.map_err(|e| upload_error(e, limit))?;

        let size = data.len() as u64;
        if size > limit {
            return Err(ValidationError::ImageTooLarge { size, limit }.into());
        }

        let image = ImageRecord::new(filename, mime_type, data.to_vec());
        let (image_id, size) = (image.id.clone(), image.size);
        with_store(&state, move |store| store.save_image(&image)).await?;
        log::info!("Stored image {image_id} ({size} bytes)");

        return Ok(Json(UploadResponse {
            image_url: format!("/api/images/{image_id}"),
            image_id,
        }));
    }

    Err(ValidationError::MissingField("image").into())
}

fn upload_error(e: MultipartError, limit: u64) -> SyncError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ValidationError::PayloadTooLarge { limit }.into()
    } else {
        ValidationError::MalformedUpload(e.body_text()).into()
    }
}

async fn get_image(State(state): State<ApiState>, Path(id): Path<String>) -> Result<Response> {
    let image = with_store(&state, move |store| store.get_image(&id)).await?;
    Ok((
        [
            (header::CONTENT_TYPE, image.mime_type),
            (header::CONTENT_DISPOSITION, inline_disposition(&image.filename)),
        ],
        image.data,
    )
        .into_response())
}

/// `inline; filename="..."` with quotes and backslashes escaped and control
/// characters replaced.
fn inline_disposition(filename: &str) -> String {
    let mut value = String::with_capacity(filename.len() + 20);
    value.push_str("inline; filename=\"");
    for c in filename.chars() {
        match c {
            '"' | '\\' => {
                value.push('\\');
                value.push(c);
            }
            c if c.is_control() => value.push('_'),
            c => value.push(c),
        }
    }
    value.push('"');
    value
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl SyncError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            SyncError::Admission(_) => StatusCode::UNAUTHORIZED,
            SyncError::Protocol(_) => StatusCode::BAD_REQUEST,
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::Validation(
                ValidationError::ImageTooLarge { .. } | ValidationError::PayloadTooLarge { .. },
            ) => StatusCode::PAYLOAD_TOO_LARGE,
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncError::Storage(_) | SyncError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {self}");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
