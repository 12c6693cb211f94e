// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP server for the provisioner API.
//!
//! Thin axum layer over [`crate::handlers`]: extract, call, map errors to
//! `{ "message", "kind" }` with a status derived from [`ErrorKind`].

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{Error, ErrorKind};
use crate::handlers::{self, ProvisionerState};

type AppState = Arc<ProvisionerState>;
type ApiResult<T> = std::result::Result<T, ApiError>;

/// Provisioner error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

/// HTTP status for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidRequest | ErrorKind::PathTraversal => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Capacity => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ExternalCommand => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Configuration | ErrorKind::ToolNotFound | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            error!(kind = ?kind, error = %self.0, "Request failed");
        }
        let body = Json(json!({
            "message": self.0.to_string(),
            "kind": kind,
        }));
        (status, body).into_response()
    }
}

/// Build the provisioner router.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/installations", get(list_installations))
        .route("/installations/provision", post(provision))
        .route("/installations/{id}/insight", get(insight))
        .route("/installations/{id}/run", post(run))
        .route("/installations/{id}/pause", post(pause))
        .route("/installations/{id}/delete", post(delete))
        .route("/installations/{id}/app-status", patch(set_app_status))
        .route("/installations/{id}/license", post(set_license))
        .route("/installations/{id}/seats", patch(update_seats))
        .route("/installations/{id}/link-booking", post(link_booking))
        .route("/installations/{id}/backup", post(create_backup))
        .route("/installations/{id}/backups", get(list_backups))
        .route("/installations/{id}/backups/upload", post(upload_backup))
        .route(
            "/installations/{id}/backups/{file}/download",
            get(download_backup),
        )
        .route("/installations/{id}/backup-prereq", get(backup_prereq))
        .route("/installations/{id}/restore", post(restore))
        .route("/installations/{id}/restore-from", post(restore_from))
        .route("/installation-insights", get(list_insights))
        .route("/overview", get(overview));

    Router::new()
        .route("/health", get(health))
        .route("/api/installations", post(register))
        .route("/api/installations/{id}/heartbeat", post(heartbeat))
        .route("/api/installations/{id}/payload", post(payload))
        .nest("/api/admin", admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `state` on `listener` until `shutdown_rx` turns true.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

// ============================================================================
// Health and Tenant Reporting
// ============================================================================

async fn health(State(state): State<AppState>) -> ApiResult<Response> {
    let health = handlers::handle_health_check(&state).await?;
    let status = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(health)).into_response())
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<handlers::RegisterRequest>,
) -> ApiResult<Json<handlers::RegisterResponse>> {
    Ok(Json(handlers::handle_register(&state, request).await?))
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<handlers::HeartbeatRequest>,
) -> ApiResult<(StatusCode, Json<handlers::HeartbeatResponse>)> {
    let out = handlers::handle_heartbeat(&state, id, request).await?;
    Ok((StatusCode::CREATED, Json(out)))
}

async fn payload(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<handlers::PayloadResponse>)> {
    let out = handlers::handle_payload(&state, id, body).await?;
    Ok((StatusCode::CREATED, Json(out)))
}

// ============================================================================
// Fleet Views
// ============================================================================

#[derive(Debug, Deserialize)]
struct InsightsQuery {
    limit: Option<i64>,
}

async fn list_installations(
    State(state): State<AppState>,
) -> ApiResult<Json<handlers::InstallationsResponse>> {
    Ok(Json(handlers::handle_list_installations(&state).await?))
}

async fn insight(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<handlers::InsightResponse>> {
    Ok(Json(handlers::handle_insight(&state, id).await?))
}

async fn list_insights(
    State(state): State<AppState>,
    Query(query): Query<InsightsQuery>,
) -> ApiResult<Json<handlers::InsightsResponse>> {
    Ok(Json(handlers::handle_list_insights(&state, query.limit).await?))
}

async fn overview(State(state): State<AppState>) -> ApiResult<Json<crate::model::Overview>> {
    Ok(Json(handlers::handle_overview(&state).await?))
}

// ============================================================================
// Provisioning and Lifecycle
// ============================================================================

async fn provision(
    State(state): State<AppState>,
    Json(request): Json<handlers::ProvisionRequest>,
) -> ApiResult<(StatusCode, Json<handlers::ProvisionResponse>)> {
    let out = handlers::handle_provision(&state, request).await?;
    Ok((StatusCode::CREATED, Json(out)))
}

async fn run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<handlers::ContainerActionResponse>> {
    Ok(Json(handlers::handle_run(&state, id).await?))
}

async fn pause(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<handlers::ContainerActionResponse>> {
    Ok(Json(handlers::handle_pause(&state, id).await?))
}

async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<handlers::DeleteResponse>> {
    Ok(Json(handlers::handle_delete(&state, id).await?))
}

async fn set_app_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<handlers::AppStatusRequest>,
) -> ApiResult<Json<handlers::InstallationResponse>> {
    Ok(Json(handlers::handle_set_app_status(&state, id, request).await?))
}

async fn set_license(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<handlers::LicenseRequest>,
) -> ApiResult<Json<handlers::InstallationResponse>> {
    Ok(Json(handlers::handle_set_license(&state, id, request).await?))
}

async fn update_seats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<handlers::SeatsRequest>,
) -> ApiResult<Json<handlers::SeatsResponse>> {
    Ok(Json(handlers::handle_update_seats(&state, id, request).await?))
}

async fn link_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<handlers::LinkBookingRequest>,
) -> ApiResult<Json<handlers::LinkBookingResponse>> {
    Ok(Json(handlers::handle_link_booking(&state, id, request).await?))
}

// ============================================================================
// Backups
// ============================================================================

async fn create_backup(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<handlers::CreateBackupResponse>)> {
    let out = handlers::handle_create_backup(&state, id).await?;
    Ok((StatusCode::CREATED, Json(out)))
}

async fn list_backups(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<handlers::BackupsResponse>> {
    Ok(Json(handlers::handle_list_backups(&state, id).await?))
}

async fn upload_backup(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<handlers::UploadRequest>,
) -> ApiResult<(StatusCode, Json<handlers::UploadResponse>)> {
    let out = handlers::handle_upload_backup(&state, id, request).await?;
    Ok((StatusCode::CREATED, Json(out)))
}

async fn download_backup(
    State(state): State<AppState>,
    Path((id, file)): Path<(Uuid, String)>,
) -> ApiResult<Response> {
    let download = handlers::handle_download_backup(&state, id, &file).await?;
    let disposition = format!("attachment; filename=\"{}\"", download.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, download.size.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(download.file)),
    )
        .into_response())
}

async fn backup_prereq(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<handlers::PrereqResponse>> {
    Ok(Json(handlers::handle_backup_prereq(&state, id).await?))
}

async fn restore(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<handlers::RestoreRequest>,
) -> ApiResult<Json<handlers::RestoreResponse>> {
    Ok(Json(handlers::handle_restore(&state, id, request).await?))
}

async fn restore_from(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<handlers::RestoreFromRequest>,
) -> ApiResult<Json<handlers::RestoreResponse>> {
    Ok(Json(handlers::handle_restore_from(&state, id, request).await?))
}
