use crate::metrics;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use firewatch_core::backend::DocumentBackend;
use firewatch_core::error::BackendError;
use firewatch_core::types::{Document, IncidentStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const DEFAULT_EVENT_LIMIT: usize = 100;

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct StatusBody {
    status: IncidentStatus,
}

#[derive(Deserialize)]
struct AssignBody {
    #[serde(alias = "firefighter")]
    handler: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    backend: &'static str,
    collection: String,
    subscribed: bool,
    reports: usize,
    unread_notifications: usize,
    uptime_seconds: u64,
}

/// Backend failure surfaced to the caller. The local view is untouched.
struct ApiError(BackendError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BackendError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn router<B: DocumentBackend>(state: AppState<B>) -> Router {
    Router::new()
        .route("/health", get(health_handler::<B>))
        .route("/reports", get(reports_handler::<B>).post(create_report_handler::<B>))
        .route("/reports/recent", get(recent_reports_handler::<B>))
        .route("/reports/:id", get(report_handler::<B>))
        .route("/reports/:id/status", post(set_status_handler::<B>))
        .route("/reports/:id/assign", post(assign_handler::<B>))
        .route("/stats", get(stats_handler::<B>))
        .route("/notifications", get(notifications_handler::<B>))
        .route("/notifications/read-all", post(mark_all_read_handler::<B>))
        .route("/notifications/read", delete(clear_read_handler::<B>))
        .route("/notifications/:id/read", post(mark_read_handler::<B>))
        .route("/events", get(events_handler::<B>))
        .route("/metrics", get(metrics_handler::<B>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler<B: DocumentBackend>(State(state): State<AppState<B>>) -> impl IntoResponse {
    let subscribed = state.is_subscribed().await;
    let stats = state.store.stats().await;
    Json(HealthResponse {
        status: if subscribed { "ok" } else { "degraded" },
        backend: state.backend_kind,
        collection: state.store.collection().to_string(),
        subscribed,
        reports: stats.total,
        unread_notifications: stats.unread_notifications,
        uptime_seconds: state.uptime_seconds(),
    })
}

async fn reports_handler<B: DocumentBackend>(
    State(state): State<AppState<B>>,
    Query(params): Query<LimitQuery>,
) -> impl IntoResponse {
    let mut reports = state.store.reports().await;
    if let Some(limit) = params.limit {
        reports.truncate(limit);
    }
    Json(reports)
}

async fn recent_reports_handler<B: DocumentBackend>(State(state): State<AppState<B>>) -> impl IntoResponse {
    Json(state.store.recent_reports().await)
}

async fn report_handler<B: DocumentBackend>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
) -> Response {
    match state.store.report(&id).await {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("report {} not found", id) })),
        )
            .into_response(),
    }
}

async fn create_report_handler<B: DocumentBackend>(
    State(state): State<AppState<B>>,
    Json(body): Json<Document>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state.store.create_incident(body).await.map_err(|e| {
        metrics::record_write_failure("create");
        ApiError(e)
    })?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn set_status_handler<B: DocumentBackend>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.set_status(&id, body.status).await.map_err(|e| {
        metrics::record_write_failure("set_status");
        ApiError(e)
    })?;
    Ok(Json(json!({ "id": id, "status": body.status })))
}

async fn assign_handler<B: DocumentBackend>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
    Json(body): Json<AssignBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.assign_handler(&id, &body.handler).await.map_err(|e| {
        metrics::record_write_failure("assign_handler");
        ApiError(e)
    })?;
    Ok(Json(json!({
        "id": id,
        "assignedTo": body.handler,
        "status": IncidentStatus::Resolved,
    })))
}

async fn stats_handler<B: DocumentBackend>(State(state): State<AppState<B>>) -> impl IntoResponse {
    Json(state.store.stats().await)
}

async fn notifications_handler<B: DocumentBackend>(State(state): State<AppState<B>>) -> impl IntoResponse {
    let notifications = state.store.notifications().await;
    let unread = state.store.unread_count().await;
    Json(json!({ "unread": unread, "notifications": notifications }))
}

async fn mark_read_handler<B: DocumentBackend>(
    State(state): State<AppState<B>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let changed = state.store.mark_read(&id).await;
    Json(json!({ "changed": changed, "unread": state.store.unread_count().await }))
}

async fn mark_all_read_handler<B: DocumentBackend>(State(state): State<AppState<B>>) -> impl IntoResponse {
    state.store.mark_all_read().await;
    Json(json!({ "unread": state.store.unread_count().await }))
}

async fn clear_read_handler<B: DocumentBackend>(State(state): State<AppState<B>>) -> impl IntoResponse {
    let removed = state.store.clear_read().await;
    Json(json!({ "removed": removed, "unread": state.store.unread_count().await }))
}

async fn events_handler<B: DocumentBackend>(
    State(state): State<AppState<B>>,
    Query(params): Query<LimitQuery>,
) -> impl IntoResponse {
    Json(state.get_events(params.limit.unwrap_or(DEFAULT_EVENT_LIMIT)).await)
}

async fn metrics_handler<B: DocumentBackend>(State(state): State<AppState<B>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::OK, "# metrics exporter not installed\n".to_string()),
    }
}
