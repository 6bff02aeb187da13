//! REST read surface over the repository and live hub state.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::AppState;

fn internal_error(err: anyhow::Error) -> Response {
    error!("Handler failure: {err:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
        .into_response()
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{what} not found") })),
    )
        .into_response()
}

/// GET /api/sessions/{id}: session row plus who is currently in the room.
pub async fn get_session(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let session = match state.hub.repo().get_session(id).await {
        Ok(Some(s)) => s,
        Ok(None) => return not_found("session"),
        Err(e) => return internal_error(e),
    };
    let online = state.hub.rooms().members(id).await;

    Json(json!({ "session": session, "online": online })).into_response()
}

/// GET /api/sessions/{id}/billing: the settlement, or "in progress".
pub async fn get_session_billing(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.hub.repo().get_session(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("session"),
        Err(e) => return internal_error(e),
    }

    match state.hub.repo().get_billing_for_session(id).await {
        Ok(Some(record)) => Json(json!({ "billing": record })).into_response(),
        Ok(None) => Json(json!({ "billing": null, "status": "in_progress" })).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    50
}

/// GET /api/sessions/{id}/messages: paginated history, oldest-first within
/// the page.
pub async fn get_session_messages(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<HistoryQuery>,
) -> Response {
    match state.hub.repo().get_session(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("session"),
        Err(e) => return internal_error(e),
    }

    let page = q.page.max(1);
    let page_size = q.page_size.clamp(1, 200);
    match state.hub.repo().message_history(id, page, page_size).await {
        Ok((messages, total)) => Json(json!({
            "messages": messages,
            "total": total,
            "page": page,
            "page_size": page_size,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/counselors/online: enabled counselors with a live connection.
pub async fn get_online_counselors(State(state): State<AppState>) -> Response {
    let online = state.hub.registry().list_online().await;
    match state.hub.repo().get_counselors_by_ids(&online).await {
        Ok(counselors) => Json(json!({ "counselors": counselors })).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/stats: live counters plus settled running totals.
pub async fn get_stats(State(state): State<AppState>) -> Response {
    let active_sessions = state.hub.tracker().len().await;
    let online_connections = state.hub.registry().len().await;
    match state.hub.repo().billing_totals().await {
        Ok((settled_sessions, settled_amount_cents)) => Json(json!({
            "active_sessions": active_sessions,
            "online_connections": online_connections,
            "settled_sessions": settled_sessions,
            "settled_amount_cents": settled_amount_cents,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /health: liveness plus a database ping.
pub async fn health(State(state): State<AppState>) -> Response {
    let db_ok = state.db.pool.acquire().await.is_ok();
    if db_ok {
        Json(json!({ "status": "healthy", "database": "connected" })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": "disconnected" })),
        )
            .into_response()
    }
}
