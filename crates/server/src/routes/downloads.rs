// crates/server/src/routes/downloads.rs
//! Download job endpoints.
//!
//! - GET    /downloads               — jobs visible to the caller
//! - POST   /downloads               — submit a target
//! - GET    /downloads/{id}          — one job
//! - DELETE /downloads/{id}          — cancel if running, otherwise delete
//! - GET    /downloads/progress/{id} — SSE stream of progress events

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::StreamExt;
use mediaferry_core::{Job, JobId, JobStatus, Requester};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::jobs::CancelOutcome;
use crate::state::AppState;

/// Header carrying the authenticated user id, set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header flagging the authenticated user as an administrator.
pub const USER_ADMIN_HEADER: &str = "x-user-admin";

/// Caller identity extracted from request headers.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Requester);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_ID_HEADER}")))?
            .trim()
            .parse()
            .map_err(|_| ApiError::Unauthorized(format!("invalid {USER_ID_HEADER}")))?;
        let is_admin = parts
            .headers
            .get(USER_ADMIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| matches!(v.trim(), "1" | "true"));
        Ok(CurrentUser(Requester { id, is_admin }))
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct SubmitResponse {
    pub id: JobId,
    pub url: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct CancelResponse {
    pub ok: bool,
    pub outcome: CancelOutcome,
}

/// GET /api/downloads
async fn list_downloads(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
) -> ApiResult<Json<Vec<Job>>> {
    Ok(Json(state.coordinator.list(&requester).await?))
}

/// POST /api/downloads
async fn submit_download(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Json(body): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let job = state.coordinator.submit(requester.id, &body.url).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            id: job.id,
            url: job.target,
            status: job.status,
        }),
    ))
}

/// GET /api/downloads/{id}
async fn get_download(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Path(id): Path<JobId>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.coordinator.get(id, &requester).await?))
}

/// DELETE /api/downloads/{id}
async fn cancel_download(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Path(id): Path<JobId>,
) -> ApiResult<Json<CancelResponse>> {
    let outcome = state.coordinator.cancel(id, &requester).await?;
    Ok(Json(CancelResponse { ok: true, outcome }))
}

/// GET /api/downloads/progress/{id}
///
/// Current state first, then live events; the stream closes after the first
/// terminal event. Access is checked once, at connect.
async fn stream_progress(
    State(state): State<Arc<AppState>>,
    CurrentUser(requester): CurrentUser,
    Path(id): Path<JobId>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    state.coordinator.get(id, &requester).await?;
    let events = state.coordinator.subscribe_progress(id);

    let stream = async_stream::stream! {
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            let json = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().data(json));
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}

/// Build the downloads router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/downloads", get(list_downloads).post(submit_download))
        .route("/downloads/{id}", get(get_download).delete(cancel_download))
        .route("/downloads/progress/{id}", get(stream_progress))
}
