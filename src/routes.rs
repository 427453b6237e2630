//! The HTTP half of the transport. `events.*`/`queue.*`/`playback.*`
//! commands each get one route; the
//! bidirectional push side lives in `websocket.rs`. Every handler maps
//! `CoreError` onto the tagged JSON envelope via `ApiError`.

use crate::error::CoreError;
use crate::lifecycle::EventLifecycle;
use crate::models::{AddVoteRequest, Event, EventId, EventUpsertRequest, PlaybackStatus, QueueItem, TrackId};
use crate::repository::Repository;
use crate::validation::{validate_add_vote, validate_event_upsert};
use crate::{coordinator::VotingCoordinator, hub::SharedHub};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn Repository>,
    pub lifecycle: Arc<EventLifecycle>,
    pub coordinator: Arc<VotingCoordinator>,
    pub hub: SharedHub,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(create_event))
        .route("/events/:event_id", patch(update_event))
        .route("/events/:event_id/activate", post(activate_event))
        .route("/events/:event_id/end", post(end_event))
        .route("/events/:event_id/cancel", post(cancel_event))
        .route("/events/:event_id", axum::routing::delete(delete_event))
        .route("/events/:event_id/queue", get(list_queue).post(add_vote).put(clear_queue))
        .route("/events/:event_id/queue/stats", get(queue_stats))
        .route("/events/:event_id/queue/next", get(queue_next_track))
        .route("/events/:event_id/queue/:track_id", axum::routing::delete(remove_queue_item))
        .route("/events/:event_id/queue/:track_id/skip", post(skip_track))
        .route("/events/:event_id/queue/:track_id/mark-played", post(queue_mark_played))
        .route("/events/:event_id/playback/initialize", post(playback_initialize))
        .route("/events/:event_id/playback/next", post(playback_next))
        .route("/events/:event_id/playback/pause", post(playback_pause))
        .route("/events/:event_id/playback/resume", post(playback_resume))
        .route("/events/:event_id/playback/stop", post(playback_stop))
        .route("/events/:event_id/playback/auto-play", post(playback_set_auto_play))
        .route("/events/:event_id/playback/status", get(playback_status))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Wraps `CoreError` in a tagged JSON error envelope.
struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": {
                "tag": self.0.tag(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn create_event(State(state): State<AppState>, Json(req): Json<EventUpsertRequest>) -> ApiResult<Event> {
    validate_event_upsert(&req)?;
    let event = state.lifecycle.create(req).await?;
    Ok(Json(event))
}

async fn update_event(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    Json(req): Json<EventUpsertRequest>,
) -> ApiResult<Event> {
    validate_event_upsert(&req)?;
    let event = state.lifecycle.update(event_id, req).await?;
    Ok(Json(event))
}

async fn activate_event(State(state): State<AppState>, Path(event_id): Path<EventId>) -> ApiResult<Event> {
    let event = state.coordinator.activate_event(event_id).await?;
    state.hub.broadcast(
        event_id,
        crate::hub::HubEvent::EventStatusChange { event_id, status: event.status.to_string() },
    );
    Ok(Json(event))
}

async fn end_event(State(state): State<AppState>, Path(event_id): Path<EventId>) -> ApiResult<Event> {
    let event = state.coordinator.end_event(event_id).await?;
    state.hub.broadcast(
        event_id,
        crate::hub::HubEvent::EventStatusChange { event_id, status: event.status.to_string() },
    );
    Ok(Json(event))
}

async fn cancel_event(State(state): State<AppState>, Path(event_id): Path<EventId>) -> ApiResult<Event> {
    let event = state.coordinator.cancel_event(event_id).await?;
    state.hub.broadcast(
        event_id,
        crate::hub::HubEvent::EventStatusChange { event_id, status: event.status.to_string() },
    );
    Ok(Json(event))
}

async fn delete_event(State(state): State<AppState>, Path(event_id): Path<EventId>) -> Result<StatusCode, ApiError> {
    state.lifecycle.delete(event_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_queue(State(state): State<AppState>, Path(event_id): Path<EventId>) -> ApiResult<Vec<QueueItem>> {
    let queue = state.coordinator.get_queue(event_id).await?;
    Ok(Json(queue))
}

#[derive(Deserialize)]
struct AddVoteBody {
    #[serde(flatten)]
    request: AddVoteRequest,
    session_id: String,
}

async fn add_vote(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<AddVoteBody>,
) -> ApiResult<QueueItem> {
    validate_add_vote(&body.request)?;
    let item = state
        .coordinator
        .add_vote(event_id, &body.session_id, addr.ip(), body.request)
        .await?;
    Ok(Json(item))
}

async fn remove_queue_item(
    State(state): State<AppState>,
    Path((event_id, track_id)): Path<(EventId, TrackId)>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.remove(event_id, &track_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_queue(State(state): State<AppState>, Path(event_id): Path<EventId>) -> Result<StatusCode, ApiError> {
    state.coordinator.clear(event_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn queue_stats(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
) -> ApiResult<crate::coordinator::QueueStats> {
    let stats = state.coordinator.stats(event_id).await?;
    Ok(Json(stats))
}

async fn queue_next_track(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
) -> ApiResult<Option<QueueItem>> {
    let item = state.coordinator.next_track(event_id).await?;
    Ok(Json(item))
}

async fn queue_mark_played(
    State(state): State<AppState>,
    Path((event_id, track_id)): Path<(EventId, TrackId)>,
) -> ApiResult<QueueItem> {
    let item = state.coordinator.mark_played(event_id, &track_id).await?;
    Ok(Json(item))
}

#[derive(Deserialize, Default)]
struct SkipBody {
    reason: Option<String>,
}

async fn skip_track(
    State(state): State<AppState>,
    Path((event_id, track_id)): Path<(EventId, TrackId)>,
    body: Option<Json<SkipBody>>,
) -> ApiResult<QueueItem> {
    let reason = body.map(|Json(b)| b.reason).unwrap_or(None);
    let item = state.coordinator.skip(event_id, &track_id, reason).await?;
    Ok(Json(item))
}

#[derive(Deserialize)]
struct InitializePlaybackBody {
    device_id: String,
}

async fn playback_initialize(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    Json(body): Json<InitializePlaybackBody>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.initialize_playback(event_id, &body.device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn playback_next(State(state): State<AppState>, Path(event_id): Path<EventId>) -> Result<StatusCode, ApiError> {
    let event = state.lifecycle.get(event_id).await?;
    state.coordinator.play_next(event_id, event.venue_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn playback_pause(State(state): State<AppState>, Path(event_id): Path<EventId>) -> Result<StatusCode, ApiError> {
    state.coordinator.pause(event_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn playback_resume(State(state): State<AppState>, Path(event_id): Path<EventId>) -> Result<StatusCode, ApiError> {
    state.coordinator.resume(event_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn playback_stop(State(state): State<AppState>, Path(event_id): Path<EventId>) -> Result<StatusCode, ApiError> {
    state.coordinator.stop(event_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SetAutoPlayBody {
    enabled: bool,
}

async fn playback_set_auto_play(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    Json(body): Json<SetAutoPlayBody>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.set_auto_play(event_id, body.enabled).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn playback_status(State(state): State<AppState>, Path(event_id): Path<EventId>) -> ApiResult<Option<PlaybackStatus>> {
    let status = state.coordinator.status(event_id).await?;
    Ok(Json(status))
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| crate::websocket::handle_connection(socket, state.hub))
}
