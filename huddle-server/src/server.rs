use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        FromRequest, Path, Request, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use huddle_core::{
    ActivityDraft, ActivityError, ActivityService, Broadcaster, MemoryActivityStore,
    MemoryUserDirectory, SessionHub,
};
use huddle_types::{ActivityId, PushEvent, UserId};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::{
    auth::{AuthError, AuthState, AuthUser},
    config::{Seed, ServerConfig},
};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ActivityService>,
    pub hub: Arc<SessionHub>,
}

impl AppState {
    /// Wire the in-memory backends, session hub and fan-out engine together.
    pub fn in_memory(config: &ServerConfig, seed: Option<Seed>) -> Self {
        let users = Arc::new(MemoryUserDirectory::new());
        let store = Arc::new(MemoryActivityStore::new());
        if let Some(seed) = seed {
            let loaded = seed.apply(&users, &store);
            info!(activities = loaded, "seed loaded");
        }

        let hub = Arc::new(SessionHub::new(config.session_buffer));
        let broadcaster = Broadcaster::new(users.clone(), hub.clone(), config.fanout_concurrency);
        let service = ActivityService::new(store, users, broadcaster).with_visibility(config.visibility());

        Self {
            service: Arc::new(service),
            hub,
        }
    }
}

pub async fn serve(config: ServerConfig) -> Result<()> {
    let seed = match config.seed {
        Some(ref path) => Some(Seed::from_file(path)?),
        None => None,
    };
    let state = AppState::in_memory(&config, seed);
    let app = router(state, &config);

    info!(addr = %config.listen_addr, "huddle-server listening");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: AppState, config: &ServerConfig) -> Router {
    let auth_state = AuthState {
        verifier: Arc::new(config.auth.verifier()),
    };

    Router::new()
        // Public endpoints (no auth required)
        .route("/healthz", get(healthz))
        // Authenticated endpoints
        .route("/api/activities", get(list_all))
        .route("/api/activities/wall", get(list_wall))
        .route("/api/activities/me", get(list_mine))
        .route("/api/activities/me/stats", get(stats))
        .route("/api/activities/{user}", get(list_by_user))
        .route("/api/activity", post(create))
        .route(
            "/api/activity/{id}",
            post(create_for).put(update).delete(delete),
        )
        .route("/api/activity/{id}/subscribe", get(subscribe))
        .route("/api/activity/{id}/unsubscribe", get(unsubscribe))
        .route("/ws", get(ws_session))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(auth_state))
        .with_state(state)
}

/// Failure of any API route, rendered as `{error, message}`.
#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    Activity(ActivityError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<ActivityError> for ApiError {
    fn from(err: ActivityError) -> Self {
        ApiError::Activity(err)
    }
}

fn status_for(err: &ActivityError) -> StatusCode {
    match err {
        ActivityError::Validation(_) => StatusCode::BAD_REQUEST,
        ActivityError::NotFound { .. } => StatusCode::NOT_FOUND,
        ActivityError::Forbidden(_) => StatusCode::FORBIDDEN,
        ActivityError::Upstream(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Auth(err) => err.into_response(),
            ApiError::Activity(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    warn!(?err, "request failed upstream");
                }
                let body = Json(serde_json::json!({
                    "error": err.kind(),
                    "message": err.to_string(),
                }));
                (status, body).into_response()
            }
        }
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// JSON request body whose rejections render like any other validation error.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => {
                debug!(status = %rejection.status(), "request body rejected");
                Err(ActivityError::Validation(rejection.body_text()).into())
            }
        }
    }
}

fn parse_id(raw: &str) -> std::result::Result<ActivityId, ApiError> {
    raw.parse()
        .map_err(|_| ActivityError::Validation(format!("malformed activity id: {raw}")).into())
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn list_all(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<Vec<huddle_types::PopulatedActivity>> {
    Ok(Json(state.service.list_all(&actor).await?))
}

async fn list_wall(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<Vec<huddle_types::PopulatedActivity>> {
    Ok(Json(state.service.wall(&actor).await?))
}

async fn list_mine(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<Vec<huddle_types::PopulatedActivity>> {
    Ok(Json(state.service.mine(&actor).await?))
}

async fn list_by_user(
    Path(user): Path<String>,
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<Vec<huddle_types::PopulatedActivity>> {
    Ok(Json(state.service.by_user(&actor, &UserId::new(user)).await?))
}

async fn stats(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<huddle_types::ActivityStats> {
    Ok(Json(state.service.stats(&actor).await?))
}

async fn subscribe(
    Path(id): Path<String>,
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<huddle_types::PopulatedActivity> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.subscribe(&actor, &id).await?))
}

async fn unsubscribe(
    Path(id): Path<String>,
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<huddle_types::PopulatedActivity> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.unsubscribe(&actor, &id).await?))
}

async fn create(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    JsonBody(draft): JsonBody<ActivityDraft>,
) -> ApiResult<huddle_types::PopulatedActivity> {
    Ok(Json(state.service.create(&actor, draft).await?))
}

/// Admin: create an activity on behalf of the user in the path.
async fn create_for(
    Path(user): Path<String>,
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    JsonBody(draft): JsonBody<ActivityDraft>,
) -> ApiResult<huddle_types::PopulatedActivity> {
    let target = UserId::new(user);
    Ok(Json(state.service.create_for(&actor, &target, draft).await?))
}

async fn update(
    Path(id): Path<String>,
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    JsonBody(draft): JsonBody<ActivityDraft>,
) -> ApiResult<huddle_types::PopulatedActivity> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.update(&actor, &id, draft).await?))
}

async fn delete(
    Path(id): Path<String>,
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> ApiResult<huddle_types::DeletionAck> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.delete(&actor, &id).await?))
}

async fn ws_session(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(err) = handle_ws(socket, actor.id, state.hub).await {
            warn!(?err, "websocket session ended with error");
        }
    })
}

async fn send_event(socket: &mut WebSocket, event: &PushEvent) -> Result<()> {
    let text = serde_json::to_string(event)?;
    socket.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

async fn handle_ws(mut socket: WebSocket, user: UserId, hub: Arc<SessionHub>) -> Result<()> {
    let mut session = hub.connect(user);
    let id = session.id;
    info!(session = %id, user = %session.user, "session opened");

    let result = async {
        send_event(&mut socket, &PushEvent::session_ready(id)).await?;
        loop {
            tokio::select! {
                // Fan-out from mutations
                pushed = session.events.recv() => {
                    match pushed {
                        Some(event) => send_event(&mut socket, &event).await?,
                        None => break,
                    }
                }
                // Messages from this client
                inbound = socket.recv() => {
                    match inbound {
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(err)) => {
                            debug!(session = %id, ?err, "websocket receive error");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    hub.disconnect(&id);
    info!(session = %id, "session closed");
    result
}
