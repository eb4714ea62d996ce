//! HTTP/SSE transport over [`AgentService`].
//!
//! Thin handlers: extract, delegate, map `ServiceError` onto a status. The
//! chat endpoint answers with an SSE stream of turn events; dropping the
//! stream mid-turn (client went away) cancels the turn.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use atlas_core::events::TurnEvent;
use atlas_core::ids::SessionId;
use atlas_llm::ModelSummary;

use crate::config::ServerSettings;
use crate::error::ServiceError;
use crate::service::{AgentService, SessionDetail, SessionModel};
use crate::sessions::SessionSummary;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AgentService>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/models", get(list_models))
        .route("/api/sessions", post(create_session).get(list_sessions))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))
        .route("/api/sessions/{id}/rename", post(rename_session))
        .route("/api/sessions/{id}/clear", post(clear_session))
        .route(
            "/api/sessions/{id}/model",
            get(get_session_model).put(set_session_model),
        )
        .route("/api/chat/stream", post(chat_stream))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Bind and serve. Returns a handle holding the server task; with port 0
/// the handle reports the picked port.
pub async fn start(
    config: ServerSettings,
    service: Arc<AgentService>,
) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(AppState { service });
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "atlas server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
    })
}

/// Handle returned by `start()` — keeps the server task alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::SessionBusy(_) => StatusCode::CONFLICT,
            ServiceError::UnknownModel(_) | ServiceError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Store(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelSummary>> {
    Json(state.service.list_models())
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionBody {
    name: Option<String>,
    model: Option<String>,
}

async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionBody>>,
) -> Result<impl IntoResponse, ServiceError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let session = state
        .service
        .create_session(body.name.as_deref(), body.model.as_deref())?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Debug, Default, Deserialize)]
struct ListSessionsQuery {
    #[serde(default)]
    include_empty: bool,
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Vec<SessionSummary>>, ServiceError> {
    Ok(Json(state.service.list_sessions(query.include_empty)?))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ServiceError> {
    let detail = state.service.session_detail(&SessionId::from_raw(id))?;
    Ok(Json(detail))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServiceError> {
    state.service.delete_session(&SessionId::from_raw(id))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct RenameBody {
    name: String,
}

async fn rename_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Result<StatusCode, ServiceError> {
    state
        .service
        .rename_session(&SessionId::from_raw(id), &body.name)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let deleted = state.service.clear_session(&SessionId::from_raw(id))?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn get_session_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionModel>, ServiceError> {
    Ok(Json(state.service.session_model(&SessionId::from_raw(id))?))
}

#[derive(Debug, Deserialize)]
struct SetModelBody {
    model: String,
}

async fn set_session_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SetModelBody>,
) -> Result<StatusCode, ServiceError> {
    state
        .service
        .set_session_model(&SessionId::from_raw(id), &body.model)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    session_id: String,
    message: String,
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<KeepAliveStream<EventSourceStream>>, ServiceError> {
    let session_id = SessionId::from_raw(body.session_id);
    let rx = state.service.send_message(&session_id, &body.message)?;
    let stream = EventSourceStream {
        rx,
        session_id,
        service: Arc::clone(&state.service),
        finished: false,
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// The turn's event channel as SSE frames, one JSON-encoded event per frame.
pub struct EventSourceStream {
    rx: mpsc::Receiver<TurnEvent>,
    session_id: SessionId,
    service: Arc<AgentService>,
    finished: bool,
}

impl Stream for EventSourceStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    this.finished = true;
                }
                let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
                Poll::Ready(Some(Ok(Event::default().data(data))))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventSourceStream {
    fn drop(&mut self) {
        // Dropped before the turn reached a terminal event: the consumer is
        // gone, so stop the turn instead of reasoning into the void.
        if !self.finished && self.service.cancel_turn(&self.session_id) {
            tracing::info!(session_id = %self.session_id, "client disconnected, turn cancelled");
        }
    }
}
