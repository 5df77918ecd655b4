use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use homesync_proto::protocol::{
    ControlAction, ControlRequest, ControlResponse, StatusResponse, TracksResponse,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::core::SyncEvent;
use crate::socket;

#[derive(Clone)]
pub struct HttpState {
    pub event_tx: mpsc::Sender<SyncEvent>,
    pub next_client_id: Arc<AtomicU64>,
    /// Capacity of each connection's outbound frame channel.
    pub client_buffer: usize,
}

impl HttpState {
    pub fn new(event_tx: mpsc::Sender<SyncEvent>, client_buffer: usize) -> Self {
        Self {
            event_tx,
            next_client_id: Arc::new(AtomicU64::new(1)),
            client_buffer: client_buffer.max(1),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/radio/control/:action", post(control))
        .route("/api/radio/status", get(get_status))
        .route("/api/tracks", get(get_tracks))
        .route("/api/audio/current", get(get_current_audio))
        .route("/ws", get(socket::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: HttpState,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HomeSync server listening on http://{}", addr);

        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(e) = serve.await {
            error!("HTTP server error: {}", e);
        }
    })
}

/// Send a request into the core loop and wait for its answer.
async fn ask<T>(
    state: &HttpState,
    make: impl FnOnce(oneshot::Sender<T>) -> SyncEvent,
) -> Result<T, StatusCode> {
    let (reply, answer) = oneshot::channel();
    if state.event_tx.send(make(reply)).await.is_err() {
        error!("SyncEvent channel closed");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    answer.await.map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

async fn control(
    State(state): State<HttpState>,
    Path(action): Path<String>,
    body: Option<Json<ControlRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let action = match ControlAction::parse(&action, &request) {
        Ok(action) => action,
        Err(message) => {
            warn!("HTTP API: {}", message);
            let body = ErrorBody {
                success: false,
                message,
            };
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    info!("HTTP API: control {:?}", action);
    match ask::<ControlResponse>(&state, |reply| SyncEvent::Control { action, reply }).await {
        Ok(response) => Json(response).into_response(),
        Err(status) => status.into_response(),
    }
}

async fn get_status(State(state): State<HttpState>) -> Result<Json<StatusResponse>, StatusCode> {
    ask(&state, |reply| SyncEvent::Status { reply }).await.map(Json)
}

async fn get_tracks(State(state): State<HttpState>) -> Result<Json<TracksResponse>, StatusCode> {
    ask(&state, |reply| SyncEvent::Tracks { reply }).await.map(Json)
}

async fn get_current_audio(State(state): State<HttpState>) -> Response {
    match ask(&state, |reply| SyncEvent::CurrentAudio { reply }).await {
        Ok(Some(audio)) => (
            [(header::CONTENT_TYPE, audio.content_type)],
            audio.data,
        )
            .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(status) => status.into_response(),
    }
}
