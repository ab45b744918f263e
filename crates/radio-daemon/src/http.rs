use crate::core::CoreEvent;
use crate::BroadcastMessage;
use async_stream::stream;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use radio_proto::browse::Genre;
use radio_proto::protocol::{Command, PlayerSnapshot};
use radio_proto::state::StateManager;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct HttpState {
    pub state_manager: Arc<StateManager>,
    pub event_tx: mpsc::Sender<CoreEvent>,
    pub broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/events", get(events))
        .route("/api/stations/reload", post(reload))
        .route("/api/search", post(search))
        .route("/api/genre/:tag", post(set_genre))
        .route("/api/select/:id", post(select))
        .route("/api/toggle", post(toggle))
        .route("/api/stop", post(stop))
        .route("/api/volume/:level", post(set_volume))
        .route("/api/mute", post(toggle_mute))
        .route("/api/mute/:mode", post(set_mute))
        .route("/api/favorite/:id", post(toggle_favorite))
        .route("/api/notice/dismiss", post(dismiss_notice))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: HttpState,
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

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

/// Hand one command to the session core.
async fn dispatch(state: &HttpState, cmd: Command) -> StatusCode {
    if state.event_tx.send(CoreEvent::Command(cmd)).await.is_err() {
        error!("HTTP API: session core is gone");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

async fn get_state(State(state): State<HttpState>) -> Json<PlayerSnapshot> {
    Json(state.state_manager.get_state().await)
}

async fn events(State(state): State<HttpState>) -> impl IntoResponse {
    let mut rx = state.broadcast_tx.subscribe();

    let stream = stream! {
        loop {
            match rx.recv().await {
                Ok(BroadcastMessage::StateUpdated { rev }) => {
                    yield Ok::<_, axum::Error>(Event::default().event("state").data(rev.to_string()));
                }
                Ok(BroadcastMessage::Notice(notice)) => {
                    if let Ok(json) = serde_json::to_string(&notice) {
                        yield Ok(Event::default().event("notice").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("HTTP API: event listener lagged by {}", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn reload(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Reload stations");
    dispatch(&state, Command::ReloadStations).await
}

async fn search(State(state): State<HttpState>, Json(req): Json<SearchRequest>) -> StatusCode {
    debug!("HTTP API: Search input {:?}", req.query);
    dispatch(&state, Command::QueryChanged { query: req.query }).await
}

async fn set_genre(
    State(state): State<HttpState>,
    Path(tag): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    info!("HTTP API: Genre {}", tag);
    let genre: Genre = tag
        .parse()
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("{}", e)))?;
    Ok(dispatch(&state, Command::SetGenre { genre }).await)
}

async fn select(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    info!("HTTP API: Select station {}", id);
    if !state.state_manager.get_state().await.knows_station(&id) {
        return StatusCode::NOT_FOUND;
    }
    dispatch(&state, Command::Select { id }).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle playback");
    dispatch(&state, Command::TogglePlayback).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Stop");
    dispatch(&state, Command::Stop).await
}

async fn set_volume(State(state): State<HttpState>, Path(level): Path<i32>) -> StatusCode {
    info!("HTTP API: Set volume to {}", level);
    dispatch(&state, Command::SetVolume { level }).await
}

async fn toggle_mute(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle mute");
    dispatch(&state, Command::ToggleMute).await
}

async fn set_mute(State(state): State<HttpState>, Path(mode): Path<String>) -> StatusCode {
    let muted = match mode.as_str() {
        "on" => true,
        "off" => false,
        _ => return StatusCode::BAD_REQUEST,
    };
    info!("HTTP API: Mute {}", mode);
    dispatch(&state, Command::SetMuted { muted }).await
}

async fn toggle_favorite(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    info!("HTTP API: Toggle favorite {}", id);
    dispatch(&state, Command::ToggleFavorite { id }).await
}

async fn dismiss_notice(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::DismissNotice).await
}
