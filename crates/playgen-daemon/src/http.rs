use crate::core::{CoreHandle, SharedSnapshot};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use playgen_proto::library::LibraryStore;
use playgen_proto::models::{Playlist, Session, SessionPatch, Settings, SettingsPatch, Song};
use playgen_proto::player::PlayerSnapshot;
use playgen_proto::protocol::{Command, DownloadOutcome, Response};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<LibraryStore>,
    pub snapshot: SharedSnapshot,
    pub core: CoreHandle,
}

#[derive(Deserialize)]
struct DownloadBody {
    url: String,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/songs", get(list_songs))
        .route("/api/playlists", get(list_playlists))
        .route("/api/playlists/:id/songs", get(playlist_songs))
        .route("/api/download", post(download))
        .route("/api/play/:song_id", post(play_song))
        .route("/api/toggle", post(toggle))
        .route("/api/next", post(next))
        .route("/api/prev", post(prev))
        .route("/api/session", get(get_session).post(save_session))
        .route("/api/settings", get(get_settings).post(save_settings))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(bind_address: String, port: u16, state: HttpState) -> tokio::task::JoinHandle<()> {
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

/// Run `command` through the core and map its response onto a status code.
async fn forward(state: &HttpState, command: Command) -> (StatusCode, Json<Response>) {
    match state.core.request(command).await {
        Ok(response @ Response::Error { .. }) => (StatusCode::UNPROCESSABLE_ENTITY, Json(response)),
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(e) => {
            error!("HTTP API: core unavailable: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(Response::error(e)))
        }
    }
}

async fn get_state(State(state): State<HttpState>) -> Json<PlayerSnapshot> {
    Json(state.snapshot.read().await.clone())
}

async fn list_songs(State(state): State<HttpState>) -> Json<Vec<Song>> {
    Json(state.store.songs().await)
}

async fn list_playlists(State(state): State<HttpState>) -> Json<Vec<Playlist>> {
    Json(state.store.playlists().await)
}

async fn playlist_songs(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Song>>, StatusCode> {
    state
        .store
        .playlist_songs(&id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn download(State(state): State<HttpState>, Json(body): Json<DownloadBody>) -> impl IntoResponse {
    info!("HTTP API: download {}", body.url);
    let (status, Json(response)) = forward(&state, Command::DownloadSong { url: body.url }).await;
    let status = match &response {
        Response::Download {
            outcome: DownloadOutcome::AlreadyDownloaded { .. },
        } => StatusCode::CONFLICT,
        _ => status,
    };
    (status, Json(response))
}

async fn play_song(State(state): State<HttpState>, Path(song_id): Path<String>) -> impl IntoResponse {
    info!("HTTP API: play {}", song_id);
    forward(&state, Command::Play { song_id }).await
}

async fn toggle(State(state): State<HttpState>) -> impl IntoResponse {
    forward(&state, Command::TogglePlay).await
}

async fn next(State(state): State<HttpState>) -> impl IntoResponse {
    forward(&state, Command::Next).await
}

async fn prev(State(state): State<HttpState>) -> impl IntoResponse {
    forward(&state, Command::Prev).await
}

async fn get_session(State(state): State<HttpState>) -> Json<Session> {
    Json(state.store.session().await)
}

async fn save_session(State(state): State<HttpState>, Json(patch): Json<SessionPatch>) -> impl IntoResponse {
    forward(&state, Command::SaveSession { patch }).await
}

async fn get_settings(State(state): State<HttpState>) -> Json<Settings> {
    Json(state.store.settings().await)
}

async fn save_settings(State(state): State<HttpState>, Json(patch): Json<SettingsPatch>) -> impl IntoResponse {
    forward(&state, Command::SaveSettings { patch }).await
}
