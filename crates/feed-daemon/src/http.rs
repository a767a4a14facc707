use crate::core::SessionEvent;
use crate::BroadcastMessage;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::Json,
    routing::{get, post},
    Router,
};
use futures_util::Stream;
use feed_proto::catalog::{LikedSet, TrackCatalog, TrackList};
use feed_proto::model::Track;
use feed_proto::protocol::Command;
use feed_proto::state::{DashboardState, StateManager};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<SessionEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

#[derive(Serialize)]
struct ApiState {
    rev: u64,
    profile: Option<ProfileInfo>,
    top_tracks: Vec<TrackInfo>,
    recommendations: Vec<TrackInfo>,
    recently_played: Vec<TrackInfo>,
    liked: LikedSet,
    playback: PlaybackInfo,
    loading: bool,
    polling: bool,
    auth_expired: bool,
}

#[derive(Serialize)]
struct ProfileInfo {
    display_name: Option<String>,
    email: Option<String>,
    image_url: Option<String>,
}

#[derive(Serialize)]
struct TrackInfo {
    id: Option<String>,
    name: String,
    artist: Option<String>,
    popularity: u32,
    art_url: Option<String>,
    web_url: Option<String>,
    liked: bool,
    playing: bool,
}

#[derive(Serialize)]
struct PlaybackInfo {
    track_id: Option<String>,
    track_name: Option<String>,
    is_active: bool,
    device_id: Option<String>,
}

impl ApiState {
    fn from_dashboard(state: DashboardState) -> Self {
        let tracks = |list: &TrackList| -> Vec<TrackInfo> {
            list.tracks()
                .iter()
                .map(|t| TrackInfo::new(t, &state))
                .collect()
        };

        Self {
            rev: state.rev,
            profile: state.profile.as_ref().map(|p| ProfileInfo {
                display_name: p.display_name.clone(),
                email: p.email.clone(),
                image_url: p.image_url().map(str::to_string),
            }),
            top_tracks: tracks(&state.top_tracks),
            recommendations: tracks(&state.recommendations),
            recently_played: tracks(&state.recently_played),
            liked: state.liked.clone(),
            playback: PlaybackInfo {
                track_id: state.playback.current_track_id().map(str::to_string),
                track_name: state.playback.current_track.as_ref().map(|t| t.name.clone()),
                is_active: state.playback.is_active,
                device_id: state.playback.active_device_id.clone(),
            },
            loading: state.loading,
            polling: state.polling,
            auth_expired: state.auth_expired,
        }
    }
}

impl TrackInfo {
    fn new(track: &Track, state: &DashboardState) -> Self {
        let id = track.id();
        Self {
            id: id.map(str::to_string),
            name: track.name.clone(),
            artist: track.primary_artist_name().map(str::to_string),
            popularity: track.popularity,
            art_url: track.art_url().map(str::to_string),
            web_url: track.web_url().map(str::to_string),
            liked: id.map_or(false, |id| state.liked.contains(id)),
            playing: id.map_or(false, |id| state.playback.is_playing_track(id)),
        }
    }
}

pub fn router(
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<SessionEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> Router {
    let app_state = HttpState {
        state_manager,
        event_tx,
        broadcast_tx,
    };

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/events", get(events))
        .route("/api/start", post(start_session))
        .route("/api/refresh", post(refresh))
        .route("/api/like/:track_id", post(toggle_like))
        .route("/api/play/:track_id", post(play_pause))
        .route("/api/logout", post(logout))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<SessionEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx, broadcast_tx);

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

async fn send_command(state: &HttpState, cmd: Command) -> StatusCode {
    if state.event_tx.send(SessionEvent::Command(cmd)).await.is_err() {
        error!("Failed to send command: session loop is gone");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<ApiState> {
    let dashboard = state.state_manager.get_state().await;
    Json(ApiState::from_dashboard(dashboard))
}

/// SSE frame for a broadcast message.  Clients re-read `/api/state` on
/// `state`.
fn sse_event(msg: &BroadcastMessage) -> Event {
    match msg {
        BroadcastMessage::StateUpdated => Event::default().event("state").data("updated"),
        BroadcastMessage::Log(line) => Event::default().event("log").data(line.replace('\r', "")),
        BroadcastMessage::AuthExpired => Event::default().event("auth_expired").data("session ended"),
        BroadcastMessage::OpenExternal(url) => Event::default().event("open_external").data(url),
    }
}

async fn events(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("HTTP API: event stream opened");
    let rx = state.broadcast_tx.subscribe();
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(msg) => return Some((Ok::<_, Infallible>(sse_event(&msg)), rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("event stream lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn start_session(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Start session");
    send_command(&state, Command::StartSession).await
}

async fn refresh(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Refresh");
    send_command(&state, Command::Refresh).await
}

async fn toggle_like(State(state): State<HttpState>, Path(track_id): Path<String>) -> StatusCode {
    info!("HTTP API: Toggle like {}", track_id);
    send_command(&state, Command::ToggleLike { track_id }).await
}

async fn play_pause(State(state): State<HttpState>, Path(track_id): Path<String>) -> StatusCode {
    info!("HTTP API: Play/pause {}", track_id);
    if state.state_manager.find_track(&track_id).await.is_none() {
        return StatusCode::NOT_FOUND;
    }
    send_command(&state, Command::PlayPause { track_id }).await
}

async fn logout(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Logout");
    send_command(&state, Command::Logout).await
}
