use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use docta_core::feeds::FeedRelay;
use docta_core::{FetchError, SessionEvent, StateManager};
use docta_proto::protocol::{Command, NewsEntry, StationState, VideoEntry};
use futures_util::Stream;
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<SessionEvent>,
    relay: Arc<FeedRelay>,
}

#[derive(Serialize)]
struct TrackStatus {
    artist: String,
    title: String,
    updated_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

#[derive(Serialize)]
struct FeedEntries<T> {
    entries: Vec<T>,
    loading: bool,
    error: Option<String>,
}

pub fn router(
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<SessionEvent>,
    relay: Arc<FeedRelay>,
) -> Router {
    let app_state = HttpState {
        state_manager,
        event_tx,
        relay,
    };

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/track", get(get_track))
        .route("/api/news", get(relay_news))
        .route("/api/videos", get(relay_videos))
        .route("/api/news/entries", get(news_entries))
        .route("/api/videos/entries", get(video_entries))
        .route("/api/toggle", get(toggle).post(toggle))
        .route("/api/volume/:percent", get(set_volume).post(set_volume))
        .route("/api/cast", post(cast))
        .route("/api/news/refresh", post(refresh_news))
        .route("/api/videos/retry", post(retry_videos))
        .route("/api/events", get(events))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(app_state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<SessionEvent>,
    relay: Arc<FeedRelay>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx, relay);

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

async fn dispatch(state: &HttpState, cmd: Command) -> StatusCode {
    let name = format!("{:?}", cmd);
    if state.event_tx.send(SessionEvent::Command(cmd)).await.is_err() {
        error!("Failed to send {} command", name);
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

// ── state ─────────────────────────────────────────────────────────────────────

async fn get_state(State(state): State<HttpState>) -> Json<StationState> {
    Json(state.state_manager.get_state().await)
}

async fn get_track(State(state): State<HttpState>) -> Json<TrackStatus> {
    let s = state.state_manager.get_state().await;
    Json(TrackStatus {
        artist: s.track.artist,
        title: s.track.title,
        updated_at: s.metadata.updated_at,
        consecutive_failures: s.metadata.consecutive_failures,
    })
}

async fn news_entries(State(state): State<HttpState>) -> Json<FeedEntries<NewsEntry>> {
    let news = state.state_manager.get_state().await.news;
    Json(FeedEntries {
        entries: news.entries,
        loading: news.loading,
        error: news.error,
    })
}

async fn video_entries(State(state): State<HttpState>) -> Json<FeedEntries<VideoEntry>> {
    let videos = state.state_manager.get_state().await.videos;
    Json(FeedEntries {
        entries: videos.entries,
        loading: videos.loading,
        error: videos.error,
    })
}

/// Server-sent stream of every `StateEvent`.
async fn events(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.state_manager.subscribe();
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(evt) => {
                    let event = Event::default()
                        .json_data(&evt)
                        .unwrap_or_else(|_| Event::default().comment("unencodable event"));
                    return Some((Ok(event), rx));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("SSE client lagged, skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── commands ──────────────────────────────────────────────────────────────────

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle play");
    dispatch(&state, Command::TogglePlay).await
}

async fn set_volume(State(state): State<HttpState>, Path(percent): Path<i32>) -> StatusCode {
    let value = (percent as f32 / 100.0).clamp(0.0, 1.0);
    info!("HTTP API: Set volume to {}%", percent);
    dispatch(&state, Command::SetVolume { value }).await
}

async fn cast(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Cast");
    dispatch(&state, Command::Cast).await
}

async fn refresh_news(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::RefreshNews).await
}

async fn retry_videos(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::RetryVideos).await
}

// ── feed relay ────────────────────────────────────────────────────────────────

fn relayed(result: Result<String, FetchError>) -> Response {
    match result {
        Ok(xml) => ([(header::CONTENT_TYPE, "application/xml; charset=utf-8")], xml).into_response(),
        Err(e) => {
            error!("Feed relay failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn relay_news(State(state): State<HttpState>) -> Response {
    relayed(state.relay.news().await)
}

async fn relay_videos(State(state): State<HttpState>) -> Response {
    relayed(state.relay.videos().await)
}
