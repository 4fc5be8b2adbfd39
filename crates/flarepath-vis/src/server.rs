//! Axum relay server: producer/viewer WebSockets plus replay REST API.
//!
//! Producers push event JSON (single objects or backlog arrays) over
//! `/ws?role=producer`; viewers connect with `role=viewer`, receive the
//! current backlog, then live fan-out. Malformed frames are dropped with a
//! warning at this boundary and never reach the aggregator.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use flarepath_events::AgentEvent;
use flarepath_timeline::{DisplayEntry, TokenSnapshot};

use crate::store::{
    ReplayStatusView, SeekResult, StoreMode, StoreUpdate, VisualizerStore,
};

/// Shared application state.
pub struct AppState {
    store: RwLock<VisualizerStore>,
}

/// Visualization relay server.
pub struct VisServer {
    state: Arc<AppState>,
}

impl VisServer {
    pub fn new(store: VisualizerStore) -> Self {
        Self {
            state: Arc::new(AppState {
                store: RwLock::new(store),
            }),
        }
    }

    /// Build the router for the server.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(status_handler))
            .route("/api/timeline", get(timeline_handler))
            .route("/api/replay", get(replay_status_handler))
            .route("/api/replay/enter", post(enter_handler))
            .route("/api/replay/exit", post(exit_handler))
            .route("/api/replay/play", post(play_handler))
            .route("/api/replay/pause", post(pause_handler))
            .route("/api/replay/speed", post(speed_handler))
            .route("/api/replay/seek", post(seek_handler))
            .route("/api/replay/seek_index", post(seek_index_handler))
            .route("/api/replay/step", post(step_handler))
            .route("/api/replay/advance", post(advance_handler))
            .route("/api/replay/frame", get(replay_frame_handler))
            .route("/api/live/tick", post(live_tick_handler))
            // WebSocket relay for producers and viewers
            .route("/ws", get(ws_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Run the server on the given port.
    pub async fn serve(self, port: u16) -> Result<(), std::io::Error> {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("flarepath relay running on http://localhost:{}", port);
        axum::serve(listener, self.router()).await
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    mode: StoreMode,
    event_count: usize,
    entry_count: usize,
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let store = state.store.read().await;
    Json(StatusResponse {
        status: "ok",
        mode: store.mode(),
        event_count: store.events().len(),
        entry_count: store.entries().len(),
    })
}

async fn timeline_handler(State(state): State<Arc<AppState>>) -> Json<Vec<DisplayEntry>> {
    let store = state.store.read().await;
    Json(store.entries().to_vec())
}

async fn replay_status_handler(
    State(state): State<Arc<AppState>>,
) -> Json<Option<ReplayStatusView>> {
    let store = state.store.read().await;
    Json(store.replay_status())
}

#[derive(Serialize)]
struct EnterResponse {
    entered: bool,
    status: Option<ReplayStatusView>,
}

async fn enter_handler(State(state): State<Arc<AppState>>) -> Json<EnterResponse> {
    let mut store = state.store.write().await;
    let entered = store.enter_replay();
    Json(EnterResponse {
        entered,
        status: store.replay_status(),
    })
}

async fn exit_handler(State(state): State<Arc<AppState>>) -> Json<Option<ReplayStatusView>> {
    let mut store = state.store.write().await;
    store.exit_replay();
    Json(store.replay_status())
}

async fn play_handler(State(state): State<Arc<AppState>>) -> Json<Option<ReplayStatusView>> {
    let mut store = state.store.write().await;
    store.play();
    Json(store.replay_status())
}

async fn pause_handler(State(state): State<Arc<AppState>>) -> Json<Option<ReplayStatusView>> {
    let mut store = state.store.write().await;
    store.pause();
    Json(store.replay_status())
}

#[derive(Deserialize)]
struct SpeedRequest {
    speed: f64,
}

async fn speed_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SpeedRequest>,
) -> Json<Option<ReplayStatusView>> {
    let mut store = state.store.write().await;
    store.set_speed(req.speed);
    Json(store.replay_status())
}

#[derive(Deserialize)]
struct SeekRequest {
    time: f64,
}

async fn seek_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SeekRequest>,
) -> Json<Option<SeekResult>> {
    let mut store = state.store.write().await;
    Json(store.seek_to_time(req.time))
}

#[derive(Deserialize)]
struct SeekIndexRequest {
    index: usize,
}

async fn seek_index_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SeekIndexRequest>,
) -> Json<Option<SeekResult>> {
    let mut store = state.store.write().await;
    Json(store.seek_to_index(req.index))
}

#[derive(Deserialize)]
struct StepRequest {
    delta: i64,
}

async fn step_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StepRequest>,
) -> Json<Option<SeekResult>> {
    let mut store = state.store.write().await;
    Json(store.step(req.delta))
}

#[derive(Deserialize)]
struct AdvanceRequest {
    dt: f64,
}

async fn advance_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AdvanceRequest>,
) -> Json<Option<SeekResult>> {
    let mut store = state.store.write().await;
    Json(store.advance(req.dt))
}

#[derive(Deserialize)]
struct FrameQuery {
    t: Option<f64>,
}

async fn replay_frame_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FrameQuery>,
) -> Json<Option<Vec<TokenSnapshot>>> {
    let store = state.store.read().await;
    Json(match query.t {
        Some(t) => store.replay_frame_at(t),
        None => store.replay_frame(),
    })
}

#[derive(Deserialize)]
struct TickRequest {
    dt: f64,
}

async fn live_tick_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TickRequest>,
) -> Json<Vec<TokenSnapshot>> {
    let mut store = state.store.write().await;
    store.live_tick(req.dt);
    Json(store.live_frame())
}

#[derive(Deserialize)]
struct WsParams {
    #[serde(default)]
    role: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let producer = params.role.as_deref() == Some("producer");
    ws.on_upgrade(move |socket| async move {
        if producer {
            handle_producer(socket, state).await;
        } else {
            handle_viewer(socket, state).await;
        }
    })
}

async fn handle_producer(mut socket: WebSocket, state: Arc<AppState>) {
    info!("producer connected");
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                handle_producer_frame(&state, text.as_str()).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    info!("producer disconnected");
}

async fn handle_producer_frame(state: &Arc<AppState>, frame: &str) {
    // A backlog arrives as an ordered array on (re)connect; otherwise a
    // single event per frame.
    if let Ok(backlog) = serde_json::from_str::<Vec<AgentEvent>>(frame) {
        let mut store = state.store.write().await;
        store.replace_backlog(backlog);
        return;
    }
    match serde_json::from_str::<AgentEvent>(frame) {
        Ok(event) => {
            let mut store = state.store.write().await;
            store.ingest(event);
        }
        Err(err) => {
            warn!("dropping malformed producer frame: {err:#}");
        }
    }
}

async fn handle_viewer(mut socket: WebSocket, state: Arc<AppState>) {
    // Subscribe before snapshotting the backlog so no event falls between.
    let (mut updates, backlog) = {
        let store = state.store.read().await;
        (store.subscribe(), store.events().to_vec())
    };

    match serde_json::to_string(&backlog) {
        Ok(json) => {
            if socket.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        Err(err) => {
            warn!("failed to serialize backlog for viewer: {err:#}");
            return;
        }
    }
    info!(backlog = backlog.len(), "viewer connected");

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(StoreUpdate::Event { event }) => {
                    let Ok(json) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Resynchronize a slow viewer with a fresh backlog.
                    warn!(skipped, "viewer lagged; resending backlog");
                    let backlog = {
                        let store = state.store.read().await;
                        store.events().to_vec()
                    };
                    let Ok(json) = serde_json::to_string(&backlog) else {
                        continue;
                    };
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!("viewer socket error: {err:#}");
                    break;
                }
            },
        }
    }
    info!("viewer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_creation() {
        let _server = VisServer::new(VisualizerStore::new());
    }

    #[test]
    fn router_builds() {
        let server = VisServer::new(VisualizerStore::new());
        let _router = server.router();
    }

    #[tokio::test]
    async fn producer_frames_reach_the_store() {
        let server = VisServer::new(VisualizerStore::new());
        let state = server.state.clone();

        let event = json!({
            "sequence": 1,
            "timestampMs": 1000,
            "actionType": "task_started",
            "action": {}
        });
        handle_producer_frame(&state, &event.to_string()).await;
        assert_eq!(state.store.read().await.events().len(), 1);

        // Backlog array replaces contents wholesale.
        let backlog = json!([
            {"sequence": 1, "timestampMs": 1000, "actionType": "task_started", "action": {}},
            {"sequence": 2, "timestampMs": 2000, "actionType": "task_complete", "action": {}}
        ]);
        handle_producer_frame(&state, &backlog.to_string()).await;
        assert_eq!(state.store.read().await.events().len(), 2);
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let server = VisServer::new(VisualizerStore::new());
        let state = server.state.clone();

        handle_producer_frame(&state, "not json at all").await;
        handle_producer_frame(&state, r#"{"sequence": "missing fields"}"#).await;
        assert!(state.store.read().await.events().is_empty());
    }
}
