//! HTTP and WebSocket surface over the capture engine

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::{Bytes, BytesMut};
use futures_util::{stream, SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::capture::{StreamCaptureEngine, StreamStatus};
use crate::config::Config;
use crate::encode::ImageFormat;

const MJPEG_BOUNDARY: &str = "frame";

/// Web server state
#[derive(Clone)]
pub struct AppState {
    engine: Arc<StreamCaptureEngine>,
    config: Arc<RwLock<Config>>,
    /// Where `PUT /api/config/rtsp_url` persists changes, if anywhere
    config_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(engine: Arc<StreamCaptureEngine>, config: Config, config_path: Option<PathBuf>) -> Self {
        Self {
            engine,
            config: Arc::new(RwLock::new(config)),
            config_path,
        }
    }

    pub fn engine(&self) -> &Arc<StreamCaptureEngine> {
        &self.engine
    }
}

/// Builds the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/stream/snapshot", get(snapshot_handler))
        .route("/api/stream/mjpeg", get(mjpeg_handler))
        .route("/api/stream/status", get(status_handler))
        .route("/api/stream/reconnect", post(reconnect_handler))
        .route("/api/config", get(config_handler))
        .route(
            "/api/config/:key",
            get(config_item_handler).put(update_config_handler),
        )
        .route("/ws/events", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the web server, returning once `shutdown` resolves
pub async fn run_server(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state);

    info!("Starting web server on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check handler
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotQuery {
    format: Option<ImageFormat>,
    quality: Option<u8>,
}

fn no_frame() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "No frame available" })),
    )
        .into_response()
}

/// Current frame as a still image, 503 before the first frame
async fn snapshot_handler(
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> Response {
    let format = query.format.unwrap_or_default();
    let quality = query
        .quality
        .unwrap_or_else(|| state.config.read().stream.jpeg_quality)
        .clamp(1, 100);

    let engine = Arc::clone(&state.engine);
    let encoded = tokio::task::spawn_blocking(move || engine.get_encoded_frame(format, quality))
        .await
        .ok()
        .flatten();

    match encoded {
        Some(image) => ([(header::CONTENT_TYPE, format.mime_type())], image).into_response(),
        None => no_frame(),
    }
}

/// Wraps one JPEG as a multipart/x-mixed-replace part
fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        MJPEG_BOUNDARY,
        jpeg.len()
    );

    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

/// Live feed: polls the freshest frame at the configured rate
async fn mjpeg_handler(State(state): State<AppState>) -> Response {
    let fps = state.config.read().server.mjpeg_fps.max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    debug!(fps, "MJPEG client connected");

    let parts = stream::unfold(
        (Arc::clone(&state.engine), ticker),
        |(engine, mut ticker)| async move {
            loop {
                ticker.tick().await;
                let source = Arc::clone(&engine);
                let jpeg = tokio::task::spawn_blocking(move || source.get_jpeg())
                    .await
                    .ok()
                    .flatten();
                if let Some(jpeg) = jpeg {
                    let part = multipart_part(&jpeg);
                    return Some((Ok::<_, Infallible>(part), (engine, ticker)));
                }
            }
        },
    );

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", MJPEG_BOUNDARY),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(parts))
        .unwrap_or_else(|e| {
            error!(error = %e, "Failed to build MJPEG response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

async fn status_handler(State(state): State<AppState>) -> Json<StreamStatus> {
    Json(state.engine.get_status())
}

#[derive(Debug, Default, Deserialize)]
struct ReconnectRequest {
    rtsp_url: Option<String>,
}

/// Reconnect trigger; returns before the new connection is up.
///
/// A new URL replaces the served config in memory only; `PUT
/// /api/config/rtsp_url` is the persisting path.
async fn reconnect_handler(
    State(state): State<AppState>,
    body: Option<Json<ReconnectRequest>>,
) -> impl IntoResponse {
    let new_url = body
        .and_then(|Json(req)| req.rtsp_url)
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty());

    if let Some(url) = &new_url {
        state.config.write().stream.url = url.clone();
    }
    state.engine.reconnect(new_url);

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "reconnecting": true,
            "rtsp_url": state.engine.target(),
        })),
    )
}

async fn config_handler(State(state): State<AppState>) -> Json<Config> {
    Json(state.config.read().clone())
}

fn unknown_key(key: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "detail": format!("Config key '{}' not found", key) })),
    )
        .into_response()
}

async fn config_item_handler(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    if key != "rtsp_url" {
        return unknown_key(&key);
    }

    let value = state.config.read().stream.url.clone();
    Json(json!({ "key": key, "value": value })).into_response()
}

#[derive(Debug, Deserialize)]
struct ConfigItem {
    value: String,
}

/// Updates a config value; `rtsp_url` is persisted and triggers a reconnect
async fn update_config_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(item): Json<ConfigItem>,
) -> Response {
    if key != "rtsp_url" {
        return unknown_key(&key);
    }

    let url = item.value.trim().to_string();
    if url.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "rtsp_url must not be empty" })),
        )
            .into_response();
    }

    let snapshot = {
        let mut config = state.config.write();
        config.stream.url = url.clone();
        config.clone()
    };

    if let Some(path) = state.config_path.clone() {
        let saved = tokio::task::spawn_blocking(move || snapshot.save(&path)).await;
        match saved {
            Ok(Ok(())) => debug!("Configuration saved"),
            Ok(Err(e)) => warn!(error = %e, "Failed to persist configuration"),
            Err(e) => warn!(error = %e, "Configuration save task failed"),
        }
    }

    state.engine.reconnect(Some(url.clone()));

    Json(json!({ "key": key, "value": url, "updated": true })).into_response()
}

#[derive(Serialize)]
struct StatusEvent {
    #[serde(rename = "type")]
    kind: &'static str,
    data: StreamStatus,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| push_status(socket, state))
}

/// Pushes the status snapshot periodically until the client goes away
async fn push_status(socket: WebSocket, state: AppState) {
    let interval = Duration::from_secs(state.config.read().server.status_interval_secs.max(1));
    let mut ticker = tokio::time::interval(interval);
    let (mut sender, mut receiver) = socket.split();

    info!("WebSocket client connected");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let event = StatusEvent {
                    kind: "stream_status",
                    data: state.engine.get_status(),
                };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(error = %e, "Failed to serialize status");
                        break;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
