//! HTTP routes served on the viewer listener.
//!
//! | Method | Path          | Response                                  |
//! |--------|---------------|-------------------------------------------|
//! | GET    | `/`           | viewer page                               |
//! | GET    | `/index.html` | viewer page                               |
//! | GET    | `ws_path`     | WebSocket upgrade, or 400 without one     |
//! | other  | known path    | 405                                       |
//! | any    | anything else | 404                                       |
//!
//! Each request, the upgrade response included, is bounded by the
//! handshake timeout.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use logcast_core::ViewerRegistry;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, warn};

use crate::domain::ServerConfig;
use crate::infrastructure::viewer_session::{SessionLimits, SessionSet};

/// Built-in viewer page.  `{{WS_PATH}}` is replaced with the configured path
/// as a JSON string literal.
const DEFAULT_PAGE: &str = include_str!("../../static/index.html");

/// Where the viewer page comes from.
#[derive(Debug, Clone)]
pub enum PageSource {
    /// The page compiled into the binary.
    Embedded,
    /// A file read on every request, so it can be edited while running.
    File(PathBuf),
}

impl PageSource {
    pub fn from_config(page_path: Option<&PathBuf>) -> Self {
        match page_path {
            Some(path) => PageSource::File(path.clone()),
            None => PageSource::Embedded,
        }
    }

    /// Returns the page HTML with `{{WS_PATH}}` replaced by `ws_path`
    /// encoded as a JSON string, quotes included.
    pub async fn render(&self, ws_path: &str) -> std::io::Result<String> {
        let template = match self {
            PageSource::Embedded => DEFAULT_PAGE.to_string(),
            PageSource::File(path) => tokio::fs::read_to_string(path).await?,
        };
        let literal = serde_json::to_string(ws_path).map_err(std::io::Error::other)?;
        Ok(template.replace("{{WS_PATH}}", &literal))
    }
}

/// Shared state of every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub page: Arc<PageSource>,
    pub registry: ViewerRegistry,
    pub sessions: SessionSet,
}

impl AppState {
    pub fn new(config: Arc<ServerConfig>, registry: ViewerRegistry, sessions: SessionSet) -> Self {
        let page = Arc::new(PageSource::from_config(config.page_path.as_ref()));
        Self {
            config,
            page,
            registry,
            sessions,
        }
    }
}

/// Builds the router for the viewer listener.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`; the
/// upgrade route reads the peer address.
pub fn router(state: AppState) -> Router {
    let handshake_timeout = state.config.handshake_timeout;
    Router::new()
        .route("/", get(viewer_page))
        .route("/index.html", get(viewer_page))
        .route(&state.config.ws_path, get(viewer_upgrade))
        .layer(TimeoutLayer::new(handshake_timeout))
        .with_state(state)
}

async fn viewer_page(State(state): State<AppState>) -> Response {
    match state.page.render(&state.config.ws_path).await {
        Ok(html) => ([(header::CACHE_CONTROL, "no-cache")], Html(html)).into_response(),
        Err(e) => {
            warn!("failed to load viewer page: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "viewer page unavailable\n").into_response()
        }
    }
}

// `WebSocketUpgrade` comes first so a plain GET is refused with 400 before
// anything else is extracted.
async fn viewer_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    debug!(peer = %peer, "viewer upgrade requested");
    let limits = SessionLimits::from_config(&state.config);
    let AppState {
        registry, sessions, ..
    } = state;
    ws.on_failed_upgrade(move |e| warn!(peer = %peer, "WebSocket upgrade failed: {e}"))
        .on_upgrade(move |socket| sessions.session(socket, peer, registry, limits))
}
