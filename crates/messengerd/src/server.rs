//! Listening surface and protocol negotiation.
//!
//! One TCP endpoint. A valid WebSocket upgrade hands the connection to
//! [`crate::connection::handle_socket`]; anything else — wrong path or a
//! plain HTTP request — completes exactly one request/response cycle with a
//! `404 Not Found` carrying the server identification header, and the
//! connection is told to close.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tracing::info;

use libmessenger::{ChatStore, Registry};

use crate::config::ServerConfig;
use crate::connection;

/// `Server` header value on fallback responses.
pub const SERVER_IDENT: &str = concat!("messengerd/", env!("CARGO_PKG_VERSION"));

/// Shared application state handed to every connection task.
pub struct AppState {
    pub registry: Arc<Registry>,
    pub store: ChatStore,
    pub queue_depth: usize,
    pub logout_grace: Duration,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, store: ChatStore, config: &ServerConfig) -> Self {
        Self {
            registry,
            store,
            queue_depth: config.outbound_queue_depth,
            logout_grace: Duration::from_millis(config.logout_grace_ms),
        }
    }
}

/// Open the store, bind the listener, and serve until fatal error.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let db_path = config.resolved_db_path();
    let store = ChatStore::open(Some(&db_path))
        .with_context(|| format!("failed to open chat store at {}", db_path.display()))?;
    let registry = Arc::new(Registry::new());
    let state = Arc::new(AppState::new(registry, store, &config));

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen))?;

    info!(listen = %config.listen, "messengerd listening");
    serve(listener, state).await
}

/// Serve on an already-bound listener. Split out so tests can bind port 0.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
) -> anyhow::Result<()> {
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", any(ws_entry))
        .fallback(fallback_404)
        .with_state(state)
}

async fn ws_entry(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match upgrade {
        Ok(ws) => ws.on_upgrade(move |socket| connection::handle_socket(socket, state)),
        Err(_) => plain_404(),
    }
}

async fn fallback_404() -> Response {
    plain_404()
}

fn plain_404() -> Response {
    (
        StatusCode::NOT_FOUND,
        [
            (header::SERVER, HeaderValue::from_static(SERVER_IDENT)),
            (header::CONNECTION, HeaderValue::from_static("close")),
        ],
        "404 Not Found",
    )
        .into_response()
}
