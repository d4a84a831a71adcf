//! Embedded HTTP API and dashboard feed, grounded on the Regatta backend's
//! axum + tower-http router conventions (CORS layer, `Router::new().route(...)
//! .with_state(...)`, a shared `Arc<AppState>`), generalized from socket.io
//! push to [`tokio::sync::broadcast`]-backed SSE per spec.md \S6.
//!
//! Scope is the subset of the original external surface SPEC_FULL.md keeps:
//! vessel/stat/path/message JSON and the three SSE channels. `/metrics`
//! (Prometheus) and `/tiles/<layerId>/<z>/<x>/<y>` (map tiles) are excluded
//! Non-goals.

pub mod routes;
pub mod sse;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::get;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};

use crate::config::HttpConfig;
use crate::logger::Logger;
use crate::vessel::persist::SnapshotHandle;

/// Shared state every HTTP handler reads from.
pub struct AppState {
    /// The vessel DB, rolling histograms, and all-time counter.
    pub snapshot: Arc<SnapshotHandle>,
    /// Central logger, for `/api/log`'s initial backlog.
    pub logger: &'static Logger,
    /// This station's id, stamped into peer JSON.
    pub station_id: i32,
    /// Process start time, for `/api/stat.json`'s uptime field.
    pub started_at: Instant,
    /// Live feed hub behind `/api/sse` (new messages) and `/api/signal`
    /// (periodic counter snapshots). Shared as an `Arc` so it can also be
    /// wired as a [`crate::stream::Receiver`] subscriber alongside the
    /// output streamers.
    pub sse: Arc<sse::SseHub>,
}

impl AppState {
    /// New state wrapping an already-constructed snapshot handle.
    #[must_use]
    pub fn new(snapshot: Arc<SnapshotHandle>, logger: &'static Logger, station_id: i32) -> Arc<Self> {
        Arc::new(Self {
            snapshot,
            logger,
            station_id,
            started_at: Instant::now(),
            sse: Arc::new(sse::SseHub::new()),
        })
    }
}

/// Build the router: every `/api/*` route plus the three SSE upgrades.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/stat.json", get(routes::stat_json))
        .route("/api/ships.json", get(routes::ships_json))
        .route("/api/ships_array.json", get(routes::ships_array_json))
        .route("/api/ships_full.json", get(routes::ships_full_json))
        .route("/api/path.json", get(routes::path_json))
        .route("/api/message", get(routes::message_json))
        .route("/api/sse", get(sse::messages_stream))
        .route("/api/signal", get(sse::signal_stream))
        .route("/api/log", get(sse::log_stream))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

/// Bind and serve `router(state)` on `cfg.bind:cfg.port` until cancelled.
pub async fn serve(cfg: &HttpConfig, state: Arc<AppState>) -> std::io::Result<()> {
    let addr: SocketAddr = format!("{}:{}", cfg.bind, cfg.port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid http bind address: {e}")))?;
    log::info!("http server listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await
}
