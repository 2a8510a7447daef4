//! Parlor Relay Server
//!
//! The network front for Parlor direct messaging:
//!
//! 1. **REST API**: conversations, message history, read state, flags,
//!    group membership and reactions under `/api`.
//!
//! 2. **Realtime channel**: a WebSocket at `/ws` that pushes new messages to
//!    every connected participant and carries typing indicators.
//!
//! Identity is established upstream: requests arrive with the authenticated
//! user id in `x-user-id`.

mod api;
mod auth;
mod handler;
mod protocol;
mod state;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, Method},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use clap::Parser;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use auth::Caller;
use state::{AppState, RelayConfig};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "parlor-relay", version, about = "Parlor messaging relay server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "PARLOR_PORT")]
    port: u16,

    /// SQLite database file. Omit to keep everything in memory.
    #[arg(short, long, env = "PARLOR_DATABASE")]
    database: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30, env = "PARLOR_REQUEST_TIMEOUT_SECS")]
    request_timeout_secs: u64,

    /// Messages per page when a history request gives no limit
    #[arg(long, default_value_t = 20, env = "PARLOR_DEFAULT_PAGE_SIZE")]
    default_page_size: u32,

    /// Emit logs as JSON lines
    #[arg(long, env = "PARLOR_LOG_JSON")]
    log_json: bool,
}

impl From<Args> for RelayConfig {
    fn from(args: Args) -> Self {
        Self {
            port: args.port,
            database_path: args.database,
            request_timeout_secs: args.request_timeout_secs,
            default_page_size: args.default_page_size,
        }
    }
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "parlor_relay=info,parlor_core=info,tower_http=info".into());
    if args.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = RelayConfig::from(args);
    let addr = format!("0.0.0.0:{}", config.port);
    match &config.database_path {
        Some(path) => tracing::info!(path = path.as_str(), "Using database file"),
        None => tracing::warn!("No database configured; messages live in memory only"),
    }

    let state = AppState::open(config)?;
    let app = build_router(state.clone());

    tracing::info!("Parlor relay server starting on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown();
    tracing::info!("Parlor relay server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// All routes with their middleware, bound to `state`.
pub(crate) fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let api = Router::new()
        .route(
            "/api/conversations",
            get(api::list_conversations).post(api::open_direct),
        )
        .route("/api/conversations/group", post(api::create_group))
        .route(
            "/api/conversations/:id",
            get(api::get_conversation).delete(api::delete_conversation),
        )
        .route("/api/conversations/:id/read", put(api::mark_conversation_read))
        .route("/api/conversations/:id/unread", get(api::unread_count))
        .route(
            "/api/conversations/:id/participants",
            post(api::add_participant),
        )
        .route(
            "/api/conversations/:id/participants/:user_id",
            delete(api::remove_participant),
        )
        .route("/api/conversations/:id/:flag", put(api::set_flag))
        .route("/api/messages", post(api::send_message))
        .route("/api/messages/:id", delete(api::delete_message))
        .route("/api/messages/:id/read", put(api::mark_message_read))
        .route(
            "/api/messages/:id/reaction",
            post(api::set_reaction).delete(api::clear_reaction),
        )
        // Sockets are long-lived; only plain requests get the timeout.
        // A timeout ends the response, not the service call behind it: a
        // write may still commit after the client has seen the failure.
        .layer(TimeoutLayer::new(state.config.request_timeout()));

    Router::new()
        .merge(api)
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler for client connections.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let authenticated = Caller::from_headers(&headers).map(|Caller(user)| user);
    ws.on_upgrade(move |socket| handler::handle_websocket(socket, state, authenticated))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "parlor-relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Statistics endpoint.
async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "online_users": state.online_count(),
        "connections": state.connection_count(),
        "realtime_running": state.service.router().is_running(),
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(AppState::open(RelayConfig::default()).unwrap());
        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "parlor-relay");
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let state = AppState::open(RelayConfig::default()).unwrap();
        let (_connection, _events) = state
            .service
            .connect(&parlor_core::UserId::parse("alice").unwrap())
            .unwrap();

        let (status, body) = get_json(build_router(state), "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["online_users"], 1);
        assert_eq!(body["connections"], 1);
        assert_eq!(body["realtime_running"], true);
    }

    #[test]
    fn test_args_into_config() {
        let args = Args::parse_from([
            "parlor-relay",
            "--port",
            "9000",
            "--database",
            "/tmp/parlor.db",
            "--default-page-size",
            "50",
        ]);
        let config = RelayConfig::from(args);
        assert_eq!(config.port, 9000);
        assert_eq!(config.database_path.as_deref(), Some("/tmp/parlor.db"));
        assert_eq!(config.default_page_size, 50);
        assert_eq!(config.request_timeout_secs, 30);
    }
}
