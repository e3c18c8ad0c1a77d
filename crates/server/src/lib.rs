pub mod advisor;
pub mod config;
pub mod cycle;
pub mod error;
pub mod registry;
pub mod routes;
pub mod scheduler;
pub mod storage;
pub mod ws;

use axum::{
    Router,
    extract::FromRef,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use advisor::Advisor;
use config::AppConfig;
use registry::SharedRegistry;
use storage::Db;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: Arc<AppConfig>,
    pub registry: SharedRegistry,
    pub advisor: Arc<dyn Advisor>,
}

impl AppState {
    pub fn new(db: Db, config: AppConfig, advisor: Arc<dyn Advisor>) -> Self {
        let registry = registry::SessionRegistry::shared(config.session.idle_timeout());
        Self {
            db,
            config: Arc::new(config),
            registry,
            advisor,
        }
    }
}

impl FromRef<AppState> for Db {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Arc<dyn Advisor> {
    fn from_ref(state: &AppState) -> Self {
        state.advisor.clone()
    }
}

/// Build the full router: REST + WebSocket under `/api`, widget assets as
/// the fallback when `web_dir` exists.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(routes::health::health))
        .route("/ws", get(ws::ws_handler))
        .route(
            "/conversations/{session_id}",
            get(routes::conversations::get_conversation),
        )
        .route("/follow-up", post(routes::follow_up::follow_up))
        .route("/leads", post(routes::leads::create_lead));

    let mut app = Router::new().nest("/api", api);

    let web_dir = &state.config.server.web_dir;
    if web_dir.exists() {
        tracing::info!("serving static files from {}", web_dir.display());
        let index_html = web_dir.join("index.html");
        app = app.fallback_service(ServeDir::new(web_dir).fallback(ServeFile::new(index_html)));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
