//! Brio Server — HTTP adapter for the campaign orchestration engine.
//!
//! A thin axum layer over `brio-core`: it opens the database, wires the
//! completion service, starts the dispatcher worker pool, and exposes the
//! engine's operations to the dashboard's CRUD API.

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use brio_core::agent::{
    AgentClientConfig, CompletionService, HttpCompletionConfig, HttpCompletionService,
    RoleRegistry,
};
use brio_core::dispatch::{DispatcherConfig, WorkReceiver};
use brio_core::workflow::EngineConfig;
use brio_core::{AppState, AppStateInner, Database};

/// Configuration for the Brio backend server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub workers: usize,
    /// Directory of YAML role-spec overrides applied on top of builtins.
    pub roles_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3340,
            db_path: "brio.db".to_string(),
            workers: 4,
            roles_dir: None,
        }
    }
}

/// Create a shared `AppState` from a database path and completion service.
pub fn create_app_state(
    db_path: &str,
    completion: Arc<dyn CompletionService>,
    roles_dir: Option<&str>,
) -> Result<(AppState, WorkReceiver), String> {
    let db = Database::open(db_path).map_err(|e| format!("Failed to open database: {}", e))?;

    let mut registry = RoleRegistry::builtin();
    if let Some(dir) = roles_dir {
        let n = registry.load_dir(dir)?;
        tracing::info!("Loaded {} role override(s) from {}", n, dir);
    }

    let (inner, receiver) = AppStateInner::with_registry(
        db,
        completion,
        AgentClientConfig::default(),
        EngineConfig::default(),
        Arc::new(registry),
    );
    Ok((Arc::new(inner), receiver))
}

/// Build the full application router with CORS and request tracing.
pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api::api_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the database, start the worker pool, and serve until shutdown.
pub async fn serve(config: ServerConfig) -> Result<(), String> {
    let completion: Arc<dyn CompletionService> =
        Arc::new(HttpCompletionService::new(HttpCompletionConfig::default()));
    let (state, receiver) =
        create_app_state(&config.db_path, completion, config.roles_dir.as_deref())?;

    let _dispatcher = state.spawn_dispatcher(
        receiver,
        DispatcherConfig {
            workers: config.workers,
            ..Default::default()
        },
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid listen address: {}", e))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", addr, e))?;

    tracing::info!("Brio server listening on http://{}", addr);

    axum::serve(listener, app_router(state))
        .await
        .map_err(|e| format!("Server error: {}", e))
}
