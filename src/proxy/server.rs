//! HTTP server setup and configuration.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::bridge::{IdGenerator, RandomIds};
use crate::config::Config;
use crate::router::ModelRouter;
use crate::runner::{OpenAiRunner, Runner};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ModelRouter>,
    pub runner: Arc<dyn Runner>,
    pub ids: Arc<dyn IdGenerator>,
    pub config: Arc<Config>,
}

impl AppState {
    /// State for `config` with the given runner and random ids.
    pub fn new(config: Config, runner: Arc<dyn Runner>) -> Self {
        Self {
            router: Arc::new(config.model_router()),
            runner,
            ids: Arc::new(RandomIds),
            config: Arc::new(config),
        }
    }

    /// Replace the id generator.
    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let max_body_bytes = state.config.server.max_body_bytes;

    Router::new()
        // Messages-protocol endpoints
        .route("/v1/messages", post(handlers::messages))
        .route("/v1/messages/count_tokens", post(handlers::count_tokens))
        .route("/v1/models", get(handlers::list_models))
        .route("/health", get(handlers::health))
        // State and middleware
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let runner = OpenAiRunner::from_config(&config.upstream)?;
    let state = AppState::new(config, Arc::new(runner));

    tracing::info!(
        provider = %state.router.provider(),
        fallback_model = %state.router.fallback_model(),
        routes = state.router.table().len(),
        "Model router ready"
    );

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting msgbridge server");

    axum::serve(listener, app).await?;

    Ok(())
}
