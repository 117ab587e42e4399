//! Cognos Server Registry Backend
//!
//! REST backend for the Cognos/Pronto admin console: server enrollment,
//! editing, poll lifecycle and dashboard status, persisted in SQLite.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod models;
mod poller;
mod stats;
mod validation;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::AuthKeys;
use config::{Config, LogFormat};
use db::Repository;
use poller::{CognosProbe, Poller};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub poller: Poller,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    tracing::info!("Starting Cognos Server Registry Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!(
        "Poll timeout: {:?}, sweep concurrency: {}",
        config.poll_timeout,
        config.poll_concurrency
    );

    if config.auth_disabled() {
        tracing::warn!(
            "No API PSK configured (COGNOS_ADMIN_PSK / COGNOS_USER_PSK). Every caller is admin!"
        );
    }
    if config.demo_mode {
        tracing::warn!("Demo mode enabled: polls return canned inventories (COGNOS_DEMO_MODE)");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    let recovered = repo.recover_interrupted_polls().await?;
    if recovered > 0 {
        tracing::warn!("Marked {} interrupted polls as FAILED", recovered);
    }

    // Initialize poll orchestrator
    let probe = Arc::new(CognosProbe::new(config.demo_mode)?);
    let poller = Poller::new(
        repo.clone(),
        probe,
        config.poll_timeout,
        config.poll_concurrency,
    );

    if let Some(interval) = config.poll_interval {
        tracing::info!("Scheduled sweep every {:?}", interval);
        poller.clone().spawn_sweeper(interval);
    }

    // Create application state
    let state = AppState {
        repo,
        poller,
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Keys for the auth layer
    let keys = AuthKeys {
        admin: state.config.admin_psk.clone(),
        user: state.config.user_psk.clone(),
    };

    // API routes
    let api_routes = Router::new()
        .route(
            "/servers",
            get(api::list_servers).post(api::create_server),
        )
        .route("/servers/summary", get(api::server_summary))
        .route("/servers/poll-all", post(api::poll_all_servers))
        .route(
            "/servers/{id}",
            get(api::get_server)
                .put(api::update_server)
                .patch(api::update_server)
                .delete(api::delete_server),
        )
        .route("/servers/{id}/poll", post(api::poll_server))
        .route("/servers/{id}/metadata", get(api::server_metadata))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(keys.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
