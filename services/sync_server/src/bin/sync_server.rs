//! services/sync_server/src/bin/sync_server.rs

use axum::http::{HeaderValue, Method};
use axum::{routing::get, Router};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use survey_sync_core::memory::InMemoryDocumentStore;
use survey_sync_core::ports::{DocumentStore, IdentityProvider};
use sync_server_lib::{
    adapters::{JwtIdentityProvider, PgDocumentStore},
    config::{Config, StoreBackend},
    error::ServerError,
    web::{health_handler, state::AppState, ws_handler},
};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect the Store & Identity Adapters ---
    let (store, identity_provider): (Arc<dyn DocumentStore>, Arc<dyn IdentityProvider>) =
        match config.store_backend {
            StoreBackend::Postgres => {
                let database_url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| ServerError::Internal("DATABASE_URL is required".to_string()))?;
                info!("Connecting to database...");
                let db_pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect(database_url)
                    .await?;
                let store = PgDocumentStore::new(db_pool.clone());
                info!("Running database migrations...");
                store.run_migrations().await?;
                info!("Database migrations complete.");

                let identity = JwtIdentityProvider::new(config.auth_token_secret.as_deref())
                    .with_user_registry(db_pool);
                (Arc::new(store), Arc::new(identity))
            }
            StoreBackend::Memory => {
                warn!("Using the in-memory store; projects are lost on restart.");
                let identity = JwtIdentityProvider::new(config.auth_token_secret.as_deref());
                (Arc::new(InMemoryDocumentStore::new()), Arc::new(identity))
            }
        };
    if config.auth_token_secret.is_none() {
        warn!("AUTH_TOKEN_SECRET is not set; every session signs in anonymously.");
    }

    // --- 3. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        store,
        identity_provider,
        config: config.clone(),
    });
    info!("Serving collection {}", app_state.collection());

    let allowed_origin = config
        .allowed_origin
        .parse::<HeaderValue>()
        .map_err(|e| ServerError::Internal(format!("Invalid ALLOWED_ORIGIN: {}", e)))?;
    let cors = CorsLayer::new()
        .allow_origin(allowed_origin)
        .allow_methods([Method::GET, Method::OPTIONS]);

    // --- 4. Create the Web Router ---
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(app_state);

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
