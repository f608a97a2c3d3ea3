//! services/sync_server/src/web/rest.rs
//!
//! Contains the Axum handlers for the plain HTTP endpoints.

use crate::web::state::AppState;
use axum::{extract::State, response::Json};
use serde::Serialize;
use std::sync::Arc;

/// The liveness payload.
#[derive(Serialize, Debug, PartialEq)]
pub struct HealthResponse {
    status: &'static str,
    collection: String,
}

/// Reports that the server is up and which collection it serves.
pub async fn health_handler(State(app_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        collection: app_state.collection().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use survey_sync_core::memory::{InMemoryDocumentStore, InMemoryIdentityProvider};

    #[tokio::test]
    async fn health_names_the_served_collection() {
        let config = Config::from_lookup(|name| match name {
            "STORE_BACKEND" => Some("memory".to_string()),
            "APP_ID" => Some("survey-test".to_string()),
            _ => None,
        })
        .unwrap();
        let state = Arc::new(AppState {
            store: Arc::new(InMemoryDocumentStore::new()),
            identity_provider: Arc::new(InMemoryIdentityProvider::new()),
            config: Arc::new(config),
        });

        let Json(health) = health_handler(State(state)).await;
        assert_eq!(
            health,
            HealthResponse {
                status: "ok",
                collection: "artifacts/survey-test/public/data/projects".to_string(),
            }
        );
    }
}
