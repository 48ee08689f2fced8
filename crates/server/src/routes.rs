mod auth_routes;
mod model_routes;

use std::sync::Arc;

use auth::CredentialGuard;
use axum::{Router, routing::post};
use storage::Storage;

/// Shared state for the JSON routes.
#[derive(Clone)]
pub(crate) struct AppState {
    pub storage: Storage,
    pub guard: Arc<CredentialGuard>,
}

/// Routes for registration, login/logout and the model registry.
pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth/register", post(auth_routes::register))
        .route("/auth/login", post(auth_routes::login))
        .route("/auth/logout", post(auth_routes::logout))
        .route("/models", post(model_routes::register).get(model_routes::list))
        .with_state(state)
}
