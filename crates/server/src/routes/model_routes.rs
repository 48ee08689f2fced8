use auth::Role;
use axum::{Json, extract::State, http::HeaderMap};
use http::header;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{error::ApiError, routes::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RegisterModelRequest {
    name: String,
    #[serde(default)]
    kind: i64,
    provider: String,
    url: String,
    #[serde(default)]
    parameters: Option<Value>,
    allowed_roles: Vec<String>,
    #[serde(default = "default_max_history")]
    max_history: i64,
}

fn default_max_history() -> i64 {
    10
}

/// Register a model. Admin only; the credential must be current.
pub(super) async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterModelRequest>,
) -> Result<Json<Value>, ApiError> {
    let bearer = headers.get(header::AUTHORIZATION).and_then(|value| value.to_str().ok());

    let identity = state.guard.validate_bearer(bearer).map_err(|e| {
        log::debug!("Model registration with unusable credential: {e}");
        ApiError::Unauthorized
    })?;

    let current = state.storage.credential_version(&identity.subject).await?;
    if current != Some(identity.version) {
        return Err(ApiError::Unauthorized);
    }

    if identity.role != Role::Admin {
        return Err(ApiError::Forbidden);
    }

    if request.name.trim().is_empty() || request.url.trim().is_empty() || request.provider.trim().is_empty() {
        return Err(ApiError::BadRequest("name, provider and url are required".to_string()));
    }

    if request.allowed_roles.is_empty() {
        return Err(ApiError::BadRequest("allowedRoles must not be empty".to_string()));
    }

    if request.allowed_roles.iter().any(|name| Role::parse(name).is_none()) {
        return Err(ApiError::BadRequest("allowedRoles contains an unknown role".to_string()));
    }

    if state.storage.model_by_name(request.name.trim()).await?.is_some() {
        return Err(ApiError::Conflict("model name".to_string()));
    }

    let row = state
        .storage
        .register_model(&storage::ModelRegistration {
            name: request.name.trim().to_string(),
            kind: request.kind,
            provider: request.provider.trim().to_string(),
            url: request.url.trim().to_string(),
            parameters: request.parameters.unwrap_or_else(|| json!({})),
            allowed_roles: request.allowed_roles,
            max_history: request.max_history,
        })
        .await?;

    log::info!("Registered model {} for provider {}", row.name, row.provider);

    Ok(Json(json!({
        "success": true,
        "code": 200,
        "message": "model registered",
        "data": { "model": summary(&row) },
    })))
}

/// List registered models. Endpoint URLs and provider parameters stay
/// server-side.
pub(super) async fn list(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let models = state.storage.list_models().await?;
    let summaries: Vec<Value> = models.iter().map(summary).collect();

    Ok(Json(json!({
        "success": true,
        "code": 200,
        "data": { "models": summaries },
    })))
}

fn summary(model: &storage::ModelRow) -> Value {
    json!({
        "name": model.name,
        "kind": model.kind,
        "provider": model.provider,
        "allowedRoles": model.allowed_role_names(),
        "maxHistory": model.max_history,
    })
}
