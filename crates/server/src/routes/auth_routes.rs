use auth::Role;
use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::{AppendHeaders, IntoResponse},
};
use http::header;
use serde::Deserialize;
use serde_json::{Value, json};
use storage::UserRow;

use crate::{error::ApiError, routes::AppState};

const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RegisterRequest {
    email: String,
    #[serde(default)]
    phone: Option<String>,
    name: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct LoginRequest {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    password: String,
}

/// Register a new NORMAL-tier user.
pub(super) async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<Value>, ApiError> {
    let email = request.email.trim();

    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("a valid email is required".to_string()));
    }

    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("a display name is required".to_string()));
    }

    if request.password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    if state.storage.email_exists(email).await? {
        return Err(ApiError::Conflict("email".to_string()));
    }

    if let Some(phone) = request.phone.as_deref()
        && state.storage.phone_exists(phone).await?
    {
        return Err(ApiError::Conflict("phone".to_string()));
    }

    let password_hash = bcrypt::hash(&request.password, bcrypt::DEFAULT_COST).map_err(|e| {
        log::error!("Failed to hash password: {e}");
        ApiError::Internal
    })?;

    let user = state
        .storage
        .register_user(email, request.phone.as_deref(), request.name.trim(), &password_hash)
        .await?;

    log::info!("Registered user {}", user.email);

    Ok(Json(json!({
        "success": true,
        "code": 200,
        "message": "registered",
        "data": { "user": user_payload(&user) },
    })))
}

/// Log in with email or phone plus password.
///
/// The fresh credential travels in the `Authorization` response header,
/// exposed to browser clients through `Access-Control-Expose-Headers`.
pub(super) async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = match (request.email.as_deref(), request.phone.as_deref()) {
        (Some(email), _) if !email.trim().is_empty() => state.storage.user_by_email(email.trim()).await?,
        (_, Some(phone)) if !phone.trim().is_empty() => state.storage.user_by_phone(phone.trim()).await?,
        _ => {
            return Err(ApiError::BadRequest("an email or a phone number is required".to_string()));
        }
    };

    // Verify against a constant dummy hash when the user does not exist, so
    // lookup success is not observable through response timing.
    let Some(user) = user else {
        let _ = bcrypt::verify(&request.password, "$2b$12$C6UzMDM.H6dfI/f/IKcEeO7lSWnFNfSbW6zBrlrxDmXZgpXmdUUaW");
        return Err(ApiError::Unauthorized);
    };

    let verified = bcrypt::verify(&request.password, &user.password_hash).map_err(|e| {
        log::error!("Password verification failed for {}: {e}", user.email);
        ApiError::Internal
    })?;

    if !verified {
        log::warn!("Failed login attempt for {}", user.email);
        return Err(ApiError::Unauthorized);
    }

    state.storage.touch_last_login(&user.email).await?;

    let role = Role::from_code(user.role).unwrap_or(Role::Normal);
    let token = state.guard.mint(&user.email, role, &user.name, user.version)?;

    log::info!("User {} logged in", user.email);

    let headers = AppendHeaders([
        (header::AUTHORIZATION, format!("Bearer {token}")),
        (header::ACCESS_CONTROL_EXPOSE_HEADERS, "Authorization".to_string()),
    ]);

    let body = Json(json!({
        "success": true,
        "code": 200,
        "message": "logged in",
        "data": { "user": user_payload(&user), "tokenType": "Bearer" },
    }));

    Ok((headers, body))
}

/// Log out by bumping the fencing version, invalidating every outstanding
/// credential for the subject.
pub(super) async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    let bearer = headers.get(header::AUTHORIZATION).and_then(|value| value.to_str().ok());

    let identity = state.guard.validate_bearer(bearer).map_err(|e| {
        log::debug!("Logout with unusable credential: {e}");
        ApiError::Unauthorized
    })?;

    state.storage.bump_credential_version(&identity.subject).await?;

    log::info!("User {} logged out", identity.subject);

    Ok(Json(json!({
        "success": true,
        "code": 200,
        "message": "logged out",
    })))
}

fn user_payload(user: &UserRow) -> Value {
    json!({
        "uuid": user.uuid,
        "email": user.email,
        "name": user.name,
        "role": Role::from_code(user.role).unwrap_or(Role::Normal).name(),
        "membershipExpiry": user.membership_expiry,
    })
}
